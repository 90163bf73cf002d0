use super::error::EngineError;
use super::state::PartialState;
use super::strategy::BiasStrategy;
use nalgebra::DVector;
use std::sync::Arc;

/// Gradient `∂V/∂xi` of the parallel-bias potential seen by a step in progress.
///
/// Out-of-bounds grid locations yield a zero gradient rather than an extrapolation.
#[derive(Debug, Clone)]
pub struct BiasGradientEvaluator {
    strategy: Arc<dyn BiasStrategy>,
}

impl BiasGradientEvaluator {
    pub fn new(strategy: Arc<dyn BiasStrategy>) -> Self {
        Self { strategy }
    }

    pub fn gradient(&self, partial: &PartialState) -> Result<DVector<f64>, EngineError> {
        let gradient = self.strategy.gradient(partial);
        if gradient.iter().any(|g| !g.is_finite()) {
            return Err(EngineError::NonFinite {
                quantity: "bias gradient",
                step: partial.state().step_count(),
            });
        }
        Ok(gradient)
    }

    pub fn potential(&self, partial: &PartialState) -> f64 {
        self.strategy.potential(partial)
    }
}
