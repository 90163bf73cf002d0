use super::config::ParallelBiasConfig;
use super::error::EngineError;
use super::state::{BiasState, Deposition, PartialState};
use super::strategy::BiasStrategy;
use crate::core::potentials::switching_probabilities;
use nalgebra::DVector;
use std::sync::Arc;
use tracing::debug;

/// Decides, once per step, whether a Gaussian is deposited and with which height.
#[derive(Debug, Clone)]
pub struct GaussianDepositor {
    height0: DVector<f64>,
    stride: u64,
    capacity: usize,
    beta: f64,
    kb_delta_t: f64,
    strategy: Arc<dyn BiasStrategy>,
}

impl GaussianDepositor {
    pub fn new(config: &ParallelBiasConfig, strategy: Arc<dyn BiasStrategy>) -> Self {
        Self {
            height0: config.height().clone(),
            stride: config.stride(),
            capacity: config.ngaussians(),
            beta: config.beta(),
            kb_delta_t: config.kb_delta_t(),
            strategy,
        }
    }

    #[inline]
    pub fn is_deposition_step(&self, step_count: u64) -> bool {
        step_count > 0 && step_count % self.stride == 0
    }

    /// Parallel-bias height of a Gaussian centered at `xi`, given the per-CV bias there.
    ///
    /// `w_k = h0_k · exp(-V_k / (k_B ΔT)) · softmax_k(-β V)`; on a fresh state the
    /// weights sum to `h0` when every CV shares the same initial height.
    pub fn next_height(&self, bias_each_cv: &DVector<f64>) -> DVector<f64> {
        let tempering = bias_each_cv.map(|v| (-v / self.kb_delta_t).exp());
        self.height0
            .component_mul(&tempering)
            .component_mul(&switching_probabilities(bias_each_cv, self.beta))
    }

    /// Builds the partial state of the current step, with the Gaussian to deposit (if
    /// any) staged but not yet written.
    pub fn propose<'a>(
        &self,
        state: &'a BiasState,
        xi: DVector<f64>,
    ) -> Result<PartialState<'a>, EngineError> {
        let step = state.step_count();
        let location = self.strategy.locate(&xi);
        let in_step = self.is_deposition_step(step);
        if !self.strategy.should_deposit(in_step, location) {
            if in_step {
                debug!(step, "CV value outside the grid, skipping deposition");
            }
            return Ok(PartialState::new(state, xi, location, None));
        }

        let index = state.deposition_count();
        if index >= self.capacity {
            return Err(EngineError::CapacityExceeded {
                capacity: self.capacity,
                attempted: index + 1,
            });
        }

        let bias_each_cv = self.strategy.bias_each_cv(state, &xi, location);
        let height = self.next_height(&bias_each_cv);
        if height.iter().any(|h| !h.is_finite()) {
            return Err(EngineError::NonFinite {
                quantity: "gaussian height",
                step,
            });
        }
        debug!(step, index, height = ?height.as_slice(), "Depositing Gaussian");

        let pending = Deposition {
            index,
            height,
            center: xi.clone(),
        };
        Ok(PartialState::new(state, xi, location, Some(pending)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cv::{Component, Distance};
    use crate::engine::config::ParallelBiasConfigBuilder;
    use crate::engine::strategy::select;

    fn config(ncvs: usize, stride: u64, ngaussians: usize) -> ParallelBiasConfig {
        let mut builder = ParallelBiasConfigBuilder::new();
        for k in 0..ncvs {
            builder = builder.cv(Arc::new(Component::new(0, k % 3)));
        }
        builder
            .height(vec![1.5])
            .sigma(vec![0.5; ncvs])
            .stride(stride)
            .ngaussians(ngaussians)
            .temperature(300.0)
            .delta_t(1200.0)
            .build()
            .unwrap()
    }

    fn depositor(config: &ParallelBiasConfig) -> GaussianDepositor {
        GaussianDepositor::new(config, select(config))
    }

    fn fresh_state(config: &ParallelBiasConfig) -> BiasState {
        BiasState::new(
            1,
            DVector::zeros(config.ndim()),
            config.ngaussians(),
            config.sigma().clone(),
            config.grid(),
        )
    }

    #[test]
    fn deposition_steps_follow_stride() {
        let config = config(1, 10, 5);
        let depositor = depositor(&config);
        let steps: Vec<u64> = (0..41).filter(|&s| depositor.is_deposition_step(s)).collect();
        assert_eq!(steps, vec![10, 20, 30, 40]);
    }

    #[test]
    fn deposition_count_matches_closed_form() {
        for stride in [1, 3, 7, 10] {
            let config = config(1, stride, 5);
            let depositor = depositor(&config);
            for n in 1..60u64 {
                let count = (0..n).filter(|&s| depositor.is_deposition_step(s)).count() as u64;
                assert_eq!(count, (n - 1) / stride, "stride {stride}, {n} steps");
            }
        }
    }

    #[test]
    fn fresh_weights_split_height_evenly() {
        for ncvs in 1..=4 {
            let config = config(ncvs, 1, 5);
            let height = depositor(&config).next_height(&DVector::zeros(ncvs));
            assert!((height.sum() - 1.5).abs() < 1e-12);
            for w in height.iter() {
                assert!((w - 1.5 / ncvs as f64).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn more_biased_cv_receives_smaller_weight() {
        let config = config(2, 1, 5);
        let height = depositor(&config).next_height(&DVector::from_vec(vec![0.0, 2.0]));
        assert!(height[0] > height[1]);
    }

    #[test]
    fn non_deposition_step_stages_nothing() {
        let config = config(1, 10, 5);
        let state = fresh_state(&config);
        let partial = depositor(&config)
            .propose(&state, DVector::from_element(1, 0.3))
            .unwrap();
        assert!(partial.pending().is_none());
        assert_eq!(partial.deposition_count(), 0);
    }

    #[test]
    fn full_state_rejects_further_deposition() {
        let config = ParallelBiasConfigBuilder::new()
            .cv(Arc::new(Distance::new(0, 1)))
            .height(vec![1.0])
            .sigma(vec![0.5])
            .stride(1)
            .ngaussians(1)
            .temperature(300.0)
            .delta_t(1200.0)
            .build()
            .unwrap();
        let depositor = depositor(&config);
        let mut state = fresh_state(&config);
        let forces = DVector::zeros(3);
        // step 0 never deposits; step 1 fills the only slot
        state.commit(DVector::zeros(1), None, &forces);
        let partial = depositor.propose(&state, DVector::zeros(1)).unwrap();
        let (xi, pending) = partial.into_parts();
        state.commit(xi, pending.as_ref(), &forces);
        assert_eq!(state.deposition_count(), 1);

        let err = depositor.propose(&state, DVector::zeros(1)).unwrap_err();
        assert!(matches!(
            err,
            EngineError::CapacityExceeded {
                capacity: 1,
                attempted: 2
            }
        ));
    }
}
