//! Evaluation strategies of the bias engine.
//!
//! A strategy is selected once per method from its configuration: [`Exact`] sums over
//! every deposited Gaussian, [`GridAccelerated`] reads the grid cache and skips steps
//! whose CV value falls outside the grid.

use super::config::ParallelBiasConfig;
use super::state::{BiasState, Deposition, GridCache, PartialState};
use crate::core::grid::{Grid, GridLocation};
use crate::core::potentials::{
    add_gaussian, parallel_bias, parallel_bias_gradient, switching_probabilities,
};
use nalgebra::DVector;
use std::fmt::Debug;
use std::sync::Arc;

pub trait BiasStrategy: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Grid cell of `xi`, or `None` if the strategy does not use a grid.
    fn locate(&self, xi: &DVector<f64>) -> Option<GridLocation>;

    /// Whether a Gaussian is deposited given the stride predicate and the grid location.
    fn should_deposit(&self, in_deposition_step: bool, location: Option<GridLocation>) -> bool;

    /// Grid backing the cached bias, if any.
    fn grid(&self) -> Option<&Grid>;

    /// Running bias along each CV at `xi`, before this step's deposition.
    fn bias_each_cv(
        &self,
        state: &BiasState,
        xi: &DVector<f64>,
        location: Option<GridLocation>,
    ) -> DVector<f64>;

    /// Total bias potential seen by the step.
    fn potential(&self, partial: &PartialState) -> f64;

    /// Gradient of the total bias w.r.t. `xi` seen by the step.
    fn gradient(&self, partial: &PartialState) -> DVector<f64>;

    /// Folds a committed deposition into any cached representation of the bias.
    fn accumulate(&self, state: &mut BiasState, deposition: &Deposition);
}

pub fn select(config: &ParallelBiasConfig) -> Arc<dyn BiasStrategy> {
    let periods = config.periods();
    let beta = config.beta();
    match config.grid() {
        Some(grid) => Arc::new(GridAccelerated {
            grid: grid.clone(),
            periods,
            beta,
        }),
        None => Arc::new(Exact { periods, beta }),
    }
}

#[derive(Debug, Clone)]
pub struct Exact {
    periods: DVector<f64>,
    beta: f64,
}

impl Exact {
    pub fn new(periods: DVector<f64>, beta: f64) -> Self {
        Self { periods, beta }
    }
}

impl BiasStrategy for Exact {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn locate(&self, _xi: &DVector<f64>) -> Option<GridLocation> {
        None
    }

    fn should_deposit(&self, in_deposition_step: bool, _location: Option<GridLocation>) -> bool {
        in_deposition_step
    }

    fn grid(&self) -> Option<&Grid> {
        None
    }

    fn bias_each_cv(
        &self,
        state: &BiasState,
        xi: &DVector<f64>,
        _location: Option<GridLocation>,
    ) -> DVector<f64> {
        state.gaussians(&self.periods).bias_each_cv(xi)
    }

    fn potential(&self, partial: &PartialState) -> f64 {
        let (bias, _) = partial.bias_each_cv_with_gradient(&self.periods);
        parallel_bias(&bias, self.beta)
    }

    fn gradient(&self, partial: &PartialState) -> DVector<f64> {
        let (bias, slope) = partial.bias_each_cv_with_gradient(&self.periods);
        parallel_bias_gradient(&bias, &slope, self.beta)
    }

    fn accumulate(&self, _state: &mut BiasState, _deposition: &Deposition) {}
}

#[derive(Debug, Clone)]
pub struct GridAccelerated {
    grid: Grid,
    periods: DVector<f64>,
    beta: f64,
}

impl GridAccelerated {
    pub fn new(grid: Grid, periods: DVector<f64>, beta: f64) -> Self {
        Self {
            grid,
            periods,
            beta,
        }
    }

    /// Per-CV bias at a cell center, including a not yet committed deposition.
    fn cell_bias(
        &self,
        cache: &GridCache,
        cell: usize,
        pending: Option<&Deposition>,
        sigmas: &DVector<f64>,
    ) -> (DVector<f64>, DVector<f64>) {
        let (mut bias, mut slope) = cache.cell_bias_each_cv(&self.grid, cell);
        if let Some(pending) = pending {
            add_gaussian(
                &mut bias,
                &mut slope,
                &self.grid.cell_center(cell),
                &pending.height,
                &pending.center,
                sigmas,
                &self.periods,
            );
        }
        (bias, slope)
    }
}

impl BiasStrategy for GridAccelerated {
    fn name(&self) -> &'static str {
        "grid-accelerated"
    }

    fn locate(&self, xi: &DVector<f64>) -> Option<GridLocation> {
        Some(self.grid.locate(xi.as_slice()))
    }

    fn should_deposit(&self, in_deposition_step: bool, location: Option<GridLocation>) -> bool {
        in_deposition_step && location.is_some_and(|l| l.is_inside())
    }

    fn grid(&self) -> Option<&Grid> {
        Some(&self.grid)
    }

    fn bias_each_cv(
        &self,
        state: &BiasState,
        xi: &DVector<f64>,
        location: Option<GridLocation>,
    ) -> DVector<f64> {
        match (state.grid_cache(), location.and_then(|l| l.cell())) {
            (Some(cache), Some(cell)) => cache.cell_bias_each_cv(&self.grid, cell).0,
            _ => DVector::zeros(xi.len()),
        }
    }

    fn potential(&self, partial: &PartialState) -> f64 {
        let state = partial.state();
        let cell = partial.location().and_then(|l| l.cell());
        let (Some(cache), Some(cell)) = (state.grid_cache(), cell) else {
            return 0.0;
        };
        match partial.pending() {
            None => cache.potential()[cell],
            Some(pending) => {
                let (bias, _) = self.cell_bias(cache, cell, Some(pending), state.sigmas());
                parallel_bias(&bias, self.beta)
            }
        }
    }

    fn gradient(&self, partial: &PartialState) -> DVector<f64> {
        let state = partial.state();
        let cell = partial.location().and_then(|l| l.cell());
        let (Some(cache), Some(cell)) = (state.grid_cache(), cell) else {
            return DVector::zeros(partial.xi().len());
        };
        match partial.pending() {
            None => cache.gradient().column(cell).into_owned(),
            Some(pending) => {
                let (bias, slope) = self.cell_bias(cache, cell, Some(pending), state.sigmas());
                switching_probabilities(&bias, self.beta).component_mul(&slope)
            }
        }
    }

    fn accumulate(&self, state: &mut BiasState, deposition: &Deposition) {
        let sigmas = state.sigmas().clone();
        if let Some(cache) = state.grid_cache_mut() {
            cache.accumulate(&self.grid, deposition, &sigmas, &self.periods, self.beta);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grid::GridDimension;

    fn state_with(grid: Option<&Grid>) -> BiasState {
        BiasState::new(
            1,
            DVector::zeros(1),
            4,
            DVector::from_element(1, 0.3),
            grid,
        )
    }

    #[test]
    fn exact_strategy_never_gates_deposition() {
        let exact = Exact::new(DVector::zeros(1), 1.0);
        assert_eq!(exact.locate(&DVector::from_element(1, 1e9)), None);
        assert!(exact.should_deposit(true, None));
        assert!(!exact.should_deposit(false, None));
        assert!(exact.grid().is_none());
    }

    #[test]
    fn grid_strategy_skips_out_of_bounds_deposition() {
        let grid = Grid::new(vec![GridDimension::new(-1.0, 1.0, 10)]).unwrap();
        let strategy = GridAccelerated::new(grid, DVector::zeros(1), 1.0);
        let inside = strategy.locate(&DVector::from_element(1, 0.0));
        let outside = strategy.locate(&DVector::from_element(1, 1.5));

        assert_eq!(outside, Some(GridLocation::OutOfBounds));
        assert!(strategy.should_deposit(true, inside));
        assert!(!strategy.should_deposit(true, outside));
        assert!(!strategy.should_deposit(false, inside));
    }

    #[test]
    fn grid_gradient_is_zero_out_of_bounds() {
        let grid = Grid::new(vec![GridDimension::new(-1.0, 1.0, 10)]).unwrap();
        let strategy = GridAccelerated::new(grid.clone(), DVector::zeros(1), 1.0);
        let mut state = state_with(Some(&grid));
        let deposition = Deposition {
            index: 0,
            height: DVector::from_element(1, 1.0),
            center: DVector::from_element(1, 0.9),
        };
        strategy.accumulate(&mut state, &deposition);

        let xi = DVector::from_element(1, 1.05);
        let partial = PartialState::new(&state, xi.clone(), strategy.locate(&xi), None);
        assert_eq!(strategy.gradient(&partial), DVector::zeros(1));
        assert_eq!(strategy.potential(&partial), 0.0);
    }

    #[test]
    fn pending_deposition_is_visible_to_both_paths() {
        let grid = Grid::new(vec![GridDimension::new(-1.0, 1.0, 2000)]).unwrap();
        let periods = DVector::zeros(1);
        let exact = Exact::new(periods.clone(), 1.0);
        let accelerated = GridAccelerated::new(grid.clone(), periods, 1.0);
        let state = state_with(Some(&grid));
        let xi = DVector::from_element(1, 0.2);
        let pending = Deposition {
            index: 0,
            height: DVector::from_element(1, 1.0),
            center: DVector::from_element(1, 0.0),
        };

        let exact_partial = PartialState::new(&state, xi.clone(), None, Some(pending.clone()));
        let grid_partial =
            PartialState::new(&state, xi.clone(), accelerated.locate(&xi), Some(pending));

        let exact_gradient = exact.gradient(&exact_partial);
        let grid_gradient = accelerated.gradient(&grid_partial);
        assert!(exact_gradient[0] < 0.0);
        assert!((exact_gradient[0] - grid_gradient[0]).abs() < 5e-3);
        assert!((exact.potential(&exact_partial) - accelerated.potential(&grid_partial)).abs() < 5e-3);
    }
}
