use super::config::ParallelBiasConfig;
use super::depositor::GaussianDepositor;
use super::error::{EngineError, check_len};
use super::evaluator::BiasGradientEvaluator;
use super::state::BiasState;
use super::strategy::{self, BiasStrategy};
use crate::core::models::snapshot::{Snapshot, SnapshotField};
use nalgebra::{DVector, Vector3};
use std::sync::Arc;
use tracing::{info, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverPhase {
    Uninitialized,
    Running,
    Finalized,
}

/// What a single [`SamplingMethodDriver::step`] produced.
#[derive(Debug, Clone, Copy)]
pub struct StepOutcome<'a> {
    /// Biasing force on every atom, in snapshot order.
    pub forces: &'a [Vector3<f64>],
    /// Index of the step that was just completed.
    pub step: u64,
    /// Slot of the Gaussian deposited during this step, if any.
    pub deposition: Option<usize>,
}

/// Per-replica state machine that turns snapshots into biasing forces.
///
/// `step` must be called serially; the driver owns its [`BiasState`] and mutates it in
/// place once per step.
#[derive(Debug)]
pub struct SamplingMethodDriver {
    config: ParallelBiasConfig,
    strategy: Arc<dyn BiasStrategy>,
    depositor: GaussianDepositor,
    evaluator: BiasGradientEvaluator,
    state: Option<BiasState>,
    phase: DriverPhase,
}

impl SamplingMethodDriver {
    pub fn new(config: ParallelBiasConfig) -> Self {
        let strategy = strategy::select(&config);
        Self {
            depositor: GaussianDepositor::new(&config, strategy.clone()),
            evaluator: BiasGradientEvaluator::new(strategy.clone()),
            strategy,
            config,
            state: None,
            phase: DriverPhase::Uninitialized,
        }
    }

    /// Continues a previous run from its saved state.
    pub fn resume(config: ParallelBiasConfig, state: BiasState) -> Result<Self, EngineError> {
        state.check_compatible(&config)?;
        let mut driver = Self::new(config);
        info!(
            steps = state.step_count(),
            depositions = state.deposition_count(),
            "Resuming sampling method from saved state"
        );
        driver.state = Some(state);
        driver.phase = DriverPhase::Running;
        Ok(driver)
    }

    pub fn config(&self) -> &ParallelBiasConfig {
        &self.config
    }

    pub fn phase(&self) -> DriverPhase {
        self.phase
    }

    pub fn snapshot_flags(&self) -> &'static [SnapshotField] {
        ParallelBiasConfig::SNAPSHOT_FLAGS
    }

    pub fn state(&self) -> Option<&BiasState> {
        self.state.as_ref()
    }

    pub fn into_state(self) -> Option<BiasState> {
        self.state
    }

    /// Allocates a zero-filled state sized from a first CV reading of `snapshot`.
    pub fn initialize(&mut self, snapshot: &Snapshot) -> Result<(), EngineError> {
        if self.phase != DriverPhase::Uninitialized {
            return Err(EngineError::InvalidPhase {
                action: "initialize",
                phase: self.phase,
            });
        }
        Self::check_fields(snapshot)?;

        let cv = self.config.cvs().evaluate(snapshot)?;
        check_len("CV dimension", self.config.ndim(), cv.dim())?;
        self.state = Some(BiasState::new(
            snapshot.natoms(),
            cv.xi,
            self.config.ngaussians(),
            self.config.sigma().clone(),
            self.config.grid(),
        ));
        self.phase = DriverPhase::Running;

        info!(
            strategy = self.strategy.name(),
            ncvs = self.config.ndim(),
            natoms = snapshot.natoms(),
            capacity = self.config.ngaussians(),
            "Sampling method initialized"
        );
        Ok(())
    }

    /// Advances the method by one host step and returns the biasing forces.
    pub fn step(&mut self, snapshot: &Snapshot) -> Result<StepOutcome<'_>, EngineError> {
        let state = match (self.phase, self.state.as_mut()) {
            (DriverPhase::Running, Some(state)) => state,
            (phase, _) => {
                return Err(EngineError::InvalidPhase {
                    action: "step",
                    phase,
                });
            }
        };
        Self::check_fields(snapshot)?;
        check_len("atom count", state.bias().len(), snapshot.natoms())?;

        let cv = self.config.cvs().evaluate(snapshot)?;
        check_len("CV dimension", state.ndim(), cv.dim())?;

        let partial = self.depositor.propose(state, cv.xi)?;
        let gradient = self.evaluator.gradient(&partial)?;
        let forces: DVector<f64> = -(cv.jacobian.transpose() * gradient);
        let step = partial.state().step_count();
        if forces.iter().any(|f| !f.is_finite()) {
            return Err(EngineError::NonFinite {
                quantity: "bias force",
                step,
            });
        }

        let (xi, pending) = partial.into_parts();
        if let Some(deposition) = &pending {
            self.strategy.accumulate(state, deposition);
        }
        state.commit(xi, pending.as_ref(), &forces);
        trace!(step, deposited = pending.is_some(), "Bias step completed");

        Ok(StepOutcome {
            forces: state.bias(),
            step,
            deposition: pending.map(|d| d.index),
        })
    }

    /// Stops accepting steps; the final state stays available.
    pub fn finalize(&mut self) {
        if self.phase == DriverPhase::Running {
            if let Some(state) = &self.state {
                info!(
                    steps = state.step_count(),
                    depositions = state.deposition_count(),
                    "Sampling method finalized"
                );
            }
        }
        self.phase = DriverPhase::Finalized;
    }

    fn check_fields(snapshot: &Snapshot) -> Result<(), EngineError> {
        match snapshot.missing_field(ParallelBiasConfig::SNAPSHOT_FLAGS) {
            Some(field) => Err(EngineError::MissingSnapshotField(field.name())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cv::{Component, Distance};
    use crate::core::grid::{Grid, GridDimension};
    use crate::engine::config::ParallelBiasConfigBuilder;
    use nalgebra::Point3;

    fn one_cv_config(ngaussians: usize, grid: Option<Grid>) -> ParallelBiasConfig {
        ParallelBiasConfigBuilder::new()
            .cv(Arc::new(Component::x(0)))
            .height(vec![1.0])
            .sigma(vec![0.5])
            .stride(10)
            .ngaussians(ngaussians)
            .temperature(300.0)
            .delta_t(1500.0)
            .grid(grid)
            .build()
            .unwrap()
    }

    fn snapshot_at(x: f64) -> Snapshot {
        Snapshot::new(vec![Point3::new(x, 0.0, 0.0)], 0.002)
    }

    #[test]
    fn forty_one_steps_deposit_four_gaussians() {
        let mut driver = SamplingMethodDriver::new(one_cv_config(5, None));
        driver.initialize(&snapshot_at(0.0)).unwrap();

        let mut deposited_at = Vec::new();
        for i in 0..41 {
            let outcome = driver.step(&snapshot_at(0.01 * i as f64)).unwrap();
            if outcome.deposition.is_some() {
                deposited_at.push(outcome.step);
            }
        }

        assert_eq!(deposited_at, vec![10, 20, 30, 40]);
        let state = driver.state().unwrap();
        assert_eq!(state.deposition_count(), 4);
        assert_eq!(state.step_count(), 41);
        assert!((state.centers()[(1, 0)] - 0.2).abs() < 1e-12);
    }

    #[test]
    fn exceeding_capacity_is_fatal() {
        let mut driver = SamplingMethodDriver::new(one_cv_config(2, None));
        driver.initialize(&snapshot_at(0.0)).unwrap();
        for _ in 0..30 {
            driver.step(&snapshot_at(0.0)).unwrap();
        }
        let err = driver.step(&snapshot_at(0.0)).unwrap_err();
        assert!(matches!(
            err,
            EngineError::CapacityExceeded {
                capacity: 2,
                attempted: 3
            }
        ));
        assert_eq!(driver.state().unwrap().deposition_count(), 2);
    }

    #[test]
    fn bias_force_pushes_away_from_deposited_hill() {
        let mut driver = SamplingMethodDriver::new(one_cv_config(5, None));
        driver.initialize(&snapshot_at(0.0)).unwrap();
        for _ in 0..11 {
            driver.step(&snapshot_at(0.0)).unwrap();
        }
        let outcome = driver.step(&snapshot_at(0.2)).unwrap();
        assert!(outcome.forces[0].x > 0.0);
        assert_eq!(outcome.forces[0].y, 0.0);
    }

    #[test]
    fn grid_path_skips_deposition_outside_bounds() {
        let grid = Grid::new(vec![GridDimension::new(-1.0, 1.0, 100)]).unwrap();
        let mut driver = SamplingMethodDriver::new(one_cv_config(5, Some(grid)));
        driver.initialize(&snapshot_at(0.0)).unwrap();
        for _ in 0..10 {
            driver.step(&snapshot_at(0.0)).unwrap();
        }
        let outcome = driver.step(&snapshot_at(1.5)).unwrap();
        assert_eq!(outcome.step, 10);
        assert_eq!(outcome.deposition, None);
        assert_eq!(outcome.forces[0], Vector3::zeros());
        assert_eq!(driver.state().unwrap().deposition_count(), 0);
    }

    #[test]
    fn grid_and_exact_drivers_produce_similar_forces() {
        let grid = Grid::new(vec![GridDimension::new(-2.0, 2.0, 4000)]).unwrap();
        let mut exact = SamplingMethodDriver::new(one_cv_config(5, None));
        let mut accelerated = SamplingMethodDriver::new(one_cv_config(5, Some(grid)));
        for driver in [&mut exact, &mut accelerated] {
            driver.initialize(&snapshot_at(0.0)).unwrap();
        }

        for i in 0..25 {
            let snapshot = snapshot_at(0.3 * ((i as f64) * 0.7).sin());
            let reference = exact.step(&snapshot).unwrap().forces[0];
            let approximate = accelerated.step(&snapshot).unwrap().forces[0];
            assert!((reference - approximate).norm() < 1e-2, "step {i}");
        }
    }

    #[test]
    fn step_before_initialize_is_rejected() {
        let mut driver = SamplingMethodDriver::new(one_cv_config(5, None));
        let err = driver.step(&snapshot_at(0.0)).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidPhase {
                phase: DriverPhase::Uninitialized,
                ..
            }
        ));
    }

    #[test]
    fn finalized_driver_keeps_state_but_refuses_steps() {
        let mut driver = SamplingMethodDriver::new(one_cv_config(5, None));
        driver.initialize(&snapshot_at(0.0)).unwrap();
        driver.step(&snapshot_at(0.0)).unwrap();
        driver.finalize();

        assert_eq!(driver.phase(), DriverPhase::Finalized);
        assert!(driver.step(&snapshot_at(0.0)).is_err());
        assert_eq!(driver.into_state().unwrap().step_count(), 1);
    }

    #[test]
    fn degenerate_cv_propagates_as_error() {
        let config = ParallelBiasConfigBuilder::new()
            .cv(Arc::new(Distance::new(0, 1)))
            .height(vec![1.0])
            .sigma(vec![0.5])
            .stride(1)
            .ngaussians(4)
            .temperature(300.0)
            .delta_t(1500.0)
            .build()
            .unwrap();
        let mut driver = SamplingMethodDriver::new(config);
        let snapshot = Snapshot::new(vec![Point3::origin()], 0.002);
        assert!(matches!(
            driver.initialize(&snapshot),
            Err(EngineError::Cv(_))
        ));
    }

    #[test]
    fn resume_continues_from_saved_counters() {
        let mut driver = SamplingMethodDriver::new(one_cv_config(5, None));
        driver.initialize(&snapshot_at(0.0)).unwrap();
        for _ in 0..15 {
            driver.step(&snapshot_at(0.1)).unwrap();
        }
        let saved = driver.into_state().unwrap();

        let mut resumed = SamplingMethodDriver::resume(one_cv_config(5, None), saved).unwrap();
        let outcome = (0..6)
            .map(|_| resumed.step(&snapshot_at(0.1)).unwrap().deposition)
            .collect::<Vec<_>>();
        assert_eq!(outcome[5], Some(1));
        assert_eq!(resumed.state().unwrap().step_count(), 21);
    }

    #[test]
    fn resume_rejects_mismatched_capacity() {
        let state = BiasState::new(1, DVector::zeros(1), 3, DVector::from_element(1, 0.5), None);
        assert!(matches!(
            SamplingMethodDriver::resume(one_cv_config(5, None), state),
            Err(EngineError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn resume_rejects_state_saved_on_a_different_grid() {
        let coarse = Grid::new(vec![GridDimension::new(-1.0, 1.0, 10)]).unwrap();
        let mut driver = SamplingMethodDriver::new(one_cv_config(5, Some(coarse)));
        driver.initialize(&snapshot_at(0.0)).unwrap();
        for _ in 0..3 {
            driver.step(&snapshot_at(0.5)).unwrap();
        }
        let saved = driver.into_state().unwrap();

        let fine = Grid::new(vec![GridDimension::new(-1.0, 1.0, 100)]).unwrap();
        let err = SamplingMethodDriver::resume(one_cv_config(5, Some(fine)), saved).unwrap_err();
        assert!(matches!(
            err,
            EngineError::DimensionMismatch {
                what: "grid cache bins",
                expected: 100,
                found: 10
            }
        ));
    }

    #[test]
    fn resume_rejects_grid_cache_when_config_has_no_grid() {
        let grid = Grid::new(vec![GridDimension::new(-1.0, 1.0, 10)]).unwrap();
        let state = BiasState::new(
            1,
            DVector::zeros(1),
            5,
            DVector::from_element(1, 0.5),
            Some(&grid),
        );
        assert!(matches!(
            SamplingMethodDriver::resume(one_cv_config(5, None), state),
            Err(EngineError::DimensionMismatch {
                what: "grid cache",
                ..
            })
        ));
    }
}
