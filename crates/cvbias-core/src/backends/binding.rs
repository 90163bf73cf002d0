use super::adapters::{AdapterRegistry, BackendAdapter, BindingSlots, SnapshotView, StepRunner};
use super::context::SimulationContext;
use super::error::BackendError;
use super::{BackendKind, classify};
use crate::core::models::snapshot::Snapshot;
use crate::engine::driver::{DriverPhase, SamplingMethodDriver};
use crate::engine::error::EngineError;
use crate::engine::progress::{Progress, ProgressCallback, ProgressReporter};
use crate::engine::state::BiasState;
use std::sync::Arc;
use tracing::info;

/// A sampling method bound to a host simulation context.
///
/// Construction classifies the context, lets the matching adapter fill the view and run
/// capabilities and initializes the driver from the first snapshot.
pub struct ContextWrapper<'a, C: SimulationContext> {
    context: C,
    kind: BackendKind,
    adapter: Arc<dyn BackendAdapter>,
    driver: SamplingMethodDriver,
    view: Box<dyn SnapshotView>,
    runner: Box<dyn StepRunner>,
    reporter: ProgressReporter<'a>,
}

impl<'a, C: SimulationContext> ContextWrapper<'a, C> {
    pub fn bind(
        mut context: C,
        mut driver: SamplingMethodDriver,
        registry: &AdapterRegistry,
        callback: Option<ProgressCallback<'a>>,
    ) -> Result<Self, BackendError> {
        let kind = classify(context.origin())?;
        let adapter = registry
            .get(kind)
            .ok_or(BackendError::MissingAdapter(kind))?;

        let mut slots = BindingSlots::default();
        adapter.bind(&mut slots, driver.snapshot_flags())?;
        let view = slots.view.ok_or(BackendError::IncompleteBinding {
            backend: kind,
            missing: "view",
        })?;
        let runner = slots.run.ok_or(BackendError::IncompleteBinding {
            backend: kind,
            missing: "run",
        })?;

        match driver.phase() {
            DriverPhase::Uninitialized => {
                let snapshot = view.snapshot(&mut context)?;
                driver.initialize(&snapshot)?;
            }
            DriverPhase::Running => {}
            phase @ DriverPhase::Finalized => {
                return Err(EngineError::InvalidPhase {
                    action: "bind",
                    phase,
                }
                .into());
            }
        }
        info!(backend = %kind, origin = context.origin(), "Sampling method bound to context");

        Ok(Self {
            context,
            kind,
            adapter,
            driver,
            view,
            runner,
            reporter: callback.map(ProgressReporter::with_callback).unwrap_or_default(),
        })
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.kind
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn driver(&self) -> &SamplingMethodDriver {
        &self.driver
    }

    /// Current frame of the bound context.
    pub fn view(&mut self) -> Result<Snapshot, BackendError> {
        self.view.snapshot(&mut self.context)
    }

    pub fn synchronize(&mut self) -> Result<(), BackendError> {
        self.view.synchronize(&mut self.context)
    }

    /// Advances the host by `steps`, biasing every step.
    pub fn run(&mut self, steps: u64) -> Result<(), BackendError> {
        self.reporter.report(Progress::RunStart { total_steps: steps });
        if let Some(state) = self.driver.state().filter(|state| state.step_count() > 0) {
            self.reporter.report(Progress::Message(format!(
                "Continuing from step {} with {}/{} Gaussians deposited",
                state.step_count(),
                state.deposition_count(),
                state.capacity()
            )));
        }
        self.runner.run(
            &mut self.context,
            self.view.as_ref(),
            &mut self.driver,
            steps,
            &self.reporter,
        )?;
        self.reporter.report(Progress::RunFinish);
        Ok(())
    }

    /// Enters the host's scoped session, if the engine has one.
    pub fn enter(&mut self) -> Result<(), BackendError> {
        if self.adapter.requires_scoped_session() {
            self.context.enter()?;
        }
        Ok(())
    }

    pub fn exit(&mut self) -> Result<(), BackendError> {
        if self.adapter.requires_scoped_session() {
            self.context.exit()?;
        }
        Ok(())
    }

    /// Runs `action` between [`enter`](Self::enter) and [`exit`](Self::exit). The session
    /// is exited even when `action` fails; the first error wins.
    pub fn session<F, R>(&mut self, action: F) -> Result<R, BackendError>
    where
        F: FnOnce(&mut Self) -> Result<R, BackendError>,
    {
        self.enter()?;
        let result = action(self);
        let exited = self.exit();
        let value = result?;
        exited?;
        Ok(value)
    }

    /// Finalizes the driver and releases the context together with the final state.
    pub fn finish(mut self) -> (C, Option<BiasState>) {
        self.driver.finalize();
        (self.context, self.driver.into_state())
    }
}
