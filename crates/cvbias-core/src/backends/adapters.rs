use super::BackendKind;
use super::context::SimulationContext;
use super::error::BackendError;
use crate::core::models::snapshot::{Snapshot, SnapshotField};
use crate::engine::driver::SamplingMethodDriver;
use crate::engine::progress::{Progress, ProgressReporter};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::trace;

/// Read access to the live frame of a bound context.
pub trait SnapshotView: Debug + Send {
    fn snapshot(&self, context: &mut dyn SimulationContext) -> Result<Snapshot, BackendError>;

    fn synchronize(&self, context: &mut dyn SimulationContext) -> Result<(), BackendError> {
        context.synchronize()
    }
}

/// Advances a bound context, calling the driver exactly once per engine step.
pub trait StepRunner: Debug + Send {
    fn run(
        &mut self,
        context: &mut dyn SimulationContext,
        view: &dyn SnapshotView,
        driver: &mut SamplingMethodDriver,
        steps: u64,
        reporter: &ProgressReporter,
    ) -> Result<(), BackendError>;
}

/// Capabilities an adapter must fill during [`BackendAdapter::bind`].
#[derive(Debug, Default)]
pub struct BindingSlots {
    pub view: Option<Box<dyn SnapshotView>>,
    pub run: Option<Box<dyn StepRunner>>,
}

pub trait BackendAdapter: Debug + Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Whether the host context must be entered/exited around the whole session.
    fn requires_scoped_session(&self) -> bool {
        false
    }

    /// Fills `slots` with the view and run capabilities for a method requiring `fields`.
    fn bind(&self, slots: &mut BindingSlots, fields: &[SnapshotField]) -> Result<(), BackendError>;
}

/// View over an engine that exposes its frame through the context.
#[derive(Debug, Clone)]
pub struct HostView {
    backend: BackendKind,
    /// Engines keeping their state on a device must be synchronized before every read.
    sync_on_read: bool,
    required: Vec<SnapshotField>,
}

impl HostView {
    pub fn new(backend: BackendKind, sync_on_read: bool, required: &[SnapshotField]) -> Self {
        Self {
            backend,
            sync_on_read,
            required: required.to_vec(),
        }
    }
}

impl SnapshotView for HostView {
    fn snapshot(&self, context: &mut dyn SimulationContext) -> Result<Snapshot, BackendError> {
        if self.sync_on_read {
            context.synchronize()?;
        }
        let snapshot = context.snapshot()?;
        match snapshot.missing_field(&self.required) {
            Some(field) => Err(BackendError::MissingField {
                backend: self.backend,
                field: field.name(),
            }),
            None => Ok(snapshot),
        }
    }
}

/// Runner that injects the bias as an additional force at every host step.
#[derive(Debug, Clone)]
pub struct ForceHookRunner {
    backend: BackendKind,
}

impl ForceHookRunner {
    pub fn new(backend: BackendKind) -> Self {
        Self { backend }
    }
}

impl StepRunner for ForceHookRunner {
    fn run(
        &mut self,
        context: &mut dyn SimulationContext,
        view: &dyn SnapshotView,
        driver: &mut SamplingMethodDriver,
        steps: u64,
        reporter: &ProgressReporter,
    ) -> Result<(), BackendError> {
        for _ in 0..steps {
            let snapshot = view.snapshot(context)?;
            let outcome = driver.step(&snapshot)?;
            context.advance(outcome.forces)?;

            if let Some(index) = outcome.deposition {
                reporter.report(Progress::GaussianDeposited {
                    index,
                    step: outcome.step,
                });
            }
            reporter.report(Progress::StepCompleted { step: outcome.step });
            trace!(backend = %self.backend, step = outcome.step, "Host step advanced");
        }
        Ok(())
    }
}

fn bind_host(
    slots: &mut BindingSlots,
    backend: BackendKind,
    sync_on_read: bool,
    fields: &[SnapshotField],
) {
    slots.view = Some(Box::new(HostView::new(backend, sync_on_read, fields)));
    slots.run = Some(Box::new(ForceHookRunner::new(backend)));
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AseAdapter;

impl BackendAdapter for AseAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Ase
    }

    fn bind(&self, slots: &mut BindingSlots, fields: &[SnapshotField]) -> Result<(), BackendError> {
        bind_host(slots, self.kind(), false, fields);
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HoomdAdapter;

impl BackendAdapter for HoomdAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Hoomd
    }

    fn requires_scoped_session(&self) -> bool {
        true
    }

    fn bind(&self, slots: &mut BindingSlots, fields: &[SnapshotField]) -> Result<(), BackendError> {
        bind_host(slots, self.kind(), true, fields);
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JaxMdAdapter;

impl BackendAdapter for JaxMdAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::JaxMd
    }

    fn bind(&self, slots: &mut BindingSlots, fields: &[SnapshotField]) -> Result<(), BackendError> {
        bind_host(slots, self.kind(), false, fields);
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OpenMmAdapter;

impl BackendAdapter for OpenMmAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::OpenMm
    }

    fn bind(&self, slots: &mut BindingSlots, fields: &[SnapshotField]) -> Result<(), BackendError> {
        bind_host(slots, self.kind(), true, fields);
        Ok(())
    }
}

/// Adapters keyed by the engine they serve.
#[derive(Debug, Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<BackendKind, Arc<dyn BackendAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in adapter of every supported engine.
    pub fn standard() -> Self {
        Self::new()
            .with(Arc::new(AseAdapter))
            .with(Arc::new(HoomdAdapter))
            .with(Arc::new(JaxMdAdapter))
            .with(Arc::new(OpenMmAdapter))
    }

    /// Adds `adapter`, replacing any adapter previously registered for its engine.
    pub fn with(mut self, adapter: Arc<dyn BackendAdapter>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    pub fn get(&self, kind: BackendKind) -> Option<Arc<dyn BackendAdapter>> {
        self.adapters.get(&kind).cloned()
    }
}
