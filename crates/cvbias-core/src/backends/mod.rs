//! # Backends Module
//!
//! Binds a [`SamplingMethodDriver`](crate::engine::driver::SamplingMethodDriver) to a host
//! simulation engine.
//!
//! A context is classified by its declared origin (never by inspecting its contents) into
//! one of a closed set of engines. The matching [`BackendAdapter`] then fills the view and
//! run capabilities of a [`ContextWrapper`], which is the only surface callers interact
//! with afterwards.

pub mod adapters;
pub mod binding;
pub mod context;
pub mod error;

pub use adapters::{AdapterRegistry, BackendAdapter, BindingSlots, SnapshotView, StepRunner};
pub use binding::ContextWrapper;
pub use context::{JaxMdContext, SimulationContext};
pub use error::BackendError;

use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of supported simulation engines, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    Ase,
    Hoomd,
    JaxMd,
    OpenMm,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Ase,
        BackendKind::Hoomd,
        BackendKind::JaxMd,
        BackendKind::OpenMm,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Ase => "ase",
            BackendKind::Hoomd => "hoomd",
            BackendKind::JaxMd => "jax-md",
            BackendKind::OpenMm => "openmm",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn supported_backends() -> [&'static str; 4] {
    BackendKind::ALL.map(|kind| kind.name())
}

/// Identifies the engine owning a context from its origin module path.
pub fn classify(origin: &str) -> Result<BackendKind, BackendError> {
    let kind = if origin.starts_with("ase.md") {
        Some(BackendKind::Ase)
    } else if origin.starts_with("hoomd") {
        Some(BackendKind::Hoomd)
    } else if origin.starts_with("jax_md") {
        Some(BackendKind::JaxMd)
    } else if origin.starts_with("simtk.openmm") || origin.starts_with("openmm") {
        Some(BackendKind::OpenMm)
    } else {
        None
    };
    kind.ok_or_else(|| BackendError::Unsupported {
        origin: origin.to_string(),
        supported: supported_backends().join(", "),
    })
}
