use super::BackendKind;
use crate::engine::error::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Unsupported simulation context '{origin}': supported backends are ({supported})")]
    Unsupported { origin: String, supported: String },

    #[error("No adapter registered for backend '{0}'")]
    MissingAdapter(BackendKind),

    #[error("Adapter for backend '{backend}' did not provide a {missing} capability")]
    IncompleteBinding {
        backend: BackendKind,
        missing: &'static str,
    },

    #[error("Snapshot from backend '{backend}' lacks the required field '{field}'")]
    MissingField {
        backend: BackendKind,
        field: &'static str,
    },

    #[error("Host simulation error: {0}")]
    Host(String),

    #[error("Scoped session error for backend '{backend}': {reason}")]
    Session { backend: BackendKind, reason: String },

    #[error(transparent)]
    Engine(#[from] EngineError),
}
