use super::config::ConfigError;
use super::driver::DriverPhase;
use crate::core::cv::CvError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid method configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Collective variable evaluation failed: {0}")]
    Cv(#[from] CvError),

    #[error(
        "Gaussian capacity exceeded: deposition #{attempted} requested but ngaussians = {capacity}; increase ngaussians for this run length"
    )]
    CapacityExceeded { capacity: usize, attempted: usize },

    #[error("Non-finite {quantity} encountered at step {step}")]
    NonFinite { quantity: &'static str, step: u64 },

    #[error("Dimension mismatch for {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Saved grid cache was built for a different grid along dimension {dim}")]
    GridMismatch { dim: usize },

    #[error("Snapshot does not provide the required field '{0}'")]
    MissingSnapshotField(&'static str),

    #[error("Cannot {action} while the driver is {phase:?}")]
    InvalidPhase {
        action: &'static str,
        phase: DriverPhase,
    },
}

pub(crate) fn check_len(what: &'static str, expected: usize, found: usize) -> Result<(), EngineError> {
    if expected == found {
        Ok(())
    } else {
        Err(EngineError::DimensionMismatch {
            what,
            expected,
            found,
        })
    }
}
