//! Runtime error types.

use slipway_core::SlipwayError;
use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors surfaced by a container runtime or scanner.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("runtime unavailable: {0}")]
    Unavailable(String),

    #[error("instance not found: {0}")]
    NotFound(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("operation failed: {0}")]
    Failed(String),
}

impl RuntimeError {
    /// Attach the orchestration stage the call belonged to.
    pub fn during(self, stage: &str) -> SlipwayError {
        SlipwayError::Runtime {
            stage: stage.to_string(),
            message: self.to_string(),
        }
    }
}

impl From<RuntimeError> for SlipwayError {
    fn from(err: RuntimeError) -> Self {
        err.during("runtime")
    }
}
