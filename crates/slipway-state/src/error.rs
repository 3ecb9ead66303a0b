//! Error types for the state store.

use slipway_core::SlipwayError;
use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state lock poisoned: {0}")]
    Poisoned(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("record is terminal and cannot be modified: {0}")]
    Immutable(String),
}

impl From<StateError> for SlipwayError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotFound(what) => SlipwayError::NotFound(what),
            other => SlipwayError::State(other.to_string()),
        }
    }
}
