use thiserror::Error;

use crate::objects::ObjectUrl;
use crate::state::{Generation, StateKind};

/// Failures surfaced by the session. Each one is converted into a state
/// transition plus a human readable message before it reaches the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Please select a valid PDF file.")]
    InvalidFileType { name: String, content_type: String },

    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: StateKind,
    },

    #[error("compression engine could not be started: {0}")]
    EngineInvocation(String),

    #[error("compressed result could not be retrieved: {0}")]
    ResultFetch(String),

    /// Never shown to the user; the callback is dropped.
    #[error("discarded callback from abandoned compression {0}")]
    StaleCallback(Generation),
}

/// Synchronous rejection by a compression engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("input {0} is not a live object")]
    MissingInput(ObjectUrl),

    #[error("input is not a PDF document")]
    NotPdf,

    #[error("engine unavailable: {0}")]
    Unavailable(String),
}

impl From<EngineError> for SessionError {
    fn from(err: EngineError) -> Self {
        SessionError::EngineInvocation(err.to_string())
    }
}
