//! This module contains errors raised when ingesting target specifications.

use thiserror::Error;

/// Errors in the target specifications handed to the engine.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("The target specification could not be parsed: {message}")]
    Malformed { message: String },

    #[error("Trace {id:?} has no locations")]
    EmptyTrace { id: String },

    #[error("Trace {id:?} names no error kinds")]
    NoErrorKinds { id: String },
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        let message = value.to_string();
        Self::Malformed { message }
    }
}

/// The result type for target specification handling.
pub type Result<T> = std::result::Result<T, Error>;
