//! This module contains errors raised when ingesting the seeds that replay
//! known inputs.

use thiserror::Error;

/// Errors in the seeds handed to the engine.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("The seed could not be parsed: {message}")]
    Malformed { message: String },

    #[error("Seed {id:?} has no objects")]
    EmptySeed { id: String },

    #[error("Seed {id:?} names the object {name:?} more than once")]
    DuplicateObject { id: String, name: String },
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        let message = value.to_string();
        Self::Malformed { message }
    }
}

/// The result type for seed handling.
pub type Result<T> = std::result::Result<T, Error>;
