//! This module contains errors reported by the constraint solvers.

use std::time::Duration;

use thiserror::Error;

use crate::error::container;

/// Errors that occur while answering a query.
///
/// A solver never returns a guessed answer; when it cannot decide a query it
/// returns one of these errors, and the state that issued the query is
/// terminated.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("The query did not finish within {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("The query could not be decided: {reason}")]
    Incomplete { reason: String },

    #[error("The constraint set has no satisfying assignment")]
    Unsatisfiable,

    #[error("Expressions of width {width} bits cannot be solved for")]
    UnsupportedWidth { width: u32 },
}

impl Error {
    /// Constructs an [`Error::Incomplete`] with the provided `reason`.
    pub fn incomplete(reason: impl Into<String>) -> Self {
        Self::Incomplete {
            reason: reason.into(),
        }
    }
}

/// A solver error with an associated instruction location.
pub type LocatedError = container::Located<Error>;

/// The result type for solver queries.
pub type Result<T> = std::result::Result<T, Error>;

/// Make it possible to attach locations to these errors.
impl container::Locatable for Error {
    type Located = LocatedError;

    fn locate(self, instruction: crate::program::InstructionId) -> Self::Located {
        container::Located {
            location: instruction,
            payload:  self,
        }
    }
}
