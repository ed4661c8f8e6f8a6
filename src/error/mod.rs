//! This module contains the error type returned from the library's interface,
//! along with the errors of each subsystem that it wraps.

pub mod container;
pub mod execution;
pub mod memory;
pub mod program;
pub mod seed;
pub mod solver;
pub mod target;

use thiserror::Error;

use crate::{error::container::Locatable, program::InstructionId};

/// The result type of the library's interface.
///
/// Subsystems return their own, narrower error types, which are lifted into
/// this one at the boundary.
pub type Result<T> = std::result::Result<T, Errors>;

/// Any error that a client of the library can observe.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Execution(#[from] execution::Error),

    #[error(transparent)]
    Memory(#[from] memory::Error),

    #[error(transparent)]
    Program(#[from] program::Error),

    #[error(transparent)]
    Seed(#[from] seed::Error),

    #[error(transparent)]
    Solver(#[from] solver::Error),

    #[error(transparent)]
    Target(#[from] target::Error),
}

/// An interface error along with the instruction it occurred at.
pub type LocatedError = container::Located<Error>;

/// The interface errors of a failed call.
pub type Errors = container::Errors<Error>;

impl Locatable for Error {
    type Located = LocatedError;

    fn locate(self, instruction: InstructionId) -> Self::Located {
        container::Located {
            location: instruction,
            payload:  self,
        }
    }
}

impl From<execution::LocatedError> for Errors {
    fn from(value: execution::LocatedError) -> Self {
        execution::Errors::from(value).widen()
    }
}

/// Structural errors in the program have no instruction of their own, and
/// are reported at the first one.
impl From<program::Error> for Errors {
    fn from(value: program::Error) -> Self {
        Error::from(value).locate(InstructionId(0)).into()
    }
}

/// Trace errors are not tied to an instruction either.
impl From<target::Error> for Errors {
    fn from(value: target::Error) -> Self {
        Error::from(value).locate(InstructionId(0)).into()
    }
}

/// Nor are seed errors.
impl From<seed::Error> for Errors {
    fn from(value: seed::Error) -> Self {
        Error::from(value).locate(InstructionId(0)).into()
    }
}
