//! This module contains errors pertaining to the symbolic execution of the
//! program.
//!
//! These are errors in the interpretation of the program itself, such as an
//! operand of the wrong width. Errors that the explored program commits, such
//! as dereferencing a null pointer, are not errors of the engine and are
//! instead reported through [`crate::executor::StateTerminationType`].

use thiserror::Error;

use crate::{
    error::{container, memory, program, solver},
    program::{FunctionId, Register},
};

/// Errors that occur during the execution of the program by the
/// [`crate::executor::Executor`].
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("Register {register:?} was read before being written")]
    UndefinedRegister { register: Register },

    #[error("Argument {index} was requested but the function only has {available}")]
    NoSuchArgument { index: u32, available: usize },

    #[error("Operands of widths {lhs} and {rhs} cannot be combined")]
    WidthMismatch { lhs: u32, rhs: u32 },

    #[error("Cannot convert a value of width {from} to width {to}")]
    InvalidCast { from: u32, to: u32 },

    #[error("Expected a boolean but found a value of width {width}")]
    NotBoolean { width: u32 },

    #[error("Function {function:?} expects {expected} arguments but was given {actual}")]
    ArgumentCountMismatch {
        function: FunctionId,
        expected: usize,
        actual:   usize,
    },

    #[error("The state has no stack frame to execute in")]
    NoCurrentFrame,

    #[error("The state has no instruction to execute")]
    InvalidStep,

    #[error("Symbolic objects must have a concrete size")]
    SymbolicMakeSymbolicSize,

    #[error(transparent)]
    Memory(#[from] memory::Error),

    #[error(transparent)]
    Program(#[from] program::Error),

    #[error(transparent)]
    Solver(#[from] solver::Error),
}

impl Error {
    /// Checks whether this error originated in the solver.
    ///
    /// Solver failures terminate the offending state with a solver error,
    /// rather than the execution error used for the other variants.
    #[must_use]
    pub fn is_solver_failure(&self) -> bool {
        matches!(self, Self::Solver(_))
    }
}

/// An execution error with an associated location in the program.
pub type LocatedError = container::Located<Error>;

/// The execution errors that ended states during a run.
pub type Errors = container::Errors<Error>;

/// The result type for methods that may have execution errors.
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
