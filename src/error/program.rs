//! This module contains errors raised while building or querying the program
//! representation consumed by the engine.

use thiserror::Error;

use crate::program::{BlockId, FunctionId, InstructionId};

/// Errors in the structure of a program handed to the engine.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("No function exists with id {id:?}")]
    NoSuchFunction { id: FunctionId },

    #[error("No function named {name:?} exists")]
    UnknownFunction { name: String },

    #[error("A function named {name:?} was declared twice")]
    DuplicateFunction { name: String },

    #[error("Function {name:?} has no blocks")]
    EmptyFunction { name: String },

    #[error("No instruction exists with id {id:?}")]
    NoSuchInstruction { id: InstructionId },

    #[error("No block exists with id {id:?}")]
    NoSuchBlock { id: BlockId },

    #[error("Block {id:?} does not end with a terminator instruction")]
    MissingTerminator { id: BlockId },

    #[error("Block {id:?} has a terminator before its last instruction")]
    MisplacedTerminator { id: BlockId },

    #[error("Block {id:?} branches to {target:?}, which belongs to another function")]
    CrossFunctionEdge { id: BlockId, target: BlockId },

    #[error("No global exists with index {index}")]
    NoSuchGlobal { index: u32 },

    #[error("Width of {width} bits is not supported")]
    InvalidWidth { width: u32 },
}

/// The result type for program construction.
pub type Result<T> = std::result::Result<T, Error>;
