//! This module contains errors raised by the symbolic memory model.

use thiserror::Error;

use crate::{error::container, memory::MemoryObjectId};

/// Errors that occur when operating on memory objects and address spaces.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("Object {id} is not bound in the address space")]
    UnboundObject { id: MemoryObjectId },

    #[error("Object {id} is read-only and cannot be written")]
    ReadOnlyWrite { id: MemoryObjectId },

    #[error("Accesses of {width} bits are not a whole number of bytes")]
    InvalidAccessWidth { width: u32 },

    #[error("Offset {offset} is outside of the {size} bytes of object {id}")]
    ConcreteOutOfBounds {
        id:     MemoryObjectId,
        offset: u64,
        size:   u64,
    },

    #[error("Object {id} has a symbolic size and cannot be made symbolic")]
    SymbolicSize { id: MemoryObjectId },

    #[error("Object {id} was already freed")]
    AlreadyFreed { id: MemoryObjectId },
}

/// A memory error with an associated instruction location.
pub type LocatedError = container::Located<Error>;

/// The result type for memory operations.
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
