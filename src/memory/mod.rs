//! This module contains the symbolic memory model.
//!
//! # How it Works
//!
//! Memory is made up of [`MemoryObject`]s, each of which describes a single
//! allocation: where it lives and how large it is. The current contents of an
//! object are held separately in an [`ObjectState`], so that many execution
//! states can share the same contents until one of them writes to it. Each
//! execution state owns an [`AddressSpace`] that binds objects to their
//! contents, and that can resolve a (possibly symbolic) pointer to the objects
//! it may point into.
//!
//! Objects are created by the [`MemoryManager`], which places concrete
//! allocations deterministically and keeps track of how much memory is live.

pub mod address_space;
pub mod manager;
pub mod object;
pub mod state;

use std::fmt::{Display, Formatter};

pub use address_space::{AddressSpace, ObjectPair, ResolutionList};
pub use manager::MemoryManager;
pub use object::{AllocSite, MemoryObject, ObjectFlags};
use serde::{Deserialize, Serialize};
pub use state::ObjectState;

use crate::constant::{
    DEFAULT_LAZY_INITIALIZATION,
    DEFAULT_MAX_LAZY_INIT_SIZE,
    DEFAULT_MAX_RESOLUTIONS,
    DEFAULT_MAX_SYMBOLIC_ALLOCATION_SIZE,
    DEFAULT_MIN_LAZY_INIT_SIZE,
    DEFAULT_SYMBOLIC_ALLOCATION_WITNESS_BOUND,
};

/// The identity of a memory object.
///
/// Identifier zero is never handed out.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct MemoryObjectId(pub u64);

impl Display for MemoryObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "mo{}", self.0)
    }
}

/// The configuration of the memory model.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Whether objects may be invented for pointers that come from symbolic
    /// input and point at nothing.
    pub lazy_initialization: bool,

    /// The smallest size that a lazily initialized object may have.
    pub min_lazy_init_size: u64,

    /// The largest size that a lazily initialized object may have.
    pub max_lazy_init_size: u64,

    /// Allocations that may be larger than this many bytes are assumed to be
    /// able to fail.
    pub max_symbolic_allocation_size: u64,

    /// The bound under which the smallest feasible size of a symbolic
    /// allocation is searched for.
    pub symbolic_allocation_witness_bound: u64,

    /// The largest number of objects that a pointer is resolved to, or zero for
    /// no limit.
    pub max_resolutions: usize,
}

impl Config {
    /// Sets whether lazy initialization is enabled.
    #[must_use]
    pub fn with_lazy_initialization(mut self, value: bool) -> Self {
        self.lazy_initialization = value;
        self
    }

    /// Sets the bounds on the size of lazily initialized objects.
    #[must_use]
    pub fn with_lazy_init_sizes(mut self, min: u64, max: u64) -> Self {
        self.min_lazy_init_size = min;
        self.max_lazy_init_size = max;
        self
    }

    /// Sets the size above which allocations may fail.
    #[must_use]
    pub fn with_max_symbolic_allocation_size(mut self, value: u64) -> Self {
        self.max_symbolic_allocation_size = value;
        self
    }

    /// Sets the bound under which allocation size witnesses are searched for.
    #[must_use]
    pub fn with_symbolic_allocation_witness_bound(mut self, value: u64) -> Self {
        self.symbolic_allocation_witness_bound = value;
        self
    }

    /// Sets the largest number of objects a pointer is resolved to.
    #[must_use]
    pub fn with_max_resolutions(mut self, value: usize) -> Self {
        self.max_resolutions = value;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lazy_initialization:               DEFAULT_LAZY_INITIALIZATION,
            min_lazy_init_size:                DEFAULT_MIN_LAZY_INIT_SIZE,
            max_lazy_init_size:                DEFAULT_MAX_LAZY_INIT_SIZE,
            max_symbolic_allocation_size:      DEFAULT_MAX_SYMBOLIC_ALLOCATION_SIZE,
            symbolic_allocation_witness_bound: DEFAULT_SYMBOLIC_ALLOCATION_WITNESS_BOUND,
            max_resolutions:                   DEFAULT_MAX_RESOLUTIONS,
        }
    }
}
