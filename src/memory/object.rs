//! This module contains the [`MemoryObject`], the identity and extent of a
//! single allocation.

use std::{
    cell::Cell,
    cmp::Ordering,
    fmt::{Display, Formatter},
    hash::{Hash, Hasher},
    rc::Rc,
};

use serde::{Deserialize, Serialize};

use crate::{
    expr::{ExprBuilder, ExprRef},
    memory::MemoryObjectId,
    program::{GlobalId, InstructionId},
};

/// Where an object was allocated, for diagnostics.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum AllocSite {
    /// An allocating instruction.
    Instruction(InstructionId),

    /// A global variable.
    Global(GlobalId),

    /// An argument of the entry function.
    Argument(u32),

    /// An object invented for a pointer loaded from symbolic input.
    LazyInitialization(InstructionId),
}

/// The kind of storage that an object occupies.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct ObjectFlags {
    /// The object lives in a stack frame.
    pub is_local: bool,

    /// The object is a global variable.
    pub is_global: bool,

    /// The object is placed at an address chosen outside the allocator.
    pub is_fixed: bool,

    /// The object was invented by lazy initialization.
    pub is_lazy_initialized: bool,

    /// The object was provided by the user rather than the program.
    pub is_user_specified: bool,
}

impl ObjectFlags {
    /// Flags for a stack allocation.
    #[must_use]
    pub fn local() -> Self {
        Self {
            is_local: true,
            ..Self::default()
        }
    }

    /// Flags for a heap allocation.
    #[must_use]
    pub fn heap() -> Self {
        Self::default()
    }

    /// Flags for a global variable.
    #[must_use]
    pub fn global() -> Self {
        Self {
            is_global: true,
            ..Self::default()
        }
    }

    /// Flags for a lazily initialized object.
    #[must_use]
    pub fn lazy() -> Self {
        Self {
            is_lazy_initialized: true,
            ..Self::default()
        }
    }

    /// Checks if the object may be released with `free`.
    #[must_use]
    pub fn is_heap(&self) -> bool {
        !self.is_local && !self.is_global
    }
}

/// A single logical allocation.
///
/// Memory objects are immutable once created and are compared by their
/// identity alone.
#[derive(Debug)]
pub struct MemoryObject {
    id:               MemoryObjectId,
    timestamp:        u64,
    name:             String,
    address:          ExprRef,
    concrete_address: Option<u64>,
    size:             ExprRef,
    concrete_size:    Option<u64>,
    capacity:         u64,
    alignment:        u64,
    flags:            ObjectFlags,
    alloc_site:       AllocSite,
    live_bytes:       Rc<Cell<u64>>,
}

impl MemoryObject {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: MemoryObjectId,
        timestamp: u64,
        name: String,
        address: ExprRef,
        size: ExprRef,
        capacity: u64,
        alignment: u64,
        flags: ObjectFlags,
        alloc_site: AllocSite,
        live_bytes: Rc<Cell<u64>>,
    ) -> Self {
        let concrete_address = address.as_constant();
        let concrete_size = size.as_constant();
        live_bytes.set(live_bytes.get() + capacity);
        Self {
            id,
            timestamp,
            name,
            address,
            concrete_address,
            size,
            concrete_size,
            capacity,
            alignment,
            flags,
            alloc_site,
            live_bytes,
        }
    }

    #[must_use]
    pub fn id(&self) -> MemoryObjectId {
        self.id
    }

    /// Gets the creation order of the object, which distinguishes objects
    /// lazily initialized at the same symbolic address.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the base address of the object, which may be symbolic.
    #[must_use]
    pub fn address(&self) -> &ExprRef {
        &self.address
    }

    #[must_use]
    pub fn concrete_address(&self) -> Option<u64> {
        self.concrete_address
    }

    /// Gets the size of the object in bytes, which may be symbolic.
    #[must_use]
    pub fn size(&self) -> &ExprRef {
        &self.size
    }

    #[must_use]
    pub fn concrete_size(&self) -> Option<u64> {
        self.concrete_size
    }

    /// Gets the number of bytes reserved for the object, which bounds its size.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[must_use]
    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    #[must_use]
    pub fn flags(&self) -> ObjectFlags {
        self.flags
    }

    #[must_use]
    pub fn alloc_site(&self) -> &AllocSite {
        &self.alloc_site
    }

    /// Checks whether `address` lies within the object, for objects at a
    /// concrete address with a concrete size.
    #[must_use]
    pub fn contains_address(&self, address: u64) -> bool {
        match (self.concrete_address, self.concrete_size) {
            (Some(base), Some(0)) => address == base,
            (Some(base), Some(size)) => address >= base && address - base < size,
            (Some(base), None) => address >= base && address - base < self.capacity.max(1),
            _ => false,
        }
    }

    /// Computes the offset of `pointer` into the object.
    #[must_use]
    pub fn offset_expr(&self, builder: &ExprBuilder, pointer: &ExprRef) -> ExprRef {
        builder.sub(pointer, &self.address)
    }

    /// Computes the condition under which `offset` is inside the object.
    ///
    /// Only offset zero is inside an object of size zero.
    #[must_use]
    pub fn bounds_check_offset(&self, builder: &ExprBuilder, offset: &ExprRef) -> ExprRef {
        if self.concrete_size == Some(0) {
            builder.is_zero(offset)
        } else {
            builder.ult(offset, &self.size)
        }
    }

    /// Computes the condition under which `bytes` bytes starting at `offset`
    /// are inside the object.
    #[must_use]
    pub fn bounds_check_offset_bytes(
        &self,
        builder: &ExprBuilder,
        offset: &ExprRef,
        bytes: u64,
    ) -> ExprRef {
        let width = offset.width();
        if let Some(size) = self.concrete_size {
            if bytes > size {
                return builder.false_expr();
            }
            return builder.ult(offset, &builder.constant(size - bytes + 1, width));
        }
        let bytes_expr = builder.constant(bytes, width);
        let fits = builder.ule(&bytes_expr, &self.size);
        let last = builder.add(
            &builder.sub(&self.size, &bytes_expr),
            &builder.constant(1, width),
        );
        builder.and(&fits, &builder.ult(offset, &last))
    }

    /// Computes the condition under which `pointer` points inside the object.
    #[must_use]
    pub fn bounds_check_pointer(&self, builder: &ExprBuilder, pointer: &ExprRef) -> ExprRef {
        self.bounds_check_offset(builder, &self.offset_expr(builder, pointer))
    }

    /// Computes the condition under which the `bytes` bytes at `pointer` are
    /// inside the object.
    #[must_use]
    pub fn bounds_check_pointer_bytes(
        &self,
        builder: &ExprBuilder,
        pointer: &ExprRef,
        bytes: u64,
    ) -> ExprRef {
        self.bounds_check_offset_bytes(builder, &self.offset_expr(builder, pointer), bytes)
    }
}

impl Drop for MemoryObject {
    fn drop(&mut self) {
        self.live_bytes
            .set(self.live_bytes.get().saturating_sub(self.capacity));
    }
}

impl PartialEq for MemoryObject {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MemoryObject {}

impl PartialOrd for MemoryObject {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MemoryObject {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Hash for MemoryObject {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Display for MemoryObject {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}) at {} of size {}", self.id, self.name, self.address, self.size)
    }
}
