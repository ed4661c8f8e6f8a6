//! This module contains the [`MemoryManager`], which creates every memory
//! object.

use std::{
    cell::Cell,
    rc::Rc,
};

use crate::{
    constant::{ALLOCATION_BASE_ADDRESS, ALLOCATION_GUARD_BYTES, DEFAULT_ALLOCATION_ALIGNMENT},
    expr::{ExprBuilder, ExprRef},
    memory::{AllocSite, MemoryObject, MemoryObjectId, ObjectFlags},
};

/// The allocator for memory objects.
///
/// Concrete allocations are placed by a deterministic bump allocator, with a
/// gap between consecutive objects so that small overflows never land inside
/// a neighbour. Addresses are never reused, so a dangling pointer can never
/// resolve to a newer object.
#[derive(Debug)]
pub struct MemoryManager {
    builder:      Rc<ExprBuilder>,
    next_id:      Cell<u64>,
    next_address: Cell<u64>,
    live_bytes:   Rc<Cell<u64>>,
}

impl MemoryManager {
    /// Creates a manager that builds addresses and sizes with `builder`.
    #[must_use]
    pub fn new(builder: Rc<ExprBuilder>) -> Self {
        Self {
            builder,
            next_id: Cell::new(1),
            next_address: Cell::new(ALLOCATION_BASE_ADDRESS),
            live_bytes: Rc::new(Cell::new(0)),
        }
    }

    /// Gets the number of bytes reserved by objects that are still alive in
    /// some execution state.
    #[must_use]
    pub fn live_bytes(&self) -> u64 {
        self.live_bytes.get()
    }

    fn fresh_id(&self) -> MemoryObjectId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        MemoryObjectId(id)
    }

    fn reserve(&self, capacity: u64, alignment: u64) -> u64 {
        let alignment = if alignment == 0 {
            DEFAULT_ALLOCATION_ALIGNMENT
        } else {
            alignment
        };
        let current = self.next_address.get();
        let aligned = current.div_ceil(alignment).saturating_mul(alignment);
        self.next_address.set(
            aligned
                .saturating_add(capacity.max(1))
                .saturating_add(ALLOCATION_GUARD_BYTES),
        );
        aligned
    }

    /// Allocates an object of the concrete `size`.
    #[must_use]
    pub fn allocate_concrete(
        &self,
        size: u64,
        alignment: u64,
        flags: ObjectFlags,
        alloc_site: AllocSite,
        name: &str,
    ) -> Rc<MemoryObject> {
        let width = self.builder.context().pointer_width();
        let size_expr = self.builder.constant(size, width);
        self.allocate_symbolic_size(&size_expr, size, alignment, flags, alloc_site, name)
    }

    /// Allocates an object of the possibly symbolic `size` at a concrete
    /// address, reserving `capacity` bytes for it.
    #[must_use]
    pub fn allocate_symbolic_size(
        &self,
        size: &ExprRef,
        capacity: u64,
        alignment: u64,
        flags: ObjectFlags,
        alloc_site: AllocSite,
        name: &str,
    ) -> Rc<MemoryObject> {
        let id = self.fresh_id();
        let address = self.reserve(capacity, alignment);
        let address = self.builder.pointer(address);
        Rc::new(MemoryObject::new(
            id,
            id.0,
            name.to_string(),
            address,
            size.clone(),
            capacity,
            alignment,
            flags,
            alloc_site,
            self.live_bytes.clone(),
        ))
    }

    /// Creates an object at the symbolic `address` with the symbolic `size`,
    /// for lazy initialization.
    #[must_use]
    pub fn allocate_lazy(
        &self,
        address: &ExprRef,
        size: &ExprRef,
        capacity: u64,
        alloc_site: AllocSite,
        name: &str,
    ) -> Rc<MemoryObject> {
        let id = self.fresh_id();
        Rc::new(MemoryObject::new(
            id,
            id.0,
            name.to_string(),
            address.clone(),
            size.clone(),
            capacity,
            1,
            ObjectFlags::lazy(),
            alloc_site,
            self.live_bytes.clone(),
        ))
    }
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use crate::{
        constant::ALLOCATION_GUARD_BYTES,
        expr::{Context, ExprBuilder},
        memory::{AllocSite, MemoryManager, ObjectFlags},
        program::InstructionId,
    };

    #[test]
    fn places_objects_apart_and_tracks_live_bytes() -> anyhow::Result<()> {
        let builder = Rc::new(ExprBuilder::new(Context::default()));
        let manager = MemoryManager::new(builder);
        let site = AllocSite::Instruction(InstructionId(0));

        let a = manager.allocate_concrete(10, 8, ObjectFlags::heap(), site.clone(), "a");
        let b = manager.allocate_concrete(4, 16, ObjectFlags::heap(), site, "b");
        assert_ne!(a.id(), b.id());
        assert_eq!(manager.live_bytes(), 14);

        let a_base = a.concrete_address().ok_or_else(|| anyhow::anyhow!("concrete"))?;
        let b_base = b.concrete_address().ok_or_else(|| anyhow::anyhow!("concrete"))?;
        assert!(b_base >= a_base + 10 + ALLOCATION_GUARD_BYTES);
        assert_eq!(b_base % 16, 0);

        drop(a);
        assert_eq!(manager.live_bytes(), 4);

        Ok(())
    }
}
