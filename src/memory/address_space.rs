//! This module contains the [`AddressSpace`], which binds the memory objects
//! of one execution state to their contents.

use std::rc::Rc;

use crate::{
    constraint::ConstraintSet,
    error::{
        memory::{Error, Result},
        solver,
    },
    expr::{ExprBuilder, ExprRef},
    memory::{MemoryObject, MemoryObjectId, ObjectState},
    solver::TimingSolver,
};

/// A memory object along with its contents in some address space.
#[derive(Clone, Debug)]
pub struct ObjectPair {
    pub object: Rc<MemoryObject>,
    pub state:  Rc<ObjectState>,
}

/// The objects that a pointer may point into.
#[derive(Clone, Debug, Default)]
pub struct ResolutionList {
    /// The candidate objects, in the order they were found.
    pub objects: Vec<ObjectPair>,

    /// Whether resolution stopped before every object was considered, either
    /// because of the resolution limit or because the solver gave up.
    pub incomplete: bool,
}

impl ResolutionList {
    /// Gets the identities of the candidate objects.
    #[must_use]
    pub fn ids(&self) -> Vec<MemoryObjectId> {
        self.objects.iter().map(|p| p.object.id()).collect()
    }
}

/// The binding of memory objects to their contents for one execution state.
///
/// Cloning an address space is cheap, and clones share every object state
/// until one of them writes to it.
#[derive(Clone, Debug, Default)]
pub struct AddressSpace {
    objects:    imbl::OrdMap<MemoryObjectId, ObjectPair>,
    by_address: imbl::OrdMap<u64, MemoryObjectId>,
}

impl AddressSpace {
    /// Creates an empty address space.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `object` to `state`, replacing any existing binding.
    pub fn bind_object(&mut self, object: Rc<MemoryObject>, state: ObjectState) {
        if let Some(address) = object.concrete_address() {
            self.by_address.insert(address, object.id());
        }
        let state = Rc::new(state);
        self.objects.insert(object.id(), ObjectPair { object, state });
    }

    /// Removes the binding for the object `id`, returning it if it existed.
    pub fn unbind_object(&mut self, id: MemoryObjectId) -> Option<ObjectPair> {
        let pair = self.objects.remove(&id)?;
        if let Some(address) = pair.object.concrete_address() {
            if self.by_address.get(&address) == Some(&id) {
                self.by_address.remove(&address);
            }
        }
        Some(pair)
    }

    /// Gets the binding for the object `id`.
    #[must_use]
    pub fn find_object(&self, id: MemoryObjectId) -> Option<&ObjectPair> {
        self.objects.get(&id)
    }

    /// Gets a private, writeable copy of the contents of object `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the object is not bound.
    pub fn get_writeable(&mut self, id: MemoryObjectId) -> Result<&mut ObjectState> {
        let pair = self
            .objects
            .get_mut(&id)
            .ok_or(Error::UnboundObject { id })?;
        Ok(Rc::make_mut(&mut pair.state))
    }

    /// Gets the number of bound objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Iterates over every binding in order of object identity.
    pub fn iter(&self) -> impl Iterator<Item = &ObjectPair> {
        self.objects.values()
    }

    /// Resolves the concrete `address` to the object containing it, if any.
    #[must_use]
    pub fn resolve_concrete(&self, address: u64) -> Option<&ObjectPair> {
        let (_, id) = self.by_address.range(..=address).next_back()?;
        let pair = self.objects.get(id)?;
        pair.object.contains_address(address).then_some(pair)
    }

    /// Attempts to resolve `pointer` to a single object that it must point
    /// into.
    ///
    /// A concrete pointer is looked up directly. A symbolic one is resolved
    /// through an example value, which only succeeds if the pointer is then
    /// proven to be within the object that the example falls in.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the solver cannot answer.
    pub fn resolve_one(
        &self,
        builder: &ExprBuilder,
        solver: &TimingSolver,
        constraints: &ConstraintSet,
        pointer: &ExprRef,
    ) -> solver::Result<Option<ObjectPair>> {
        if let Some(address) = pointer.as_constant() {
            return Ok(self.resolve_concrete(address).cloned());
        }
        let example = solver.get_value(constraints, pointer)?;
        let Some(pair) = self.resolve_concrete(example) else {
            return Ok(None);
        };
        let in_bounds = pair.object.bounds_check_pointer(builder, pointer);
        if solver.must_be_true(constraints, &in_bounds)? {
            Ok(Some(pair.clone()))
        } else {
            Ok(None)
        }
    }

    /// Resolves `pointer` to every object that it may point into.
    ///
    /// Objects are considered in order of identity. Resolution stops early
    /// once an object is found that the pointer must point into, and is marked
    /// incomplete if `max_resolutions` objects have been found (when non-zero)
    /// or if the solver fails.
    #[must_use]
    pub fn resolve(
        &self,
        builder: &ExprBuilder,
        solver: &TimingSolver,
        constraints: &ConstraintSet,
        pointer: &ExprRef,
        max_resolutions: usize,
    ) -> ResolutionList {
        let mut list = ResolutionList::default();
        for pair in self.objects.values() {
            if max_resolutions != 0 && list.objects.len() >= max_resolutions {
                list.incomplete = true;
                break;
            }
            let in_bounds = pair.object.bounds_check_pointer(builder, pointer);
            match solver.may_be_true(constraints, &in_bounds) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(_) => {
                    list.incomplete = true;
                    break;
                }
            }
            list.objects.push(pair.clone());
            match solver.must_be_true(constraints, &in_bounds) {
                Ok(true) => break,
                Ok(false) => {}
                Err(_) => {
                    list.incomplete = true;
                    break;
                }
            }
        }
        list
    }
}

#[cfg(test)]
mod test {
    use std::{rc::Rc, time::Duration};

    use crate::{
        constraint::ConstraintSet,
        expr::{ArraySource, Context, ExprBuilder, UpdateList},
        memory::{AddressSpace, AllocSite, MemoryManager, ObjectFlags, ObjectState},
        program::InstructionId,
        solver::{EnumerationSolver, TimingSolver},
    };

    #[test]
    fn can_resolve_symbolic_pointers() -> anyhow::Result<()> {
        let builder = Rc::new(ExprBuilder::new(Context::default()));
        let solver = TimingSolver::new(
            Box::new(EnumerationSolver::new()),
            builder.clone(),
            Duration::from_secs(5),
        );
        let manager = MemoryManager::new(builder.clone());
        let mut space = AddressSpace::new();

        let site = AllocSite::Instruction(InstructionId(0));
        let a = manager.allocate_concrete(8, 8, ObjectFlags::heap(), site.clone(), "a");
        let b = manager.allocate_concrete(8, 8, ObjectFlags::heap(), site, "b");
        for object in [&a, &b] {
            let root = builder.create_array(object.name(), 8, ArraySource::Zeroed);
            space.bind_object(object.clone(), ObjectState::new(object.id(), root));
        }

        let input = builder.create_array("i", 1, ArraySource::MakeSymbolic);
        let index = builder.zext(
            &builder.read(&UpdateList::new(input), &builder.pointer(0)),
            64,
        );
        let base = a.concrete_address().ok_or_else(|| anyhow::anyhow!("concrete"))?;
        let pointer = builder.add(&builder.pointer(base), &index);

        let mut constraints = ConstraintSet::new();
        constraints.add(builder.ult(&index, &builder.pointer(4)));
        let unique = space.resolve_one(&builder, &solver, &constraints, &pointer)?;
        assert_eq!(unique.map(|p| p.object.id()), Some(a.id()));

        let unconstrained = ConstraintSet::new();
        let first = space.resolve(&builder, &solver, &unconstrained, &pointer, 0);
        let second = space.resolve(&builder, &solver, &unconstrained, &pointer, 0);
        assert!(!first.incomplete);
        assert_eq!(first.ids(), vec![a.id(), b.id()]);
        assert_eq!(first.ids(), second.ids());

        let limited = space.resolve(&builder, &solver, &unconstrained, &pointer, 1);
        assert!(limited.incomplete);

        Ok(())
    }

    #[test]
    fn clones_share_contents_until_written() -> anyhow::Result<()> {
        let builder = Rc::new(ExprBuilder::new(Context::default()));
        let manager = MemoryManager::new(builder.clone());
        let object = manager.allocate_concrete(
            4,
            8,
            ObjectFlags::local(),
            AllocSite::Instruction(InstructionId(0)),
            "x",
        );
        let root = builder.create_array("x", 4, ArraySource::Zeroed);
        let mut space = AddressSpace::new();
        space.bind_object(object.clone(), ObjectState::new(object.id(), root));

        let mut copy = space.clone();
        copy.get_writeable(object.id())?
            .write8(&builder, &builder.pointer(0), builder.constant(7, 8))?;

        let original = space
            .find_object(object.id())
            .ok_or_else(|| anyhow::anyhow!("bound"))?;
        let changed = copy
            .find_object(object.id())
            .ok_or_else(|| anyhow::anyhow!("bound"))?;
        assert!(!Rc::ptr_eq(&original.state, &changed.state));
        assert_eq!(
            original.state.read8(&builder, &builder.pointer(0)).as_constant(),
            Some(0)
        );
        assert_eq!(
            changed.state.read8(&builder, &builder.pointer(0)).as_constant(),
            Some(7)
        );

        Ok(())
    }
}
