//! This module contains the memory operations of the executor: loads, stores,
//! allocation and release.
//!
//! # How it Works
//!
//! An access first splits off the paths on which the pointer is null. The
//! pointer is then resolved to the objects it may point into, and the state is
//! forked once per candidate on whether the accessed bytes lie inside it. The
//! state left over once every candidate has been tried holds the paths on
//! which the pointer is invalid, and is ended with an error, unless the
//! pointer comes from input and a fresh object can be invented for it.

use std::rc::Rc;

use tracing::debug;

use crate::{
    constant::BYTE_WIDTH_BITS,
    error::{execution::Result, memory::Error as MemoryError},
    executor::{Executor, HaltReason, StateTerminationType},
    expr::{Array, ArraySource, ExprRef, UpdateList, Width},
    memory::{AllocSite, MemoryObjectId, ObjectFlags, ObjectPair, ObjectState},
    program::{InstructionId, Register},
    state::{ExecutionState, Symcrete, SymcreteId, SymcreteKind, SymbolicObject},
    target::ReachWithError,
};

/// A memory access to perform.
#[derive(Clone, Debug)]
pub(super) enum Access {
    /// Reads `width` bits into `dest`.
    Read { dest: Register, width: Width },

    /// Writes `value`.
    Write { value: ExprRef },
}

impl Access {
    /// Gets the number of bytes that the access touches.
    fn bytes(&self) -> u64 {
        let width = match self {
            Self::Read { width, .. } => *width,
            Self::Write { value } => value.width(),
        };
        u64::from(width.div_ceil(BYTE_WIDTH_BITS))
    }
}

impl Executor {
    /// Splits off the paths of `state` on which `pointer` is null, ending them
    /// with a null dereference.
    ///
    /// Returns `true` if `state` continues with a non-null pointer.
    fn check_not_null(&mut self, state: &mut ExecutionState, pointer: &ExprRef) -> Result<bool> {
        if pointer.as_constant() == Some(0) {
            self.terminate_on_error(
                state,
                StateTerminationType::Ptr,
                ReachWithError::MustBeNullPointerException,
                "memory error: null pointer exception",
            );
            return Ok(false);
        }
        let not_null = self.builder.not(&self.builder.is_zero(pointer));
        let pair = self.fork(state, &not_null, true)?;
        self.continue_on(state, pair.false_state, |this, s| {
            this.terminate_on_error(
                s,
                StateTerminationType::Ptr,
                ReachWithError::MayBeNullPointerException,
                "memory error: null pointer exception",
            );
            Ok(())
        });
        Ok(pair.true_state.is_some())
    }

    /// Performs `access` through `pointer` on every path of `state`.
    pub(super) fn execute_memory_operation(
        &mut self,
        state: &mut ExecutionState,
        instruction: InstructionId,
        pointer: &ExprRef,
        access: &Access,
    ) -> Result<()> {
        if !self.check_not_null(state, pointer)? {
            return Ok(());
        }
        state.stepped_memory_instructions += 1;
        let bytes = access.bytes();

        let cached = state
            .resolved_pointers
            .get(pointer)
            .filter(|ids| ids.len() == 1)
            .and_then(|ids| state.address_space.find_object(ids[0]))
            .cloned();
        let unique = match cached {
            Some(pair) => Some(pair),
            None => state.address_space.resolve_one(
                &self.builder,
                &self.solver,
                &state.constraints,
                pointer,
            )?,
        };
        if let Some(pair) = unique {
            let in_bounds = pair.object.bounds_check_pointer_bytes(&self.builder, pointer, bytes);
            if self.solver.must_be_true(&state.constraints, &in_bounds)? {
                state.resolved_pointers.insert(pointer.clone(), vec![pair.object.id()]);
                return self.access_object(state, &pair, pointer, access);
            }
        }

        let list = state.address_space.resolve(
            &self.builder,
            &self.solver,
            &state.constraints,
            pointer,
            self.config.memory.max_resolutions,
        );
        state.resolved_pointers.insert(pointer.clone(), list.ids());

        let mut unbound = Some(state.id);
        for pair in &list.objects {
            let Some(current) = unbound else {
                break;
            };
            let in_bounds = pair.object.bounds_check_pointer_bytes(&self.builder, pointer, bytes);
            let mut outside = None;
            self.continue_on(state, Some(current), |this, s| {
                let split = this.fork(s, &in_bounds, true)?;
                outside = split.false_state;
                if split.true_state.is_some() {
                    this.access_object(s, pair, pointer, access)?;
                }
                Ok(())
            });
            unbound = outside;
        }

        let incomplete = list.incomplete;
        self.continue_on(state, unbound, |this, s| {
            this.handle_unresolved(s, instruction, pointer, access, incomplete)
        });
        Ok(())
    }

    /// Handles the paths of `state` on which `pointer` points into no bound
    /// object.
    fn handle_unresolved(
        &mut self,
        state: &mut ExecutionState,
        instruction: InstructionId,
        pointer: &ExprRef,
        access: &Access,
        incomplete: bool,
    ) -> Result<()> {
        if incomplete {
            self.terminate_early(
                state,
                StateTerminationType::SolverError,
                "query timed out (resolve)",
                Some(HaltReason::MaxSolverTime),
            );
            return Ok(());
        }

        let mut after_free = false;
        for object in state.freed.values() {
            let hits = object.bounds_check_pointer(&self.builder, pointer);
            if self.solver.may_be_true(&state.constraints, &hits)? {
                after_free = true;
                break;
            }
        }
        if after_free {
            self.terminate_on_error(
                state,
                StateTerminationType::Ptr,
                ReachWithError::UseAfterFree,
                "memory error: use after free",
            );
            return Ok(());
        }

        let arrays = pointer.arrays();
        let from_input = !arrays.is_empty() && arrays.iter().all(|a| a.source().is_input());
        if self.config.memory.lazy_initialization && from_input {
            let pair = self.lazy_initialize(state, instruction, pointer, access.bytes())?;
            return self.access_object(state, &pair, pointer, access);
        }

        self.terminate_on_error(
            state,
            StateTerminationType::Ptr,
            ReachWithError::None,
            "memory error: out of bound pointer",
        );
        Ok(())
    }

    /// Reads the whole of `array` as a single value of `width` bits.
    fn read_array(&self, array: &Rc<Array>, width: Width) -> ExprRef {
        let updates = UpdateList::new(array.clone());
        let bytes: Vec<ExprRef> = (0..u64::from(width / BYTE_WIDTH_BITS))
            .map(|i| self.builder.read(&updates, &self.builder.pointer(i)))
            .collect();
        self.builder.concat_bytes(&bytes)
    }

    /// Invents an object at `pointer` whose size and contents are symbolic.
    ///
    /// The address and the size of the object are recorded as symcretes, with
    /// the size depending on the address.
    fn lazy_initialize(
        &mut self,
        state: &mut ExecutionState,
        instruction: InstructionId,
        pointer: &ExprRef,
        bytes: u64,
    ) -> Result<ObjectPair> {
        let width = self.context.pointer_width();
        let min = self.config.memory.min_lazy_init_size.max(bytes);
        let max = self.config.memory.max_lazy_init_size.max(min);

        let size_array = self.builder.create_array(
            "lazy_init_size",
            self.context.pointer_bytes(),
            ArraySource::LazyInitializationSize,
        );
        let size = self.read_array(&size_array, width);
        state.add_constraint(self.builder.uge(&size, &self.builder.constant(min, width)));
        state.add_constraint(self.builder.ule(&size, &self.builder.constant(max, width)));

        let site = AllocSite::LazyInitialization(instruction);
        let object = self.memory.allocate_lazy(pointer, &size, max, site, "lazy_init");
        let contents = self.builder.create_array(
            "lazy_init_content",
            max,
            ArraySource::LazyInitializationContent,
        );
        state.address_space.bind_object(
            object.clone(),
            ObjectState::new(object.id(), contents.clone()),
        );
        state.symbolics.push_back(SymbolicObject {
            object: object.clone(),
            array:  contents,
        });

        let address_id = SymcreteId(state.symcretes.len() as u64);
        state.symcretes.add(Symcrete {
            id:         address_id,
            kind:       SymcreteKind::Address,
            expr:       pointer.clone(),
            array:      None,
            object:     object.id(),
            depends_on: vec![],
        });
        state.symcretes.add(Symcrete {
            id:         SymcreteId(address_id.0 + 1),
            kind:       SymcreteKind::Size,
            expr:       size,
            array:      Some(size_array),
            object:     object.id(),
            depends_on: vec![address_id],
        });
        state.resolved_pointers.insert(pointer.clone(), vec![object.id()]);
        debug!(state = %state.id, object = %object.id(), "Lazily initialized object");

        state
            .address_space
            .find_object(object.id())
            .cloned()
            .ok_or_else(|| MemoryError::UnboundObject { id: object.id() }.into())
    }

    /// Performs `access` on the object `pair`, which `pointer` must point
    /// into.
    fn access_object(
        &mut self,
        state: &mut ExecutionState,
        pair: &ObjectPair,
        pointer: &ExprRef,
        access: &Access,
    ) -> Result<()> {
        let offset = pair.object.offset_expr(&self.builder, pointer);
        match access {
            Access::Read { dest, width } => {
                let value = pair.state.read(&self.builder, &offset, *width)?;
                state.frame_mut()?.write(*dest, value);
            }
            Access::Write { value } => {
                if pair.state.is_read_only() {
                    self.terminate_on_error(
                        state,
                        StateTerminationType::ReadOnly,
                        ReachWithError::None,
                        "memory error: object read only",
                    );
                    return Ok(());
                }
                state
                    .address_space
                    .get_writeable(pair.object.id())?
                    .write(&self.builder, &offset, value)?;
            }
        }
        state.dereferenced.insert(pointer.clone());
        Ok(())
    }

    /// Releases the heap object that `pointer` points to the start of.
    pub(super) fn execute_free(&mut self, state: &mut ExecutionState, pointer: &ExprRef) -> Result<()> {
        if pointer.as_constant() == Some(0) {
            return Ok(());
        }
        let not_null = self.builder.not(&self.builder.is_zero(pointer));
        if self.fork(state, &not_null, true)?.true_state.is_none() {
            return Ok(());
        }

        let list = state.address_space.resolve(
            &self.builder,
            &self.solver,
            &state.constraints,
            pointer,
            self.config.memory.max_resolutions,
        );
        let mut unbound = Some(state.id);
        for pair in &list.objects {
            let Some(current) = unbound else {
                break;
            };
            let at_base = self.builder.eq(pointer, pair.object.address());
            let mut elsewhere = None;
            self.continue_on(state, Some(current), |this, s| {
                let split = this.fork(s, &at_base, true)?;
                elsewhere = split.false_state;
                if split.true_state.is_some() {
                    this.free_object(s, pair);
                }
                Ok(())
            });
            unbound = elsewhere;
        }

        self.continue_on(state, unbound, |this, s| {
            let mut double_free = false;
            for object in s.freed.values() {
                let at_base = this.builder.eq(pointer, object.address());
                if this.solver.may_be_true(&s.constraints, &at_base)? {
                    double_free = true;
                    break;
                }
            }
            if double_free {
                this.terminate_on_error(
                    s,
                    StateTerminationType::Free,
                    ReachWithError::DoubleFree,
                    "memory error: double free",
                );
            } else {
                this.terminate_on_error(
                    s,
                    StateTerminationType::Free,
                    ReachWithError::None,
                    "memory error: invalid pointer: free",
                );
            }
            Ok(())
        });
        Ok(())
    }

    fn free_object(&mut self, state: &mut ExecutionState, pair: &ObjectPair) {
        if !pair.object.flags().is_heap() {
            let what = if pair.object.flags().is_local {
                "alloca"
            } else {
                "global"
            };
            self.terminate_on_error(
                state,
                StateTerminationType::Free,
                ReachWithError::None,
                format!("memory error: free of {what}"),
            );
            return;
        }
        state.address_space.unbind_object(pair.object.id());
        state.freed.insert(pair.object.id(), pair.object.clone());
    }

    /// Allocates an object of `size` bytes and writes its address to `dest`.
    ///
    /// A symbolic size is first fixed to the smallest feasible value on one
    /// side of a fork. On the other side, sizes above the symbolic allocation
    /// limit make the allocation fail with a null pointer, and the remaining
    /// sizes get an object with a symbolic size.
    pub(super) fn execute_alloc(
        &mut self,
        state: &mut ExecutionState,
        instruction: InstructionId,
        dest: Register,
        size: &ExprRef,
        is_local: bool,
        alignment: u64,
    ) -> Result<()> {
        let width = self.context.pointer_width();
        let size = match size.width() {
            w if w < width => self.builder.zext(size, width),
            w if w > width => self.builder.trunc(size, width),
            _ => size.clone(),
        };
        let flags = if is_local {
            ObjectFlags::local()
        } else {
            ObjectFlags::heap()
        };

        if let Some(bytes) = size.as_constant() {
            self.bind_fresh(state, instruction, dest, &size, bytes, alignment, flags)?;
            return Ok(());
        }

        let bound = self.config.memory.symbolic_allocation_witness_bound;
        let witness = match self.solver.min_value_up_to(&state.constraints, &size, bound)? {
            Some(value) => value,
            None => self.solver.get_value(&state.constraints, &size)?,
        };
        let witness_expr = self.builder.constant(witness, width);
        let fixed = self.builder.eq(&size, &witness_expr);
        let split = self.fork(state, &fixed, true)?;
        if split.true_state.is_some() {
            self.bind_fresh(state, instruction, dest, &witness_expr, witness, alignment, flags)?;
        }

        self.continue_on(state, split.false_state, |this, s| {
            let max = this.config.memory.max_symbolic_allocation_size;
            let huge = this.builder.ugt(&size, &this.builder.constant(max, width));
            let split = this.fork(s, &huge, true)?;
            if split.true_state.is_some() {
                let null = this.builder.pointer(0);
                s.frame_mut()?.write(dest, null);
            }
            this.continue_on(s, split.false_state, |this, s| {
                let object = this.bind_fresh(s, instruction, dest, &size, max, alignment, flags)?;
                let id = SymcreteId(s.symcretes.len() as u64);
                s.symcretes.add(Symcrete {
                    id,
                    kind: SymcreteKind::Size,
                    expr: size.clone(),
                    array: None,
                    object,
                    depends_on: vec![],
                });
                Ok(())
            });
            Ok(())
        });
        Ok(())
    }

    /// Binds a fresh zeroed object of the given `size`, with `capacity` bytes
    /// reserved for it, and writes its address to `dest`.
    ///
    /// Returns the identity of the new object.
    #[allow(clippy::too_many_arguments)]
    fn bind_fresh(
        &mut self,
        state: &mut ExecutionState,
        instruction: InstructionId,
        dest: Register,
        size: &ExprRef,
        capacity: u64,
        alignment: u64,
        flags: ObjectFlags,
    ) -> Result<MemoryObjectId> {
        let name = if flags.is_local { "alloca" } else { "malloc" };
        let site = AllocSite::Instruction(instruction);
        let object = self
            .memory
            .allocate_symbolic_size(size, capacity, alignment, flags, site, name);
        let root = self.builder.create_array(name, capacity, ArraySource::Zeroed);
        state
            .address_space
            .bind_object(object.clone(), ObjectState::new(object.id(), root));

        let frame = state.frame_mut()?;
        if flags.is_local {
            frame.allocas.push(object.id());
        }
        frame.write(dest, object.address().clone());
        Ok(object.id())
    }
}
