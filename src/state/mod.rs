//! This module contains the [`ExecutionState`], which describes a single path
//! through the program.
//!
//! # How it Works
//!
//! An execution state holds everything that distinguishes one path from
//! another: the position in the program, the call stack, the path condition,
//! the address space, and the bookkeeping that the searchers and the target
//! subsystem use to decide which path to follow next. Every part of it is
//! either small or persistent, so forking a state with [`ExecutionState::branch`]
//! is cheap and the two copies share everything until they diverge.

pub mod stack;
pub mod symcrete;

use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter},
    rc::Rc,
};

use serde::{Deserialize, Serialize};
pub use stack::{Stack, StackFrame};
pub use symcrete::{Symcrete, SymcreteId, SymcreteKind, SymcreteTable};

use crate::{
    constraint::ConstraintSet,
    error::execution::{Error, Result},
    expr::{Array, ExprRef},
    memory::{AddressSpace, MemoryObject, MemoryObjectId},
    program::{BlockId, FunctionId, InstructionId, Program},
    seed::SeedInfo,
    target::{ReachWithError, TargetForest, TargetRef, TargetsHistory},
};

/// The identity of an execution state.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct StateId(pub u32);

impl Display for StateId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// An object whose contents were made symbolic, along with the array that
/// stands for those contents.
#[derive(Clone, Debug)]
pub struct SymbolicObject {
    pub object: Rc<MemoryObject>,
    pub array:  Rc<Array>,
}

/// A conditional branch taken by a state, recorded for code flows.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BranchEvent {
    pub instruction: InstructionId,
    pub taken:       BlockId,
}

/// A single path through the program.
#[derive(Clone, Debug)]
pub struct ExecutionState {
    pub id: StateId,

    /// The instruction to execute next.
    pub pc: InstructionId,

    /// The instruction executed last.
    pub prev_pc: InstructionId,

    /// The block that control arrived from when entering the current block.
    pub incoming_block: Option<BlockId>,

    pub stack: Stack,

    /// The path condition.
    pub constraints: ConstraintSet,

    pub address_space: AddressSpace,

    /// The objects whose contents are test inputs.
    pub symbolics: imbl::Vector<SymbolicObject>,

    pub symcretes: SymcreteTable,

    /// Symbolic pointers already resolved on this path, with the objects they
    /// were found to point into.
    pub resolved_pointers: imbl::HashMap<ExprRef, Vec<MemoryObjectId>>,

    /// Heap objects released on this path.
    pub freed: imbl::OrdMap<MemoryObjectId, Rc<MemoryObject>>,

    /// Symbolic pointers that have been dereferenced on this path.
    pub dereferenced: imbl::HashSet<ExprRef>,

    /// The number of forks on this path.
    pub depth: u64,

    pub stepped_instructions: u64,

    pub stepped_memory_instructions: u64,

    pub instructions_since_cov_new: u64,

    /// Whether the path has covered new code since it was last checked.
    pub covered_new: bool,

    /// Whether forks are collapsed onto a single side for this state.
    pub fork_disabled: bool,

    /// The number of times each block was entered on this path.
    pub level: imbl::OrdMap<BlockId, u64>,

    pub branch_trace: imbl::Vector<BranchEvent>,

    /// The error that the state terminated with, if any.
    pub error: ReachWithError,

    pub targets:      BTreeSet<TargetRef>,
    pub prev_targets: BTreeSet<TargetRef>,

    pub history:      Rc<TargetsHistory>,
    pub prev_history: Rc<TargetsHistory>,

    /// The targets that this state is directed towards.
    pub target_forest: TargetForest,

    pub is_targeted: bool,

    pub are_targets_changed: bool,

    /// The seeds that are consistent with this path and are replayed by it.
    pub seeds: Vec<SeedInfo>,
}

impl ExecutionState {
    /// Creates a state that is about to execute the first instruction of
    /// `function`, which starts at `entry`.
    #[must_use]
    pub fn new(id: StateId, function: FunctionId, entry: InstructionId, arguments: Vec<ExprRef>) -> Self {
        let mut stack = Stack::new();
        stack.push_frame(StackFrame::new(function, None, arguments));
        let history = TargetsHistory::empty();
        Self {
            id,
            pc: entry,
            prev_pc: entry,
            incoming_block: None,
            stack,
            constraints: ConstraintSet::new(),
            address_space: AddressSpace::new(),
            symbolics: imbl::Vector::new(),
            symcretes: SymcreteTable::new(),
            resolved_pointers: imbl::HashMap::new(),
            freed: imbl::OrdMap::new(),
            dereferenced: imbl::HashSet::new(),
            depth: 0,
            stepped_instructions: 0,
            stepped_memory_instructions: 0,
            instructions_since_cov_new: 0,
            covered_new: false,
            fork_disabled: false,
            level: imbl::OrdMap::new(),
            branch_trace: imbl::Vector::new(),
            error: ReachWithError::None,
            targets: BTreeSet::new(),
            prev_targets: BTreeSet::new(),
            history: history.clone(),
            prev_history: history,
            target_forest: TargetForest::new(),
            is_targeted: false,
            are_targets_changed: false,
            seeds: Vec::new(),
        }
    }

    /// Creates the state for another side of a fork, with identity `id`.
    ///
    /// The new state shares everything persistent with `self`. Its depth is
    /// that of `self`, which the caller raises once per fork point before
    /// branching.
    #[must_use]
    pub fn branch(&self, id: StateId) -> Self {
        let mut other = self.clone();
        other.id = id;
        other.covered_new = false;
        other
    }

    /// Gets the innermost frame.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the stack is empty.
    pub fn frame(&self) -> Result<&StackFrame> {
        self.stack.top()
    }

    /// Gets the innermost frame mutably.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the stack is empty.
    pub fn frame_mut(&mut self) -> Result<&mut StackFrame> {
        self.stack.top_mut()
    }

    /// Gets the function being executed.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the stack is empty.
    pub fn function(&self) -> Result<FunctionId> {
        Ok(self.frame()?.function)
    }

    /// Gets the block containing the next instruction.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `pc` is not an instruction of `program`.
    pub fn pc_block(&self, program: &Program) -> Result<BlockId> {
        Ok(program.instruction(self.pc)?.block)
    }

    /// Gets the block containing the previous instruction.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `prev_pc` is not an instruction of `program`.
    pub fn prev_pc_block(&self, program: &Program) -> Result<BlockId> {
        Ok(program.instruction(self.prev_pc)?.block)
    }

    /// Adds `constraint` to the path condition.
    pub fn add_constraint(&mut self, constraint: ExprRef) {
        self.constraints.add(constraint);
    }

    /// Records that control left `from` for `to`, counting the visit in the
    /// current frame and on the whole path.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the stack is empty.
    pub fn record_transfer(&mut self, from: BlockId, to: BlockId) -> Result<()> {
        *self.frame_mut()?.multilevel.entry(from).or_insert(0) += 1;
        *self.level.entry(to).or_insert(0) += 1;
        self.incoming_block = Some(from);
        Ok(())
    }

    /// Checks whether the state keeps revisiting code, more than `bound` times.
    ///
    /// At a block boundary the number of times the current block was left in
    /// this frame is compared, and at function entry the number of active
    /// frames of the function is.
    #[must_use]
    pub fn is_cycled(&self, program: &Program, bound: u32) -> bool {
        if bound == 0 {
            return false;
        }
        let bound = u64::from(bound);
        let (Ok(prev), Ok(pc)) = (program.instruction(self.prev_pc), program.instruction(self.pc))
        else {
            return false;
        };
        if prev.kind.is_terminator() {
            return self
                .frame()
                .is_ok_and(|frame| frame.visits(pc.block) > bound);
        }
        let Ok(block) = program.block(pc.block) else {
            return false;
        };
        let Ok(function) = program.function(block.function) else {
            return false;
        };
        if function.entry() == pc.block && block.first() == pc.id {
            return self.stack.calls(function.id) > bound;
        }
        false
    }

    /// Checks whether the state has forked often enough while cycling that it
    /// should be helped along by coverage targets.
    #[must_use]
    pub fn is_stuck(&self, program: &Program, bound: u32) -> bool {
        if self.depth == 0 {
            return false;
        }
        self.is_cycled(program, bound) && u64::from(self.depth.ilog2()) > u64::from(bound)
    }

    /// Replaces the targets of the state.
    pub fn set_targets(&mut self, targets: BTreeSet<TargetRef>) {
        self.targets = targets;
        self.are_targets_changed = true;
    }

    /// Replaces the history of reached targets of the state.
    pub fn set_history(&mut self, history: Rc<TargetsHistory>) {
        self.history = history;
        self.are_targets_changed = true;
    }

    /// Makes the current targets and history the baseline for the next change.
    pub fn step_targets_and_history(&mut self) {
        self.prev_targets.clone_from(&self.targets);
        self.prev_history = self.history.clone();
        self.are_targets_changed = false;
    }

    /// Sets whether the state is directed towards its targets.
    pub fn set_targeted(&mut self, targeted: bool) {
        self.is_targeted = targeted;
        self.are_targets_changed = true;
    }

    /// Gets the call instructions of every frame, from the innermost outwards.
    #[must_use]
    pub fn callers(&self) -> Vec<Option<InstructionId>> {
        self.stack.frames().iter().rev().map(|f| f.caller).collect()
    }

    /// Gets the function of the frame below the innermost one.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if there is no such frame.
    pub fn caller_function(&self) -> Result<FunctionId> {
        let frames = self.stack.frames();
        frames
            .len()
            .checked_sub(2)
            .and_then(|i| frames.get(i))
            .map(|f| f.function)
            .ok_or(Error::NoCurrentFrame)
    }
}
