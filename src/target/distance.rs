//! This module contains the [`DistanceCalculator`], which estimates how far a
//! state is from each of its targets.

use std::{
    cell::RefCell,
    cmp::Ordering,
    fmt::{Display, Formatter},
    rc::Rc,
};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::{
    codegraph::{CodeGraphDistance, FunctionDistances},
    program::{BlockId, FunctionId, InstructionId, Program},
    state::{ExecutionState, StackFrame},
    target::{ReachWithError, TargetRef},
};

/// Whether a target has been reached, may still be reached, or cannot be.
///
/// The variants are ordered from best to worst.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum WeightResult {
    Done,
    Continue,
    Miss,
}

/// Where a target lies relative to the function a state is executing.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum TargetKind {
    /// The target is reachable within the current function.
    Local,

    /// The target is reachable through a call made by the current function.
    Pre,

    /// The target is reachable after returning from the current function.
    Post,

    /// The target is not reachable.
    None,
}

/// The estimated distance from a state to a target.
///
/// Results inside the current function are better than those that are not.
/// Between two results that can both continue, the lighter one is better.
/// Otherwise results are ordered by [`WeightResult`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DistanceResult {
    pub result:             WeightResult,
    pub weight:             u32,
    pub is_inside_function: bool,
}

impl DistanceResult {
    #[must_use]
    pub fn new(result: WeightResult, weight: u32, is_inside_function: bool) -> Self {
        Self {
            result,
            weight,
            is_inside_function,
        }
    }

    /// A result with the given outcome at weight zero, inside the function.
    #[must_use]
    pub fn of(result: WeightResult) -> Self {
        Self::new(result, 0, true)
    }
}

impl PartialEq for DistanceResult {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DistanceResult {}

impl PartialOrd for DistanceResult {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DistanceResult {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.is_inside_function != other.is_inside_function {
            return if self.is_inside_function {
                Ordering::Less
            } else {
                Ordering::Greater
            };
        }
        if self.result == WeightResult::Continue && other.result == WeightResult::Continue {
            return self.weight.cmp(&other.weight);
        }
        self.result.cmp(&other.result)
    }
}

impl Display for DistanceResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {:?}, {})",
            u8::from(!self.is_inside_function),
            self.result,
            self.weight
        )
    }
}

type SpeculativeState = (BlockId, TargetKind, ReachWithError);

/// Computes [`DistanceResult`]s over the program's code graph.
///
/// Results for a block, target kind and error are memoized per target.
#[derive(Debug)]
pub struct DistanceCalculator {
    graph: Rc<CodeGraphDistance>,
    cache: RefCell<FxHashMap<TargetRef, FxHashMap<SpeculativeState, DistanceResult>>>,
}

impl DistanceCalculator {
    #[must_use]
    pub fn new(graph: Rc<CodeGraphDistance>) -> Self {
        Self {
            graph,
            cache: RefCell::default(),
        }
    }

    #[must_use]
    pub fn graph(&self) -> &Rc<CodeGraphDistance> {
        &self.graph
    }

    fn program(&self) -> &Program {
        self.graph.program()
    }

    /// Gets the distance from `state` to `target`.
    #[must_use]
    pub fn distance(&self, state: &ExecutionState, target: &TargetRef) -> DistanceResult {
        self.distance_from(
            state.prev_pc,
            state.pc,
            state.stack.frames(),
            state.error,
            target,
        )
    }

    /// Gets the distance to `target` from a state that executed `prev_pc`, is
    /// about to execute `pc` with the call stack `frames` (outermost first),
    /// and has failed with `error`.
    #[must_use]
    pub fn distance_from(
        &self,
        prev_pc: InstructionId,
        pc: InstructionId,
        frames: &[StackFrame],
        error: ReachWithError,
        target: &TargetRef,
    ) -> DistanceResult {
        let program = self.program();
        let (Ok(prev), Ok(current)) = (program.instruction(prev_pc), program.instruction(pc)) else {
            return DistanceResult::of(WeightResult::Miss);
        };
        let Ok(target_block) = program.block(target.block()) else {
            return DistanceResult::of(WeightResult::Miss);
        };

        if !target.should_fail_on_this_target() && target.is_at_end() {
            if prev.block == target_block.id && prev.id == target_block.terminator().id {
                return DistanceResult::of(WeightResult::Done);
            } else if current.block == target_block.id {
                return DistanceResult::of(WeightResult::Continue);
            }
        }

        if let crate::target::Target::ReproduceError { location, block, .. } = target.target() {
            if location.is_the_same_as_in(*block, prev) && target.is_that_error(error) {
                return DistanceResult::of(WeightResult::Done);
            }
        }

        let to_target_function = self.graph.backward_function_distance(target_block.function);
        let mut block = current.block;
        let mut min_call_weight = None;
        let mut min_frame = None;
        let strictly_after = !frames.is_empty();
        for (frame_index, frame) in frames.iter().rev().enumerate() {
            let frame_index = u32::try_from(frame_index).unwrap_or(u32::MAX);
            if let Some(distance) = self.distance_in_call_graph(
                frame.function,
                block,
                &to_target_function,
                target,
                strictly_after && frame_index != 0,
            ) {
                min_call_weight = Some(distance.saturating_mul(2).saturating_add(frame_index));
                min_frame = Some(frame_index);
            }
            if let Some(caller) = frame.caller.and_then(|c| program.instruction(c).ok()) {
                block = caller.block;
            }
            if min_call_weight.is_some() {
                break;
            }
        }

        let kind = match (min_call_weight, min_frame) {
            (Some(0), _) => TargetKind::Local,
            (_, Some(0)) => TargetKind::Pre,
            (_, Some(_)) => TargetKind::Post,
            _ => TargetKind::None,
        };
        self.distance_of_kind(current.block, kind, error, target)
    }

    /// Gets the distance to `target` from `block`, knowing where the target
    /// lies relative to the block's function.
    #[must_use]
    pub fn distance_of_kind(
        &self,
        block: BlockId,
        kind: TargetKind,
        error: ReachWithError,
        target: &TargetRef,
    ) -> DistanceResult {
        let key = (block, kind, error);
        if let Some(found) = self.cache.borrow().get(target).and_then(|c| c.get(&key)) {
            return *found;
        }
        let result = self.compute_distance(block, kind, error, target);
        self.cache
            .borrow_mut()
            .entry(target.clone())
            .or_default()
            .insert(key, result);
        result
    }

    fn compute_distance(
        &self,
        block: BlockId,
        kind: TargetKind,
        error: ReachWithError,
        target: &TargetRef,
    ) -> DistanceResult {
        let mut weight = 0;
        let mut is_inside_function = true;
        let mut result = match kind {
            TargetKind::Local => self.local_weight(block, &[target.block()], &mut weight),
            TargetKind::Pre => {
                is_inside_function = false;
                self.pre_target_weight(block, target, &mut weight)
            }
            TargetKind::Post => {
                is_inside_function = false;
                self.post_target_weight(block, &mut weight)
            }
            TargetKind::None => WeightResult::Miss,
        };
        if result == WeightResult::Done
            && target.should_fail_on_this_target()
            && !target.is_that_error(error)
        {
            result = WeightResult::Continue;
        }
        DistanceResult::new(result, weight, is_inside_function)
    }

    fn local_weight(&self, block: BlockId, local_targets: &[BlockId], weight: &mut u32) -> WeightResult {
        let distances = self.graph.distance(block);
        let found = local_targets
            .iter()
            .filter_map(|end| distances.get(end).copied())
            .min();
        match found {
            None => {
                *weight = u32::MAX;
                WeightResult::Miss
            }
            Some(0) => {
                *weight = 0;
                WeightResult::Done
            }
            Some(w) => {
                *weight = w;
                WeightResult::Continue
            }
        }
    }

    fn pre_target_weight(&self, block: BlockId, target: &TargetRef, weight: &mut u32) -> WeightResult {
        let program = self.program();
        let Ok(function) = program.block(block).and_then(|b| program.function(b.function)) else {
            return WeightResult::Miss;
        };
        let Ok(target_block) = program.block(target.block()) else {
            return WeightResult::Miss;
        };
        let to_target_function = self.graph.backward_function_distance(target_block.function);
        let local_targets: Vec<BlockId> = function
            .call_blocks
            .iter()
            .copied()
            .filter(|cb| {
                program.block(*cb).is_ok_and(|b| {
                    b.callees()
                        .iter()
                        .any(|callee| to_target_function.contains_key(callee))
                })
            })
            .collect();
        if local_targets.is_empty() {
            return WeightResult::Miss;
        }
        match self.local_weight(block, &local_targets, weight) {
            WeightResult::Done => WeightResult::Continue,
            other => other,
        }
    }

    fn post_target_weight(&self, block: BlockId, weight: &mut u32) -> WeightResult {
        let program = self.program();
        let Ok(function) = program.block(block).and_then(|b| program.function(b.function)) else {
            return WeightResult::Miss;
        };
        if function.return_blocks.is_empty() {
            return WeightResult::Miss;
        }
        match self.local_weight(block, &function.return_blocks, weight) {
            WeightResult::Done => WeightResult::Continue,
            other => other,
        }
    }

    /// Gets the number of calls needed to reach the target's function from
    /// `block` in `function`, or zero if the target is in `block`'s own
    /// reach.
    ///
    /// With `strictly_after` set, only the code after `block` counts.
    fn distance_in_call_graph(
        &self,
        function: FunctionId,
        block: BlockId,
        to_target_function: &FunctionDistances,
        target: &TargetRef,
        strictly_after: bool,
    ) -> Option<u32> {
        let program = self.program();
        let target_block = program.block(target.block()).ok()?;
        if function == target_block.function && self.graph.distance(block).contains_key(&target_block.id) {
            return Some(0);
        }
        if !strictly_after {
            return self.call_distance_from(function, block, to_target_function);
        }
        program
            .block(block)
            .ok()?
            .successors
            .iter()
            .filter_map(|s| self.call_distance_from(function, *s, to_target_function))
            .min()
    }

    fn call_distance_from(
        &self,
        function: FunctionId,
        block: BlockId,
        to_target_function: &FunctionDistances,
    ) -> Option<u32> {
        let program = self.program();
        let reachable = self.graph.distance(block);
        let function = program.function(function).ok()?;
        function
            .call_blocks
            .iter()
            .filter(|cb| reachable.contains_key(cb))
            .filter_map(|cb| program.block(*cb).ok())
            .flat_map(|cb| cb.callees().iter())
            .filter_map(|callee| to_target_function.get(callee))
            .map(|d| d + 1)
            .min()
    }
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use crate::{
        codegraph::CodeGraphDistance,
        program::{Callee, InstructionKind, ProgramBuilder},
        state::StackFrame,
        target::{DistanceCalculator, DistanceResult, ReachWithError, TargetCache, WeightResult},
    };

    #[test]
    fn orders_results_by_locality_then_weight() {
        let local = DistanceResult::new(WeightResult::Continue, 5, true);
        let far = DistanceResult::new(WeightResult::Continue, 1, false);
        let near = DistanceResult::new(WeightResult::Continue, 2, true);
        let done = DistanceResult::new(WeightResult::Done, 0, true);
        let miss = DistanceResult::new(WeightResult::Miss, 0, true);
        assert!(local < far);
        assert!(near < local);
        assert!(done < near);
        assert!(near < miss);
    }

    #[test]
    fn classifies_targets_through_the_call_graph() -> anyhow::Result<()> {
        let mut builder = ProgramBuilder::new();
        let main = builder.declare_function("main", 0)?;
        let callee = builder.declare_function("callee", 0)?;

        let entry = builder.add_block(main)?;
        let call = builder.add_block(main)?;
        let exit = builder.add_block(main)?;
        builder.push(entry, InstructionKind::Jump { target: call })?;
        builder.push(call, InstructionKind::Call {
            dest:   None,
            callee: Callee::Direct(callee),
            args:   vec![],
        })?;
        builder.push(call, InstructionKind::Jump { target: exit })?;
        builder.push(exit, InstructionKind::Return { value: None })?;

        let body = builder.add_block(callee)?;
        let tail = builder.add_block(callee)?;
        builder.push(body, InstructionKind::Jump { target: tail })?;
        builder.push(tail, InstructionKind::Return { value: None })?;

        let program = Rc::new(builder.build()?);
        let calculator = DistanceCalculator::new(Rc::new(CodeGraphDistance::new(program.clone())));
        let cache = TargetCache::new();

        let start = program.block(entry)?.first();
        let frames = vec![StackFrame::new(main, None, vec![])];

        let local = cache.reach_block(exit, false);
        let result = calculator.distance_from(start, start, &frames, ReachWithError::None, &local);
        assert_eq!(result.result, WeightResult::Continue);
        assert_eq!(result.weight, 2);
        assert!(result.is_inside_function);

        let inside_callee = cache.reach_block(tail, false);
        let result = calculator.distance_from(start, start, &frames, ReachWithError::None, &inside_callee);
        assert_eq!(result.result, WeightResult::Continue);
        assert_eq!(result.weight, 1);
        assert!(!result.is_inside_function);

        let call_instruction = program.block(call)?.first();
        let in_callee = program.block(body)?.first();
        let nested = vec![
            StackFrame::new(main, None, vec![]),
            StackFrame::new(callee, Some(call_instruction), vec![]),
        ];
        let after_return = cache.reach_block(exit, false);
        let result =
            calculator.distance_from(call_instruction, in_callee, &nested, ReachWithError::None, &after_return);
        assert_eq!(result.result, WeightResult::Continue);
        assert!(!result.is_inside_function);

        let unreachable = cache.reach_block(entry, false);
        let result = calculator.distance_from(in_callee, in_callee, &nested, ReachWithError::None, &unreachable);
        assert_eq!(result.result, WeightResult::Miss);

        Ok(())
    }
}
