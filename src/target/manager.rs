//! This module contains the [`TargetManager`], which moves the target forests
//! of states forward as the states execute.

use std::{
    collections::{BTreeMap, BTreeSet},
    rc::Rc,
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    program::Program,
    searcher::{States, StatesEvent, Subscriber},
    state::{ExecutionState, StateId},
    target::{
        DistanceCalculator,
        DistanceResult,
        Target,
        TargetCache,
        TargetCalculator,
        TargetRef,
        TargetsHistory,
        TargetsSet,
        WeightResult,
    },
};

/// What, if anything, directs the exploration.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum GuidanceKind {
    /// States are never targeted.
    #[default]
    NoGuidance,

    /// States that get stuck are directed towards uncovered code.
    CoverageGuidance,

    /// States are directed along the traces of a target specification.
    ErrorGuidance,
}

/// The states whose targets changed, keyed by the history they were reached
/// under and the target.
pub type HistoryTargetToStates = BTreeMap<(Rc<TargetsHistory>, TargetRef), BTreeSet<StateId>>;

/// Advances the target forests of states.
///
/// After every step, each touched state is checked against its targets. Missed
/// targets are dropped, reached targets are replaced by what follows them in
/// the forest, and the changes are recorded for subscribers in
/// [`Self::added_states`] and [`Self::removed_states`].
#[derive(Debug)]
pub struct TargetManager {
    guidance:                GuidanceKind,
    max_cycles_before_stuck: u32,
    distance:                Rc<DistanceCalculator>,
    targets:                 Rc<TargetCache>,
    calculator:              TargetCalculator,
    reached_targets:         BTreeSet<TargetRef>,
    added_states:            HistoryTargetToStates,
    removed_states:          HistoryTargetToStates,
}

impl TargetManager {
    #[must_use]
    pub fn new(
        guidance: GuidanceKind,
        max_cycles_before_stuck: u32,
        distance: Rc<DistanceCalculator>,
        targets: Rc<TargetCache>,
    ) -> Self {
        let calculator = TargetCalculator::new(distance.graph().clone(), targets.clone());
        Self {
            guidance,
            max_cycles_before_stuck,
            distance,
            targets,
            calculator,
            reached_targets: BTreeSet::new(),
            added_states: BTreeMap::new(),
            removed_states: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn guidance(&self) -> GuidanceKind {
        self.guidance
    }

    #[must_use]
    pub fn calculator(&self) -> &TargetCalculator {
        &self.calculator
    }

    #[must_use]
    pub fn calculator_mut(&mut self) -> &mut TargetCalculator {
        &mut self.calculator
    }

    /// Gets the targets that some state has reached during the run.
    #[must_use]
    pub fn reached_targets(&self) -> &BTreeSet<TargetRef> {
        &self.reached_targets
    }

    /// Gets the states that gained a target in the last update.
    #[must_use]
    pub fn added_states(&self) -> &HistoryTargetToStates {
        &self.added_states
    }

    /// Gets the states that lost a target in the last update.
    #[must_use]
    pub fn removed_states(&self) -> &HistoryTargetToStates {
        &self.removed_states
    }

    /// Records that `target` has been reached by the run.
    pub fn set_reached(&mut self, target: TargetRef) {
        self.reached_targets.insert(target);
    }

    fn program(&self) -> &Program {
        self.distance.graph().program()
    }

    fn is_coverage_guided(&self) -> bool {
        self.guidance == GuidanceKind::CoverageGuidance
    }

    /// Gets the distance from `state` to `target`, checking first whether the
    /// state is at the target.
    #[must_use]
    pub fn distance(&self, state: &ExecutionState, target: &TargetRef) -> DistanceResult {
        distance_with(&self.distance, state, target)
    }

    /// Checks whether `state` has reached `target`.
    #[must_use]
    pub fn is_reached_target(&self, state: &ExecutionState, target: &TargetRef) -> bool {
        is_reached_target(self.program(), state, target) == Some(WeightResult::Done)
    }

    /// Blocks the targets reached elsewhere in the run from the leaves of the
    /// forest of `state`.
    pub fn pull_global(&self, state: &mut ExecutionState) {
        if !state.is_targeted || state.targets.is_empty() {
            return;
        }
        let leafs: Vec<TargetRef> = state
            .target_forest
            .leafs()
            .iter()
            .flat_map(|(set, _)| set.targets().to_vec())
            .collect();
        for target in leafs {
            if self.reached_targets.contains(&target) {
                state.target_forest.block(&target);
            }
        }
        state.set_targets(state.target_forest.targets().into_iter().collect());
        self.untarget_if_done(state);
    }

    fn untarget_if_done(&self, state: &mut ExecutionState) {
        if self.is_coverage_guided() && state.targets.is_empty() {
            state.set_targeted(false);
        }
    }

    fn update_miss(&self, state: &mut ExecutionState, target: &TargetRef) {
        debug!(state = %state.id, %target, "Target missed");
        state.target_forest.remove(target);
        state.set_targets(state.target_forest.targets().into_iter().collect());
        self.untarget_if_done(state);
    }

    fn update_done(&mut self, state: &mut ExecutionState, target: &TargetRef) {
        debug!(state = %state.id, %target, "Target reached");
        state.target_forest.step_to(target);
        state.set_targets(state.target_forest.targets().into_iter().collect());
        state.set_history(state.target_forest.history().clone());
        if self.is_coverage_guided() || target.should_fail_on_this_target() {
            let is_call = self
                .program()
                .block(target.block())
                .is_ok_and(crate::program::Block::is_call);
            if target.should_fail_on_this_target() || !is_call {
                self.set_reached(target.clone());
            }
        }
        self.untarget_if_done(state);
    }

    fn update_reached(&mut self, state: &ExecutionState) {
        if !self.is_coverage_guided() {
            return;
        }
        let program = self.distance.graph().program().clone();
        let (Ok(prev), Ok(pc)) = (program.instruction(state.prev_pc), program.instruction(state.pc)) else {
            return;
        };
        if !prev.kind.is_terminator() {
            return;
        }
        let Ok(block) = program.block(prev.block) else {
            return;
        };

        let target = if block.successors.is_empty() {
            Some(self.targets.reach_block(block.id, true))
        } else if block.is_call() {
            (!self.calculator.uncovered_block_predicate(block.id))
                .then(|| self.targets.reach_block(block.id, true))
        } else {
            block
                .successors
                .iter()
                .position(|s| *s == pc.block)
                .map(|index| self.targets.cover_branch(block.id, index))
        };

        if let Some(target) = target {
            self.set_reached(target);
            let entered = self.targets.reach_block(pc.block, false);
            self.set_reached(entered);
        }
    }

    fn update_targets(&mut self, state: &mut ExecutionState) {
        if self.is_coverage_guided() {
            let program = self.distance.graph().program().clone();
            if state.targets.is_empty() && state.is_stuck(&program, self.max_cycles_before_stuck) {
                state.set_targeted(true);
            }
            if state.is_targeted && state.targets.is_empty() {
                let targets = self.calculator.calculate(state);
                if !targets.is_empty() {
                    debug!(state = %state.id, count = targets.len(), "Directing stuck state to uncovered code");
                    state.target_forest.add_set(&TargetsSet::new(targets));
                    state.set_targets(state.target_forest.targets().into_iter().collect());
                }
            }
        }

        if !state.is_targeted {
            return;
        }

        let targets: Vec<TargetRef> = state.targets.iter().cloned().collect();
        for target in targets {
            if !state.target_forest.contains(&target) {
                continue;
            }
            match self.distance(state, &target).result {
                WeightResult::Continue => {}
                WeightResult::Miss => self.update_miss(state, &target),
                WeightResult::Done => self.update_done(state, &target),
            }
        }
    }

    fn collect(&mut self, state: &ExecutionState) {
        if !state.are_targets_changed {
            return;
        }
        let id = state.id;
        if state.prev_history != state.history {
            for target in &state.prev_targets {
                let key = (state.prev_history.clone(), target.clone());
                self.removed_states.entry(key.clone()).or_default().insert(id);
                self.added_states.entry(key).or_default();
            }
            for target in &state.targets {
                let key = (state.history.clone(), target.clone());
                self.added_states.entry(key.clone()).or_default().insert(id);
                self.removed_states.entry(key).or_default();
            }
        } else {
            for target in state.prev_targets.difference(&state.targets) {
                let key = (state.history.clone(), target.clone());
                self.removed_states.entry(key.clone()).or_default().insert(id);
                self.added_states.entry(key).or_default();
            }
            for target in state.targets.difference(&state.prev_targets) {
                let key = (state.history.clone(), target.clone());
                self.added_states.entry(key.clone()).or_default().insert(id);
                self.removed_states.entry(key).or_default();
            }
        }
    }

    /// Updates the targets of every state touched by a step.
    ///
    /// The touched states are `current` (unless it was removed), the states
    /// that were added, and the states that were removed.
    pub fn update(&mut self, states: &mut States, event: &StatesEvent) {
        for set in self.added_states.values_mut() {
            set.clear();
        }
        for set in self.removed_states.values_mut() {
            set.clear();
        }

        for id in event.local_states() {
            let Some(state) = states.get_mut(&id) else {
                continue;
            };
            self.update_reached(state);
            self.update_targets(state);
            if state.are_targets_changed {
                self.collect(state);
                state.step_targets_and_history();
            }
        }
    }
}

impl Subscriber for TargetManager {
    fn update(&mut self, states: &mut States, event: &StatesEvent) {
        TargetManager::update(self, states, event);
    }
}

/// Gets the distance from `state` to `target` with `calculator`, checking first
/// whether the state is at the target.
#[must_use]
pub fn distance_with(
    calculator: &DistanceCalculator,
    state: &ExecutionState,
    target: &TargetRef,
) -> DistanceResult {
    if let Some(result) = is_reached_target(calculator.graph().program(), state, target) {
        return DistanceResult::of(result);
    }
    calculator.distance(state, target)
}

/// Checks directly whether `state` is at `target`.
///
/// Returns [`None`] when the position of the state says nothing about the
/// target, in which case the static distance decides.
#[must_use]
pub fn is_reached_target(program: &Program, state: &ExecutionState, target: &TargetRef) -> Option<WeightResult> {
    if state.stepped_instructions == 0 {
        return None;
    }
    let prev = program.instruction(state.prev_pc).ok()?;
    let pc = program.instruction(state.pc).ok()?;
    let block = program.block(target.block()).ok()?;
    let at_last = state.prev_pc == block.terminator().id;

    match target.target() {
        Target::ReachBlock { at_end: true, .. } => {
            if prev.block == block.id || pc.block == block.id {
                return Some(if at_last {
                    WeightResult::Done
                } else {
                    WeightResult::Continue
                });
            }
        }
        Target::ReachBlock { at_end: false, .. } => {
            if pc.block == block.id {
                return Some(WeightResult::Done);
            }
        }
        Target::CoverBranch { branch, .. } => {
            if prev.block == block.id {
                let taken = block.successors.get(*branch) == Some(&pc.block);
                return Some(if at_last && taken {
                    WeightResult::Done
                } else {
                    WeightResult::Continue
                });
            }
        }
        Target::ReproduceError { location, .. } => {
            let found = std::iter::once(Some(state.prev_pc))
                .chain(state.callers())
                .flatten()
                .filter_map(|i| program.instruction(i).ok())
                .any(|i| location.is_the_same_as_in(block.id, i));
            if found {
                return Some(if target.is_that_error(state.error) {
                    WeightResult::Done
                } else {
                    WeightResult::Continue
                });
            }
        }
    }
    None
}

#[cfg(test)]
mod test {
    use std::{collections::BTreeMap, rc::Rc};

    use crate::{
        codegraph::CodeGraphDistance,
        program::{InstructionKind, ProgramBuilder},
        searcher::StatesEvent,
        state::{ExecutionState, StateId},
        target::{DistanceCalculator, GuidanceKind, TargetCache, TargetManager, TargetsSet},
    };

    #[test]
    fn can_step_a_state_along_its_trace() -> anyhow::Result<()> {
        let mut builder = ProgramBuilder::new();
        let main = builder.declare_function("main", 0)?;
        let first = builder.add_block(main)?;
        let second = builder.add_block(main)?;
        let third = builder.add_block(main)?;
        builder.push(first, InstructionKind::Jump { target: second })?;
        builder.push(second, InstructionKind::Jump { target: third })?;
        builder.push(third, InstructionKind::Return { value: None })?;
        let program = Rc::new(builder.build()?);

        let graph = Rc::new(CodeGraphDistance::new(program.clone()));
        let distance = Rc::new(DistanceCalculator::new(graph));
        let cache = Rc::new(TargetCache::new());
        let mut manager = TargetManager::new(GuidanceKind::ErrorGuidance, 1, distance, cache.clone());

        let to_second = cache.reach_block(second, false);
        let to_first = cache.reach_block(first, false);
        let to_third = cache.reach_block(third, false);

        let start = program.block(first)?.first();
        let mut state = ExecutionState::new(StateId(0), main, start, vec![]);
        state
            .target_forest
            .add_trace(&[TargetsSet::single(to_second.clone()), TargetsSet::single(to_third.clone())]);
        state.target_forest.add(&to_first);
        state.set_targets(state.target_forest.targets().into_iter().collect());
        state.set_targeted(true);
        state.step_targets_and_history();

        state.prev_pc = start;
        state.pc = program.block(second)?.first();
        state.stepped_instructions = 1;

        let mut states = BTreeMap::new();
        states.insert(state.id, state);
        let event = StatesEvent::new(Some(StateId(0)), vec![], vec![]);
        manager.update(&mut states, &event);

        let state = &states[&StateId(0)];
        assert!(state.targets.contains(&to_third));
        assert!(!state.targets.contains(&to_first));
        assert!(!state.targets.contains(&to_second));
        assert_eq!(state.history.len(), 1);
        assert!(!state.are_targets_changed);

        let gained = manager
            .added_states()
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|((_, target), _)| target.clone())
            .collect::<Vec<_>>();
        assert_eq!(gained, vec![to_third]);

        Ok(())
    }
}
