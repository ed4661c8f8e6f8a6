//! This module contains the forking of states on symbolic conditions.
//!
//! A fork asks the solver which truth values a condition can take on the
//! path of a state. Where both are possible, the state is split in two, and
//! each half carries the assumption it was split on. The half that takes the
//! condition as true is always the state that was forked, so that callers
//! can carry on working with it directly.
//!
//! The seeds carried by a forked state are split between its halves by the
//! side of the condition they take.

use tracing::{debug, warn};

use crate::{
    error::{container::Locatable, execution::Result, solver},
    executor::{Executor, HaltReason, StateTerminationType},
    expr::ExprRef,
    program::BlockId,
    solver::PartialValidity,
    state::{ExecutionState, StateId},
    target::{GuidanceKind, WeightResult},
};

/// The states that follow each side of a fork.
///
/// When `true_state` is present it is the state that was forked.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StatePair {
    pub true_state:  Option<StateId>,
    pub false_state: Option<StateId>,
}

impl StatePair {
    fn only_true(id: StateId) -> Self {
        Self {
            true_state:  Some(id),
            false_state: None,
        }
    }

    fn only_false(id: StateId) -> Self {
        Self {
            true_state:  None,
            false_state: Some(id),
        }
    }
}

impl Executor {
    /// Forks `state` on the boolean `cond`.
    ///
    /// Internal forks are those made by the engine to check the safety of an
    /// operation, rather than for a branch of the program.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the solver cannot decide which sides are feasible.
    pub(super) fn fork(&mut self, state: &mut ExecutionState, cond: &ExprRef, is_internal: bool) -> Result<StatePair> {
        self.fork_towards(state, cond, is_internal, None, None)
    }

    /// Forks `state` on the branch condition `cond`, which leads to `then`
    /// when it holds and to `otherwise` when it does not.
    ///
    /// A state directed by targets only follows the sides from which one of
    /// its targets can still be reached.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the solver cannot decide which sides are feasible.
    pub(super) fn fork_branch(
        &mut self,
        state: &mut ExecutionState,
        cond: &ExprRef,
        then: BlockId,
        otherwise: BlockId,
    ) -> Result<StatePair> {
        let only = self.reachable_side(state, then, otherwise);
        self.fork_towards(state, cond, false, only, Some((then, otherwise)))
    }

    /// Gets the only side of a branch from which a target of `state` can be
    /// reached, if exactly one side qualifies.
    fn reachable_side(&self, state: &ExecutionState, then: BlockId, otherwise: BlockId) -> Option<bool> {
        if self.config.guidance != GuidanceKind::ErrorGuidance
            || !state.is_targeted
            || state.targets.is_empty()
        {
            return None;
        }
        let reaches = |block: BlockId| {
            let Ok(block) = self.program.block(block) else {
                return false;
            };
            state.targets.iter().any(|target| {
                self.distance
                    .distance_from(
                        state.pc,
                        block.first(),
                        state.stack.frames(),
                        state.error,
                        target,
                    )
                    .result
                    != WeightResult::Miss
            })
        };
        match (reaches(then), reaches(otherwise)) {
            (true, false) => Some(true),
            (false, true) => Some(false),
            _ => None,
        }
    }

    fn fork_towards(
        &mut self,
        state: &mut ExecutionState,
        cond: &ExprRef,
        is_internal: bool,
        only: Option<bool>,
        sides: Option<(BlockId, BlockId)>,
    ) -> Result<StatePair> {
        if let Some(value) = cond.as_constant() {
            return Ok(if value == 0 {
                StatePair::only_false(state.id)
            } else {
                StatePair::only_true(state.id)
            });
        }

        match self.solver.evaluate_partial(&state.constraints, cond, only)? {
            PartialValidity::MustBeTrue => Ok(StatePair::only_true(state.id)),
            PartialValidity::MustBeFalse => Ok(StatePair::only_false(state.id)),
            PartialValidity::MayBeTrue => {
                state.add_constraint(cond.clone());
                Ok(StatePair::only_true(state.id))
            }
            PartialValidity::MayBeFalse => {
                state.add_constraint(self.builder.not(cond));
                Ok(StatePair::only_false(state.id))
            }
            PartialValidity::TrueOrFalse => {
                let follow_seeds = !state.seeds.is_empty()
                    && (self.config.seeding.only_replay_seeds || self.forking_disabled(state, is_internal));
                if let Some(side) = follow_seeds.then(|| Self::seeded_side(state, cond)).flatten() {
                    debug!(state = %state.id, side, "Following the seeds of the state");
                    return Ok(self.take_side(state, cond, side));
                }
                Ok(self.fork_both(state, cond, is_internal, sides))
            }
            PartialValidity::None => Err(solver::Error::incomplete("fork condition could not be decided").into()),
        }
    }

    /// Checks whether no more forks may be made for `state`, in which case it
    /// follows a single side of every condition.
    fn forking_disabled(&self, state: &ExecutionState, is_internal: bool) -> bool {
        let budget_spent = self.config.max_forks != 0 && self.stats.forks >= self.config.max_forks;
        let stuck = !is_internal
            && !state.is_targeted
            && state.is_stuck(&self.program, self.config.max_cycles_before_stuck);
        state.fork_disabled || self.at_memory_limit || budget_spent || stuck
    }

    /// Constrains `state` to the `side` of `cond`.
    fn take_side(&self, state: &mut ExecutionState, cond: &ExprRef, side: bool) -> StatePair {
        if side {
            state.add_constraint(cond.clone());
            StatePair::only_true(state.id)
        } else {
            state.add_constraint(self.builder.not(cond));
            StatePair::only_false(state.id)
        }
    }

    fn fork_both(
        &mut self,
        state: &mut ExecutionState,
        cond: &ExprRef,
        is_internal: bool,
        sides: Option<(BlockId, BlockId)>,
    ) -> StatePair {
        // Seeds that take different sides are followed even past the budget.
        if state.seeds.is_empty() && self.forking_disabled(state, is_internal) {
            let take_true = sides.map_or(true, |(then, otherwise)| {
                visits(state, Some(then)) <= visits(state, Some(otherwise))
            });
            warn!(state = %state.id, take_true, "Skipping fork");
            return self.take_side(state, cond, take_true);
        }

        let (true_seeds, false_seeds): (Vec<_>, Vec<_>) = std::mem::take(&mut state.seeds)
            .into_iter()
            .partition(|s| s.assignment.holds(cond));

        self.stats.forks += 1;
        state.depth += 1;
        let id = self.objects.next_state_id();
        let mut other = state.branch(id);
        state.seeds = true_seeds;
        other.seeds = false_seeds;
        state.add_constraint(cond.clone());
        other.add_constraint(self.builder.not(cond));
        debug!(state = %state.id, forked = %id, depth = state.depth, "Forked state");
        self.objects.add_state(other);

        if self.config.max_depth != 0 && state.depth > self.config.max_depth {
            self.continue_on(state, Some(id), |this, s| {
                this.terminate_early(
                    s,
                    StateTerminationType::MaxDepth,
                    "max-depth exceeded",
                    Some(HaltReason::MaxDepth),
                );
                Ok(())
            });
            self.terminate_early(
                state,
                StateTerminationType::MaxDepth,
                "max-depth exceeded",
                Some(HaltReason::MaxDepth),
            );
            return StatePair::default();
        }

        StatePair {
            true_state:  Some(state.id),
            false_state: Some(id),
        }
    }

    /// Splits `state` into one state per feasible condition in `conds`, which
    /// must be mutually exclusive. The condition at each index leads to the
    /// block at the same index of `blocks`, where that block is known.
    ///
    /// The result holds the state that follows each condition. Under a spent
    /// fork budget the least visited destinations are followed, and `state`
    /// itself follows the least visited of all. Seeds go with the first
    /// condition they satisfy.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the solver cannot decide which conditions are
    /// feasible.
    pub(super) fn branch(
        &mut self,
        state: &mut ExecutionState,
        conds: &[ExprRef],
        blocks: &[Option<BlockId>],
    ) -> Result<Vec<Option<StateId>>> {
        let mut result = vec![None; conds.len()];
        let mut feasible = Vec::new();
        for (index, cond) in conds.iter().enumerate() {
            if self.solver.may_be_true(&state.constraints, cond)? {
                feasible.push(index);
            }
        }
        if feasible.is_empty() {
            self.terminate_early(
                state,
                StateTerminationType::EarlyAlgorithm,
                "no feasible branch",
                None,
            );
            return Ok(result);
        }
        feasible.sort_by_key(|&index| visits(state, blocks.get(index).copied().flatten()));

        let mut seeds = vec![Vec::new(); conds.len()];
        for info in std::mem::take(&mut state.seeds) {
            let index = feasible
                .iter()
                .copied()
                .find(|&i| info.assignment.holds(&conds[i]))
                .unwrap_or(feasible[0]);
            seeds[index].push(info);
        }
        let seeded: Vec<usize> = feasible.iter().copied().filter(|&i| !seeds[i].is_empty()).collect();

        let disabled = self.forking_disabled(state, false);
        let kept: Vec<usize> = if !seeded.is_empty() && (self.config.seeding.only_replay_seeds || disabled) {
            seeded
        } else {
            let allowed = if disabled {
                0
            } else if self.config.max_forks == 0 {
                feasible.len()
            } else {
                let left = self.config.max_forks.saturating_sub(self.stats.forks);
                usize::try_from(left).unwrap_or(usize::MAX).saturating_add(1)
            };
            feasible
                .iter()
                .copied()
                .enumerate()
                .filter(|(rank, i)| *rank < allowed.max(1) || seeded.contains(i))
                .map(|(_, i)| i)
                .collect()
        };
        if kept.len() < feasible.len() {
            warn!(state = %state.id, skipped = feasible.len() - kept.len(), "Skipping branches");
        }

        let Some((&first, rest)) = kept.split_first() else {
            return Ok(result);
        };
        if !rest.is_empty() {
            state.depth += 1;
        }
        for &index in rest {
            self.stats.forks += 1;
            let id = self.objects.next_state_id();
            let mut other = state.branch(id);
            other.seeds = std::mem::take(&mut seeds[index]);
            other.add_constraint(conds[index].clone());
            self.objects.add_state(other);
            result[index] = Some(id);
        }
        state.seeds = std::mem::take(&mut seeds[first]);
        state.add_constraint(conds[first].clone());
        result[first] = Some(state.id);
        Ok(result)
    }

    /// Runs `f` on the state `id`, which is either `current` or a state that
    /// some fork of `current` added during this step.
    ///
    /// Errors raised by `f` end the state it ran on.
    pub(super) fn continue_on(
        &mut self,
        current: &mut ExecutionState,
        id: Option<StateId>,
        f: impl FnOnce(&mut Self, &mut ExecutionState) -> Result<()>,
    ) {
        let Some(id) = id else {
            return;
        };
        if id == current.id {
            if let Err(error) = f(self, current) {
                let at = current.prev_pc;
                self.terminate_on_execution_error(current, error.locate(at));
            }
            return;
        }
        let Some(mut state) = self.objects.take_state(id) else {
            return;
        };
        if let Err(error) = f(self, &mut state) {
            let at = state.prev_pc;
            self.terminate_on_execution_error(&mut state, error.locate(at));
        }
        self.objects.restore_state(state);
    }
}

/// Gets the number of times the path of `state` entered `block`, where an
/// unknown block counts as never entered.
fn visits(state: &ExecutionState, block: Option<BlockId>) -> u64 {
    block.and_then(|b| state.level.get(&b).copied()).unwrap_or(0)
}
