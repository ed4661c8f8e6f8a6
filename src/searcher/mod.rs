//! This module contains the [`Searcher`]s that decide which state to step
//! next, and the [`ObjectManager`] that owns the live states and tells the
//! rest of the engine how they changed.
//!
//! # How it Works
//!
//! Every step of the executor works on one state. States created by the step
//! are added to the object manager and states that finished are removed from
//! it. At the end of the step the manager publishes a single [`StatesEvent`]
//! to each [`Subscriber`], after which removed states are dropped.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    rc::Rc,
};

use serde::{Deserialize, Serialize};

use crate::{
    state::{ExecutionState, StateId},
    target::{manager, DistanceCalculator, DistanceResult},
};

/// The live states of a run.
pub type States = BTreeMap<StateId, ExecutionState>;

/// The changes made to the set of states by one step.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StatesEvent {
    /// The state that was stepped, if any.
    pub current: Option<StateId>,

    pub added: Vec<StateId>,

    pub removed: Vec<StateId>,
}

impl StatesEvent {
    #[must_use]
    pub fn new(current: Option<StateId>, added: Vec<StateId>, removed: Vec<StateId>) -> Self {
        Self {
            current,
            added,
            removed,
        }
    }

    /// Gets every state touched by the step: the current state unless it was
    /// removed, along with the added and removed states.
    #[must_use]
    pub fn local_states(&self) -> BTreeSet<StateId> {
        let mut local: BTreeSet<StateId> = self.added.iter().chain(&self.removed).copied().collect();
        if let Some(current) = self.current {
            if !self.removed.contains(&current) {
                local.insert(current);
            }
        }
        local
    }
}

/// A component that is told how the states changed after every step.
pub trait Subscriber {
    /// Handles the changes described by `event`.
    ///
    /// Removed states are still present in `states` during the call.
    fn update(&mut self, states: &mut States, event: &StatesEvent);
}

/// The interface to a strategy for picking the state to step next.
pub trait Searcher: std::fmt::Debug {
    /// Picks the state to step next from `states`.
    fn select(&mut self, states: &States) -> Option<StateId>;

    /// Takes account of the changes described by `event`.
    fn update(&mut self, states: &States, event: &StatesEvent);

    /// Checks whether the searcher has no states to pick from.
    #[must_use]
    fn is_empty(&self) -> bool;

    /// Gets a name for the searcher for use in logs.
    #[must_use]
    fn name(&self) -> &'static str;
}

/// The searchers that the executor can be configured with.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum SearcherKind {
    /// Depth-first search.
    #[default]
    Dfs,

    /// Breadth-first search.
    Bfs,

    /// Nearest-target-first search, falling back to depth-first search for
    /// states without targets.
    Targeted,
}

impl SearcherKind {
    /// Constructs a searcher of this kind.
    #[must_use]
    pub fn build(self, distance: Rc<DistanceCalculator>) -> Box<dyn Searcher> {
        match self {
            Self::Dfs => Box::new(DfsSearcher::new()),
            Self::Bfs => Box::new(BfsSearcher::new()),
            Self::Targeted => Box::new(TargetedSearcher::new(distance)),
        }
    }
}

/// Always picks the most recently added state.
#[derive(Clone, Debug, Default)]
pub struct DfsSearcher {
    stack: Vec<StateId>,
}

impl DfsSearcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Searcher for DfsSearcher {
    fn select(&mut self, _: &States) -> Option<StateId> {
        self.stack.last().copied()
    }

    fn update(&mut self, _: &States, event: &StatesEvent) {
        self.stack.extend(event.added.iter().copied());
        if !event.removed.is_empty() {
            self.stack.retain(|s| !event.removed.contains(s));
        }
    }

    fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    fn name(&self) -> &'static str {
        "DFS"
    }
}

/// Picks states in the order they were added.
///
/// A state that forks moves to the back of the queue along with its new
/// siblings.
#[derive(Clone, Debug, Default)]
pub struct BfsSearcher {
    queue: VecDeque<StateId>,
}

impl BfsSearcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Searcher for BfsSearcher {
    fn select(&mut self, _: &States) -> Option<StateId> {
        self.queue.front().copied()
    }

    fn update(&mut self, _: &States, event: &StatesEvent) {
        if let Some(current) = event.current {
            if !event.added.is_empty() && !event.removed.contains(&current) {
                if let Some(index) = self.queue.iter().position(|s| *s == current) {
                    self.queue.remove(index);
                    self.queue.push_back(current);
                }
            }
        }
        self.queue.extend(event.added.iter().copied());
        if !event.removed.is_empty() {
            self.queue.retain(|s| !event.removed.contains(s));
        }
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn name(&self) -> &'static str {
        "BFS"
    }
}

/// Picks the targeted state nearest to one of its targets, and otherwise
/// behaves as a [`DfsSearcher`].
#[derive(Debug)]
pub struct TargetedSearcher {
    distance: Rc<DistanceCalculator>,
    weights:  BTreeMap<StateId, DistanceResult>,
    fallback: DfsSearcher,
}

impl TargetedSearcher {
    #[must_use]
    pub fn new(distance: Rc<DistanceCalculator>) -> Self {
        Self {
            distance,
            weights: BTreeMap::new(),
            fallback: DfsSearcher::new(),
        }
    }

    fn weigh(&self, state: &ExecutionState) -> Option<DistanceResult> {
        if !state.is_targeted {
            return None;
        }
        state
            .targets
            .iter()
            .map(|t| manager::distance_with(&self.distance, state, t))
            .min()
    }
}

impl Searcher for TargetedSearcher {
    fn select(&mut self, states: &States) -> Option<StateId> {
        self.weights
            .iter()
            .filter(|(id, _)| states.contains_key(id))
            .min_by(|(a_id, a), (b_id, b)| a.cmp(b).then(b_id.cmp(a_id)))
            .map(|(id, _)| *id)
            .or_else(|| self.fallback.select(states))
    }

    fn update(&mut self, states: &States, event: &StatesEvent) {
        self.fallback.update(states, event);
        for id in event.local_states() {
            if event.removed.contains(&id) {
                self.weights.remove(&id);
                continue;
            }
            match states.get(&id).and_then(|s| self.weigh(s)) {
                Some(weight) => self.weights.insert(id, weight),
                None => self.weights.remove(&id),
            };
        }
    }

    fn is_empty(&self) -> bool {
        self.fallback.is_empty()
    }

    fn name(&self) -> &'static str {
        "Targeted"
    }
}

/// Owns the live states of a run and collects the changes made to them during
/// a step.
#[derive(Debug, Default)]
pub struct ObjectManager {
    states:  States,
    current: Option<StateId>,
    added:   Vec<StateId>,
    removed: Vec<StateId>,
    next_id: u32,
}

impl ObjectManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the identity of a new state.
    pub fn next_state_id(&mut self) -> StateId {
        let id = StateId(self.next_id);
        self.next_id += 1;
        id
    }

    #[must_use]
    pub fn states(&self) -> &States {
        &self.states
    }

    #[must_use]
    pub fn states_mut(&mut self) -> &mut States {
        &mut self.states
    }

    #[must_use]
    pub fn get(&self, id: StateId) -> Option<&ExecutionState> {
        self.states.get(&id)
    }

    #[must_use]
    pub fn get_mut(&mut self, id: StateId) -> Option<&mut ExecutionState> {
        self.states.get_mut(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Sets the state being stepped.
    pub fn set_current(&mut self, current: Option<StateId>) {
        self.current = current;
    }

    /// Adds `state` to the live states, to be announced in the next event.
    pub fn add_state(&mut self, state: ExecutionState) {
        self.added.push(state.id);
        self.states.insert(state.id, state);
    }

    /// Gets the states added during the current step.
    #[must_use]
    pub fn added(&self) -> &[StateId] {
        &self.added
    }

    /// Takes the state `id` out of the live states so that it can be worked
    /// on alongside the manager.
    ///
    /// It must be given back with [`Self::restore_state`] before the next
    /// publish.
    pub fn take_state(&mut self, id: StateId) -> Option<ExecutionState> {
        self.states.remove(&id)
    }

    /// Gives back a state taken with [`Self::take_state`] without announcing
    /// it as added.
    pub fn restore_state(&mut self, state: ExecutionState) {
        self.states.insert(state.id, state);
    }

    /// Marks the state `id` for removal at the end of the step.
    pub fn remove_state(&mut self, id: StateId) {
        if !self.removed.contains(&id) {
            self.removed.push(id);
        }
    }

    /// Checks whether the state `id` has been marked for removal.
    #[must_use]
    pub fn is_removed(&self, id: StateId) -> bool {
        self.removed.contains(&id)
    }

    /// Publishes the changes of the step to `subscribers` and then to
    /// `searcher`, and drops the removed states.
    pub fn publish(&mut self, subscribers: &mut [&mut dyn Subscriber], searcher: &mut dyn Searcher) -> StatesEvent {
        let event = StatesEvent::new(
            self.current.take(),
            std::mem::take(&mut self.added),
            std::mem::take(&mut self.removed),
        );
        for subscriber in subscribers.iter_mut() {
            subscriber.update(&mut self.states, &event);
        }
        searcher.update(&self.states, &event);
        for id in &event.removed {
            self.states.remove(id);
        }
        event
    }
}

#[cfg(test)]
mod test {
    use crate::{
        program::{FunctionId, InstructionId},
        searcher::{BfsSearcher, DfsSearcher, ObjectManager, Searcher, StatesEvent},
        state::{ExecutionState, StateId},
    };

    fn state(manager: &mut ObjectManager) -> StateId {
        let id = manager.next_state_id();
        manager.add_state(ExecutionState::new(id, FunctionId(0), InstructionId(0), vec![]));
        id
    }

    #[test]
    fn touched_states_exclude_a_removed_current_state() {
        let event = StatesEvent::new(Some(StateId(0)), vec![StateId(1)], vec![StateId(0)]);
        let local: Vec<_> = event.local_states().into_iter().collect();
        assert_eq!(local, vec![StateId(0), StateId(1)]);

        let event = StatesEvent::new(Some(StateId(2)), vec![], vec![]);
        assert_eq!(event.local_states().len(), 1);
    }

    #[test]
    fn can_search_depth_and_breadth_first() -> anyhow::Result<()> {
        let mut manager = ObjectManager::new();
        let mut dfs = DfsSearcher::new();
        let mut bfs = BfsSearcher::new();

        let first = state(&mut manager);
        let second = state(&mut manager);
        let event = manager.publish(&mut [], &mut dfs);
        bfs.update(manager.states(), &event);
        assert_eq!(dfs.select(manager.states()), Some(second));
        assert_eq!(bfs.select(manager.states()), Some(first));

        manager.set_current(Some(first));
        let third = state(&mut manager);
        let event = manager.publish(&mut [], &mut dfs);
        bfs.update(manager.states(), &event);
        assert_eq!(dfs.select(manager.states()), Some(third));
        assert_eq!(bfs.select(manager.states()), Some(second));

        manager.remove_state(third);
        manager.remove_state(second);
        let event = manager.publish(&mut [], &mut dfs);
        bfs.update(manager.states(), &event);
        assert_eq!(manager.len(), 1);
        assert_eq!(dfs.select(manager.states()), Some(first));
        assert_eq!(bfs.select(manager.states()), Some(first));
        assert!(!dfs.is_empty());

        Ok(())
    }
}
