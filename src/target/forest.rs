//! This module contains the [`TargetForest`], the persistent tree of target
//! sequences that a state is directed along.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
    fmt::{Display, Formatter},
    rc::Rc,
};

use itertools::Itertools;

use crate::{
    constant::MAX_CONFIDENCE,
    program::FunctionId,
    state::StateId,
    target::TargetRef,
};

/// The targets that reaching any one of counts as reaching the node.
///
/// Sets are kept sorted, so equal sets compare equal whatever order their
/// targets were given in.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TargetsSet(Rc<[TargetRef]>);

impl TargetsSet {
    /// Creates a set of `targets`.
    pub fn new(targets: impl IntoIterator<Item = TargetRef>) -> Self {
        let mut targets: Vec<TargetRef> = targets.into_iter().collect();
        targets.sort();
        targets.dedup();
        Self(targets.into())
    }

    #[must_use]
    pub fn single(target: TargetRef) -> Self {
        Self(Rc::from(vec![target]))
    }

    #[must_use]
    pub fn targets(&self) -> &[TargetRef] {
        &self.0
    }

    #[must_use]
    pub fn contains(&self, target: &TargetRef) -> bool {
        self.0.binary_search(target).is_ok()
    }
}

impl Display for TargetsSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}}}", self.0.iter().join(", "))
    }
}

/// The states that can still reach each target.
pub type TargetToStates = BTreeMap<TargetRef, BTreeSet<StateId>>;

/// One level of a target forest.
///
/// Each child is keyed by the set of targets that leads to it, and the
/// confidence of a child is its own confidence capped by its parent's.
#[derive(Clone, Debug)]
pub struct Layer {
    forest:          imbl::OrdMap<TargetsSet, Rc<Layer>>,
    targets_to_sets: imbl::OrdMap<TargetRef, imbl::OrdSet<TargetsSet>>,
    confidence:      f64,
}

impl Default for Layer {
    fn default() -> Self {
        Self::new()
    }
}

impl Layer {
    /// Creates an empty layer in which there is full confidence.
    #[must_use]
    pub fn new() -> Self {
        Self {
            forest:          imbl::OrdMap::new(),
            targets_to_sets: imbl::OrdMap::new(),
            confidence:      MAX_CONFIDENCE,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forest.is_empty()
    }

    /// Gets the number of children.
    #[must_use]
    pub fn len(&self) -> usize {
        self.forest.len()
    }

    /// Gets the sets on this level that contain `target`.
    #[must_use]
    pub fn find(&self, target: &TargetRef) -> Option<&imbl::OrdSet<TargetsSet>> {
        self.targets_to_sets.get(target)
    }

    /// Gets the child reached through `set`.
    #[must_use]
    pub fn child(&self, set: &TargetsSet) -> Option<&Rc<Layer>> {
        self.forest.get(set)
    }

    /// Iterates over the children along with the sets that lead to them.
    pub fn children(&self) -> impl Iterator<Item = (&TargetsSet, &Rc<Layer>)> {
        self.forest.iter()
    }

    /// Gets the targets on this level.
    #[must_use]
    pub fn targets(&self) -> Vec<TargetRef> {
        self.targets_to_sets.keys().cloned().collect()
    }

    /// Gets the confidence of this layer under a parent with confidence
    /// `parent`.
    #[must_use]
    pub fn confidence_under(&self, parent: f64) -> f64 {
        parent.min(self.confidence)
    }

    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.confidence_under(MAX_CONFIDENCE)
    }

    fn link(&mut self, set: &TargetsSet) {
        for target in set.targets() {
            self.targets_to_sets
                .entry(target.clone())
                .or_default()
                .insert(set.clone());
        }
    }

    fn unlink(&mut self, set: &TargetsSet) {
        for target in set.targets() {
            if let Some(sets) = self.targets_to_sets.get_mut(target) {
                sets.remove(set);
                if sets.is_empty() {
                    self.targets_to_sets.remove(target);
                }
            }
        }
    }

    /// Adds the path of `sets` below this layer, sharing any prefix that
    /// already exists.
    pub fn add_trace(&mut self, sets: &[TargetsSet]) {
        let Some((first, rest)) = sets.split_first() else {
            return;
        };
        if !self.forest.contains_key(first) {
            self.forest.insert(first.clone(), Rc::new(Layer::new()));
        }
        self.link(first);
        if let Some(child) = self.forest.get_mut(first) {
            Rc::make_mut(child).add_trace(rest);
        }
    }

    fn with_confidence_propagated(&self) -> Layer {
        let mut result = self.clone();
        let parent = self.confidence;
        let sets: Vec<TargetsSet> = result.forest.keys().cloned().collect();
        for set in sets {
            let Some(child) = result.forest.get_mut(&set) else {
                continue;
            };
            let capped = child.confidence_under(parent);
            if capped != child.confidence {
                Rc::make_mut(child).confidence = capped;
            }
        }
        result
    }

    /// Merges `other` into this layer, capping the confidence of its children
    /// by its own.
    pub fn union_with(&mut self, other: &Layer) {
        if other.forest.is_empty() {
            return;
        }
        let other = other.with_confidence_propagated();
        for (set, child) in &other.forest {
            match self.forest.get_mut(set) {
                Some(existing) => {
                    let mut merged = (**existing).clone();
                    merged.union_with(child);
                    *existing = Rc::new(merged);
                }
                None => {
                    self.forest.insert(set.clone(), child.clone());
                }
            }
        }
        for (target, sets) in &other.targets_to_sets {
            let entry = self.targets_to_sets.entry(target.clone()).or_default();
            for set in sets {
                entry.insert(set.clone());
            }
        }
    }

    /// Removes `target` from this level, dropping every set that has no other
    /// target left on this level.
    pub fn remove_target(&mut self, target: &TargetRef) {
        let Some(sets) = self.targets_to_sets.remove(target) else {
            return;
        };
        for set in sets {
            let still_used = set
                .targets()
                .iter()
                .any(|t| self.targets_to_sets.contains_key(t));
            if !still_used {
                self.forest.remove(&set);
            }
        }
    }

    /// Removes `target` from this level and from every leaf below it.
    pub fn block(&mut self, target: &TargetRef) {
        if self.is_empty() {
            return;
        }
        self.remove_target(target);
        let sets: Vec<TargetsSet> = self.forest.keys().cloned().collect();
        for set in sets {
            let Some(child) = self.forest.get(&set) else {
                continue;
            };
            if child.is_empty() {
                continue;
            }
            let blocked = child.block_leaf(target);
            if blocked.is_empty() {
                self.unlink(&set);
                self.forest.remove(&set);
            } else {
                self.forest.insert(set, Rc::new(blocked));
            }
        }
    }

    /// Checks whether `target` occurs anywhere in this layer or below.
    #[must_use]
    pub fn deep_find(&self, target: &TargetRef) -> bool {
        if self.is_empty() {
            return false;
        }
        self.targets_to_sets.contains_key(target)
            || self.forest.values().any(|child| child.deep_find(target))
    }

    /// Checks whether `target` occurs below one of the sets containing `child`
    /// on this level, or is `child` itself.
    #[must_use]
    pub fn deep_find_in(&self, child: &TargetRef, target: &TargetRef) -> bool {
        let Some(sets) = self.targets_to_sets.get(child) else {
            return false;
        };
        if child == target {
            return true;
        }
        sets.iter()
            .filter_map(|set| self.forest.get(set))
            .any(|layer| layer.deep_find(target))
    }

    /// Gets a copy of this layer without `target`.
    #[must_use]
    pub fn remove_child(&self, target: &TargetRef) -> Layer {
        let mut result = self.clone();
        result.remove_target(target);
        result
    }

    /// Gets a copy of this layer without the child `set`.
    #[must_use]
    pub fn remove_child_set(&self, set: &TargetsSet) -> Layer {
        let mut result = self.clone();
        result.forest.remove(set);
        result.unlink(set);
        result
    }

    /// Gets a copy of this layer with `target` as an additional leaf.
    #[must_use]
    pub fn add_child(&self, target: &TargetRef) -> Layer {
        self.add_child_set(&TargetsSet::single(target.clone()))
    }

    /// Gets a copy of this layer with `set` as an additional leaf.
    #[must_use]
    pub fn add_child_set(&self, set: &TargetsSet) -> Layer {
        let mut result = self.clone();
        if result.forest.contains_key(set) {
            return result;
        }
        result.forest.insert(set.clone(), Rc::new(Layer::new()));
        result.link(set);
        result
    }

    /// Gets a copy of this layer in which the leaf `leaf` is blocked below the
    /// child `set`.
    #[must_use]
    pub fn block_leaf_in_child_set(&self, set: &TargetsSet, leaf: &TargetRef) -> Layer {
        let Some(subtree) = self.forest.get(set) else {
            return self.clone();
        };
        if subtree.is_empty() {
            let leads_here = self
                .targets_to_sets
                .get(leaf)
                .is_some_and(|sets| sets.contains(set));
            return if leads_here {
                self.remove_child(leaf)
            } else {
                self.clone()
            };
        }

        let mut sublayer = (**subtree).clone();
        sublayer.block(leaf);
        if sublayer.is_empty() {
            return self.remove_child_set(set);
        }
        let mut wrapper = Layer {
            forest:          imbl::OrdMap::new(),
            targets_to_sets: imbl::OrdMap::new(),
            confidence:      self.confidence,
        };
        wrapper.forest.insert(set.clone(), Rc::new(sublayer));
        wrapper.link(set);
        self.replace_child_with(set, &wrapper)
    }

    /// Gets a copy of this layer in which the leaf `leaf` is blocked below
    /// every child containing `child`.
    #[must_use]
    pub fn block_leaf_in_child(&self, child: &TargetRef, leaf: &TargetRef) -> Layer {
        let Some(sets) = self.targets_to_sets.get(child) else {
            return self.clone();
        };
        let mut result = self.clone();
        for set in sets {
            if result.forest.contains_key(set) {
                result = result.block_leaf_in_child_set(set, leaf);
            }
        }
        result
    }

    /// Gets a copy of this layer in which the leaf `leaf` is blocked
    /// everywhere.
    #[must_use]
    pub fn block_leaf(&self, leaf: &TargetRef) -> Layer {
        let mut result = self.clone();
        for set in self.forest.keys() {
            if result.forest.contains_key(set) {
                result = result.block_leaf_in_child_set(set, leaf);
            }
        }
        result
    }

    /// Gets a copy of this layer in which the child `set` is replaced by the
    /// children of `other`.
    #[must_use]
    pub fn replace_child_with(&self, set: &TargetsSet, other: &Layer) -> Layer {
        let mut result = self.remove_child_set(set);
        result.union_with(other);
        result
    }

    /// Gets a copy of this layer in which each of `sets` is replaced by its
    /// own children.
    #[must_use]
    pub fn replace_children_with_their_children(&self, sets: &imbl::OrdSet<TargetsSet>) -> Layer {
        let layers: Vec<Rc<Layer>> = sets.iter().filter_map(|s| self.forest.get(s).cloned()).collect();
        let mut result = self.clone();
        for set in sets {
            result.unlink(set);
            result.forest.remove(set);
        }
        for layer in layers {
            result.union_with(&layer);
        }
        result
    }

    fn add_leafs(&self, leafs: &mut Vec<(TargetsSet, f64)>, parent: f64) {
        for (set, layer) in &self.forest {
            let confidence = layer.confidence_under(parent);
            if layer.is_empty() {
                leafs.push((set.clone(), confidence));
            } else {
                layer.add_leafs(leafs, confidence);
            }
        }
    }

    /// Gets a copy of this layer in which the confidence of each child is
    /// divided among the states that can reach one of its targets.
    ///
    /// Children that no state can reach are descended into instead.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn divide_confidence_by_states(self: &Rc<Self>, reachable: &TargetToStates) -> Rc<Layer> {
        if self.forest.is_empty() || reachable.is_empty() {
            return self.clone();
        }
        let mut result = (**self).clone();
        for (set, layer) in &self.forest {
            let states: BTreeSet<StateId> = set
                .targets()
                .iter()
                .filter_map(|t| reachable.get(t))
                .flatten()
                .copied()
                .collect();
            match states.len() {
                0 => {
                    result
                        .forest
                        .insert(set.clone(), layer.divide_confidence_by_states(reachable));
                }
                1 => {}
                count => {
                    let mut next = (**layer).clone();
                    next.confidence /= count as f64;
                    result.forest.insert(set.clone(), Rc::new(next));
                }
            }
        }
        Rc::new(result)
    }
}

/// The targets that a state has reached, newest first.
///
/// Histories are persistent lists, so extending one never changes another
/// that shares its tail. They compare by their contents.
#[derive(Debug)]
pub struct TargetsHistory {
    target:  Option<TargetRef>,
    visited: Option<Rc<TargetsHistory>>,
    size:    usize,
}

impl TargetsHistory {
    /// Creates the empty history.
    #[must_use]
    pub fn empty() -> Rc<Self> {
        Rc::new(Self {
            target:  None,
            visited: None,
            size:    0,
        })
    }

    /// Gets the history extended by `target`.
    #[must_use]
    pub fn add(self: &Rc<Self>, target: TargetRef) -> Rc<Self> {
        Rc::new(Self {
            target:  Some(target),
            visited: Some(self.clone()),
            size:    self.size + 1,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Iterates over the reached targets, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &TargetRef> {
        let mut current = Some(self);
        std::iter::from_fn(move || {
            let node = current?;
            let target = node.target.as_ref()?;
            current = node.visited.as_deref();
            Some(target)
        })
    }
}

impl PartialEq for TargetsHistory {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TargetsHistory {}

impl PartialOrd for TargetsHistory {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TargetsHistory {
    fn cmp(&self, other: &Self) -> Ordering {
        if std::ptr::eq(self, other) {
            return Ordering::Equal;
        }
        self.size
            .cmp(&other.size)
            .then_with(|| self.iter().cmp(other.iter()))
    }
}

impl Display for TargetsHistory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.iter().join(" <- "))
    }
}

/// The targets a state is directed towards, along with those it has reached.
#[derive(Clone, Debug)]
pub struct TargetForest {
    forest:  Rc<Layer>,
    history: Rc<TargetsHistory>,
    entry:   Option<FunctionId>,
}

impl Default for TargetForest {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetForest {
    /// Creates an empty forest.
    #[must_use]
    pub fn new() -> Self {
        Self::with_entry(None)
    }

    /// Creates an empty forest for traces that start in `entry`.
    #[must_use]
    pub fn with_entry(entry: Option<FunctionId>) -> Self {
        Self {
            forest: Rc::new(Layer::new()),
            history: TargetsHistory::empty(),
            entry,
        }
    }

    #[must_use]
    pub fn entry_function(&self) -> Option<FunctionId> {
        self.entry
    }

    #[must_use]
    pub fn history(&self) -> &Rc<TargetsHistory> {
        &self.history
    }

    /// Gets the top layer.
    #[must_use]
    pub fn layer(&self) -> &Rc<Layer> {
        &self.forest
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forest.is_empty()
    }

    /// Gets the number of immediate successors.
    #[must_use]
    pub fn successor_count(&self) -> usize {
        self.forest.len()
    }

    /// Checks whether `target` is an immediate successor.
    #[must_use]
    pub fn contains(&self, target: &TargetRef) -> bool {
        self.forest.find(target).is_some()
    }

    /// Checks whether `target` occurs anywhere in the forest.
    #[must_use]
    pub fn deep_contains(&self, target: &TargetRef) -> bool {
        self.forest.deep_find(target)
    }

    /// Gets the immediate successors.
    #[must_use]
    pub fn targets(&self) -> Vec<TargetRef> {
        self.forest.targets()
    }

    /// Adds the path of `sets` to the forest.
    pub fn add_trace(&mut self, sets: &[TargetsSet]) {
        Rc::make_mut(&mut self.forest).add_trace(sets);
    }

    /// Records that `target` was reached, replacing it by what follows it.
    ///
    /// Reaching an error target ends the forest, as the state is about to fail
    /// there.
    pub fn step_to(&mut self, target: &TargetRef) {
        if self.forest.is_empty() {
            return;
        }
        let Some(sets) = self.forest.find(target).cloned() else {
            return;
        };
        if target.should_fail_on_this_target() {
            self.forest = Rc::new(Layer::new());
        } else {
            self.history = self.history.add(target.clone());
            self.forest = Rc::new(self.forest.replace_children_with_their_children(&sets));
            target.set_reported(true);
        }
        if self.forest.is_empty() && !target.should_fail_on_this_target() {
            self.history = TargetsHistory::empty();
        }
    }

    /// Adds `target` as an immediate successor.
    pub fn add(&mut self, target: &TargetRef) {
        if self.contains(target) {
            return;
        }
        self.forest = Rc::new(self.forest.add_child(target));
    }

    /// Adds `set` as an immediate successor.
    pub fn add_set(&mut self, set: &TargetsSet) {
        if self.forest.child(set).is_some() {
            return;
        }
        self.forest = Rc::new(self.forest.add_child_set(set));
    }

    /// Removes the immediate successor `target`.
    pub fn remove(&mut self, target: &TargetRef) {
        if !self.contains(target) {
            return;
        }
        self.forest = Rc::new(self.forest.remove_child(target));
    }

    /// Blocks `target` in the leaves below the immediate successor `child`.
    pub fn block_in(&mut self, child: &TargetRef, target: &TargetRef) {
        if !self.forest.deep_find_in(child, target) {
            return;
        }
        self.forest = Rc::new(self.forest.block_leaf_in_child(child, target));
    }

    /// Blocks `target` in every leaf.
    pub fn block(&mut self, target: &TargetRef) {
        if !self.forest.deep_find(target) {
            return;
        }
        self.forest = Rc::new(self.forest.block_leaf(target));
    }

    /// Gets the final set of every path, with the confidence of reaching it.
    #[must_use]
    pub fn leafs(&self) -> Vec<(TargetsSet, f64)> {
        let mut leafs = Vec::new();
        self.forest.add_leafs(&mut leafs, self.forest.confidence());
        leafs
    }

    /// Gets the immediate successors with the confidence of reaching each.
    #[must_use]
    pub fn confidences(&self) -> Vec<(TargetsSet, f64)> {
        let parent = self.forest.confidence();
        self.forest
            .children()
            .map(|(set, layer)| (set.clone(), layer.confidence_under(parent)))
            .collect()
    }

    /// Divides the confidence of each path among the states that can reach
    /// it.
    pub fn divide_confidence_by_states(&mut self, reachable: &TargetToStates) {
        self.forest = self.forest.divide_confidence_by_states(reachable);
    }
}

#[cfg(test)]
mod test {
    use std::collections::{BTreeMap, BTreeSet};

    use crate::{
        program::BlockId,
        state::StateId,
        target::{ErrorLocation, ReachWithError, TargetCache, TargetForest, TargetsHistory, TargetsSet},
    };

    fn location() -> ErrorLocation {
        ErrorLocation {
            start_line:   1,
            end_line:     1,
            start_column: None,
            end_column:   None,
        }
    }

    #[test]
    fn stepping_follows_the_trace() -> anyhow::Result<()> {
        let cache = TargetCache::new();
        let a = cache.reach_block(BlockId(0), false);
        let b = cache.reach_block(BlockId(1), false);
        let error = cache.reproduce_error(vec![ReachWithError::DoubleFree], "t", location(), BlockId(2));

        let mut forest = TargetForest::new();
        forest.add_trace(&[
            TargetsSet::single(a.clone()),
            TargetsSet::single(b.clone()),
            TargetsSet::single(error.clone()),
        ]);
        assert_eq!(forest.targets(), vec![a.clone()]);
        assert!(forest.deep_contains(&error));

        forest.step_to(&b);
        assert_eq!(forest.targets(), vec![a.clone()]);

        forest.step_to(&a);
        assert_eq!(forest.targets(), vec![b.clone()]);
        assert_eq!(forest.history().len(), 1);
        assert!(a.is_reported());

        forest.step_to(&b);
        assert_eq!(forest.targets(), vec![error.clone()]);

        forest.step_to(&error);
        assert!(forest.is_empty());
        assert_eq!(forest.history().len(), 2);

        Ok(())
    }

    #[test]
    fn blocking_a_leaf_prunes_its_paths() {
        let cache = TargetCache::new();
        let a = cache.reach_block(BlockId(0), false);
        let x = cache.reproduce_error(vec![ReachWithError::UseAfterFree], "x", location(), BlockId(1));
        let y = cache.reproduce_error(vec![ReachWithError::DoubleFree], "y", location(), BlockId(2));

        let mut forest = TargetForest::new();
        forest.add_trace(&[TargetsSet::single(a.clone()), TargetsSet::single(x.clone())]);
        forest.add_trace(&[TargetsSet::single(a.clone()), TargetsSet::single(y.clone())]);
        assert_eq!(forest.leafs().len(), 2);

        forest.block(&x);
        assert!(!forest.deep_contains(&x));
        assert!(forest.deep_contains(&y));
        assert_eq!(forest.targets(), vec![a.clone()]);

        forest.block(&y);
        assert!(forest.is_empty());
    }

    #[test]
    fn confidence_is_divided_among_reaching_states() {
        let cache = TargetCache::new();
        let a = cache.reach_block(BlockId(0), false);
        let b = cache.reach_block(BlockId(1), false);

        let mut forest = TargetForest::new();
        forest.add_trace(&[TargetsSet::single(a.clone())]);
        forest.add_trace(&[TargetsSet::single(b.clone())]);

        let mut reachable = BTreeMap::new();
        reachable.insert(a.clone(), BTreeSet::from([StateId(0), StateId(1)]));
        reachable.insert(b.clone(), BTreeSet::from([StateId(0)]));
        forest.divide_confidence_by_states(&reachable);

        let confidences: BTreeMap<_, _> = forest.confidences().into_iter().collect();
        assert_eq!(confidences.get(&TargetsSet::single(a)), Some(&50.0));
        assert_eq!(confidences.get(&TargetsSet::single(b)), Some(&100.0));
    }

    #[test]
    fn histories_compare_by_contents() {
        let cache = TargetCache::new();
        let a = cache.reach_block(BlockId(0), false);
        let first = TargetsHistory::empty().add(a.clone());
        let second = TargetsHistory::empty().add(a);
        assert_eq!(first, second);
        assert!(TargetsHistory::empty() < first);
    }
}
