//! This module contains the [`CodeGraphDistance`], which answers static
//! reachability questions over the control-flow and call graphs of a
//! [`Program`].
//!
//! # How it Works
//!
//! Every query is a breadth-first search from a single block or function,
//! either following edges forwards (successors and callees) or backwards
//! (predecessors and callers). Each search result is memoized for the lifetime
//! of the `CodeGraphDistance`, as programs are immutable once built.

use std::{
    cell::RefCell,
    collections::{BTreeMap, VecDeque},
    hash::Hash,
    rc::Rc,
};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::program::{BlockId, FunctionId, Program};

/// The distances from a block to the blocks reachable from it.
pub type BlockDistances = Rc<BTreeMap<BlockId, u32>>;

/// The distances from a function to the functions reachable from it.
pub type FunctionDistances = Rc<BTreeMap<FunctionId, u32>>;

/// A memoizing oracle for distances in the program's graphs.
#[derive(Debug)]
pub struct CodeGraphDistance {
    program: Rc<Program>,

    block_distance:             RefCell<FxHashMap<BlockId, BlockDistances>>,
    block_backward_distance:    RefCell<FxHashMap<BlockId, BlockDistances>>,
    block_cycles:               RefCell<FxHashMap<BlockId, bool>>,
    sorted_block_distance:      RefCell<FxHashMap<BlockId, Rc<Vec<(BlockId, u32)>>>>,
    sorted_backward_distance:   RefCell<FxHashMap<BlockId, Rc<Vec<(BlockId, u32)>>>>,
    function_distance:          RefCell<FxHashMap<FunctionId, FunctionDistances>>,
    function_backward_distance: RefCell<FxHashMap<FunctionId, FunctionDistances>>,
}

impl CodeGraphDistance {
    #[must_use]
    pub fn new(program: Rc<Program>) -> Self {
        Self {
            program,
            block_distance: RefCell::default(),
            block_backward_distance: RefCell::default(),
            block_cycles: RefCell::default(),
            sorted_block_distance: RefCell::default(),
            sorted_backward_distance: RefCell::default(),
            function_distance: RefCell::default(),
            function_backward_distance: RefCell::default(),
        }
    }

    #[must_use]
    pub fn program(&self) -> &Rc<Program> {
        &self.program
    }

    fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.program
            .block(block)
            .map(|b| b.successors.clone())
            .unwrap_or_default()
    }

    fn predecessors(&self, block: BlockId) -> Vec<BlockId> {
        self.program
            .block(block)
            .map(|b| b.predecessors.clone())
            .unwrap_or_default()
    }

    fn compute_block_distance(&self, block: BlockId) {
        let (forward, cycle) = breadth_first(block, |b| self.successors(b));
        self.block_distance
            .borrow_mut()
            .insert(block, Rc::new(forward));
        self.block_cycles.borrow_mut().insert(block, cycle);
    }

    /// Gets the intra-function distance from `block` to every block reachable
    /// from it, including `block` itself at distance zero.
    #[must_use]
    pub fn distance(&self, block: BlockId) -> BlockDistances {
        if let Some(found) = self.block_distance.borrow().get(&block) {
            return found.clone();
        }
        self.compute_block_distance(block);
        self.block_distance
            .borrow()
            .get(&block)
            .cloned()
            .unwrap_or_default()
    }

    /// Gets the intra-function distance to `block` from every block that can
    /// reach it, including `block` itself at distance zero.
    #[must_use]
    pub fn backward_distance(&self, block: BlockId) -> BlockDistances {
        if let Some(found) = self.block_backward_distance.borrow().get(&block) {
            return found.clone();
        }
        let (backward, _) = breadth_first(block, |b| self.predecessors(b));
        let backward = Rc::new(backward);
        self.block_backward_distance
            .borrow_mut()
            .insert(block, backward.clone());
        backward
    }

    /// Checks whether `block` can reach itself through at least one edge.
    #[must_use]
    pub fn has_cycle(&self, block: BlockId) -> bool {
        if let Some(found) = self.block_cycles.borrow().get(&block) {
            return *found;
        }
        self.compute_block_distance(block);
        self.block_cycles
            .borrow()
            .get(&block)
            .copied()
            .unwrap_or(false)
    }

    /// Gets [`Self::distance`] ordered by distance, with ties broken by block.
    #[must_use]
    pub fn sorted_distance(&self, block: BlockId) -> Rc<Vec<(BlockId, u32)>> {
        if let Some(found) = self.sorted_block_distance.borrow().get(&block) {
            return found.clone();
        }
        let sorted = Rc::new(sort_by_distance(&self.distance(block)));
        self.sorted_block_distance
            .borrow_mut()
            .insert(block, sorted.clone());
        sorted
    }

    /// Gets [`Self::backward_distance`] ordered by distance, with ties broken
    /// by block.
    #[must_use]
    pub fn sorted_backward_distance(&self, block: BlockId) -> Rc<Vec<(BlockId, u32)>> {
        if let Some(found) = self.sorted_backward_distance.borrow().get(&block) {
            return found.clone();
        }
        let sorted = Rc::new(sort_by_distance(&self.backward_distance(block)));
        self.sorted_backward_distance
            .borrow_mut()
            .insert(block, sorted.clone());
        sorted
    }

    /// Gets the call-graph distance from `function` to every function it can
    /// transitively call, including itself at distance zero.
    #[must_use]
    pub fn function_distance(&self, function: FunctionId) -> FunctionDistances {
        if let Some(found) = self.function_distance.borrow().get(&function) {
            return found.clone();
        }
        let (forward, _) = breadth_first(function, |f| self.program.callees(f));
        let forward = Rc::new(forward);
        self.function_distance
            .borrow_mut()
            .insert(function, forward.clone());
        forward
    }

    /// Gets the call-graph distance to `function` from every function that can
    /// transitively call it, including itself at distance zero.
    #[must_use]
    pub fn backward_function_distance(&self, function: FunctionId) -> FunctionDistances {
        if let Some(found) = self.function_backward_distance.borrow().get(&function) {
            return found.clone();
        }
        let (backward, _) = breadth_first(function, |f| self.program.callers(f));
        let backward = Rc::new(backward);
        self.function_backward_distance
            .borrow_mut()
            .insert(function, backward.clone());
        backward
    }

    /// Gets the nearest blocks that can reach `block` and satisfy `predicate`,
    /// considering `block` itself first.
    ///
    /// Every satisfying block at the smallest distance is returned.
    pub fn nearest_predecessor_satisfying(
        &self,
        block: BlockId,
        predicate: impl Fn(BlockId) -> bool,
    ) -> Vec<BlockId> {
        nearest_satisfying(block, |b| self.predecessors(b), predicate)
    }

    /// Gets the nearest blocks reachable from `block` that satisfy
    /// `predicate`, considering `block` itself first.
    ///
    /// Every satisfying block at the smallest distance is returned.
    pub fn nearest_successor_satisfying(
        &self,
        block: BlockId,
        predicate: impl Fn(BlockId) -> bool,
    ) -> Vec<BlockId> {
        nearest_satisfying(block, |b| self.successors(b), predicate)
    }
}

/// Computes the distances from `start` along `neighbours`, along with whether
/// `start` is reachable from itself.
fn breadth_first<K>(start: K, neighbours: impl Fn(K) -> Vec<K>) -> (BTreeMap<K, u32>, bool)
where
    K: Copy + Ord + Hash,
{
    let mut distances = BTreeMap::new();
    let mut cycle = false;
    let mut queue = VecDeque::new();
    distances.insert(start, 0);
    queue.push_back(start);
    while let Some(current) = queue.pop_front() {
        let next = distances.get(&current).copied().unwrap_or(0) + 1;
        for neighbour in neighbours(current) {
            if neighbour == start {
                cycle = true;
            }
            if let std::collections::btree_map::Entry::Vacant(entry) = distances.entry(neighbour) {
                entry.insert(next);
                queue.push_back(neighbour);
            }
        }
    }
    (distances, cycle)
}

fn nearest_satisfying(
    start: BlockId,
    neighbours: impl Fn(BlockId) -> Vec<BlockId>,
    predicate: impl Fn(BlockId) -> bool,
) -> Vec<BlockId> {
    let mut visited = FxHashSet::default();
    let mut layer = vec![start];
    visited.insert(start);
    while !layer.is_empty() {
        let mut found: Vec<BlockId> = layer.iter().copied().filter(|b| predicate(*b)).collect();
        if !found.is_empty() {
            found.sort();
            return found;
        }
        let mut next = Vec::new();
        for block in layer {
            for neighbour in neighbours(block) {
                if visited.insert(neighbour) {
                    next.push(neighbour);
                }
            }
        }
        layer = next;
    }
    Vec::new()
}

fn sort_by_distance(distances: &BTreeMap<BlockId, u32>) -> Vec<(BlockId, u32)> {
    let mut sorted: Vec<(BlockId, u32)> = distances.iter().map(|(b, d)| (*b, *d)).collect();
    sorted.sort_by_key(|(b, d)| (*d, *b));
    sorted
}
