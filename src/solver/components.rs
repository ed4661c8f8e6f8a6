//! This module contains a small
//! [Disjoint Set](https://en.wikipedia.org/wiki/Disjoint-set_data_structure)
//! used to split a query into groups of constraints that share no inputs.
//!
//! Each group can then be solved on its own, which keeps the search space of
//! every group small.

/// A union-find forest over the indices `0..len`, where each set carries the
/// list of items that have been attached to it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Components<T> {
    reps:  Vec<usize>,
    items: Vec<Vec<T>>,
}

impl<T> Components<T> {
    /// Constructs a forest of `len` singleton sets.
    #[must_use]
    pub fn new(len: usize) -> Self {
        let reps = (0..len).collect();
        let items = (0..len).map(|_| Vec::new()).collect();
        Self { reps, items }
    }

    /// Finds the representative of the set containing `value`.
    ///
    /// # Mutability
    ///
    /// This function is mutable as it compresses paths as it walks them.
    pub fn find(&mut self, value: usize) -> usize {
        let mut root = value;
        while self.reps[root] != root {
            root = self.reps[root];
        }
        let mut current = value;
        while self.reps[current] != root {
            let next = self.reps[current];
            self.reps[current] = root;
            current = next;
        }
        root
    }

    /// Merges the set containing `a` with the set containing `b`, combining
    /// their items.
    pub fn union(&mut self, a: usize, b: usize) {
        let a = self.find(a);
        let b = self.find(b);
        if a == b {
            return;
        }
        let moved = std::mem::take(&mut self.items[b]);
        self.items[a].extend(moved);
        self.reps[b] = a;
    }

    /// Attaches `item` to the set containing `value`.
    pub fn add_item(&mut self, value: usize, item: T) {
        let root = self.find(value);
        self.items[root].push(item);
    }

    /// Consumes the forest, producing each set as its member indices along
    /// with its items. Sets are ordered by their smallest member.
    #[must_use]
    pub fn into_sets(mut self) -> Vec<(Vec<usize>, Vec<T>)> {
        let len = self.reps.len();
        let mut members: Vec<Vec<usize>> = (0..len).map(|_| Vec::new()).collect();
        for value in 0..len {
            let root = self.find(value);
            members[root].push(value);
        }
        let mut sets: Vec<(Vec<usize>, Vec<T>)> = members
            .into_iter()
            .zip(self.items)
            .filter(|(m, _)| !m.is_empty())
            .collect();
        sets.sort_by_key(|(m, _)| m[0]);
        sets
    }
}

#[cfg(test)]
mod test {
    use crate::solver::components::Components;

    #[test]
    fn merges_sets_with_their_items() {
        let mut components = Components::new(4);
        components.add_item(0, "a");
        components.add_item(2, "b");
        components.union(0, 2);
        components.add_item(3, "c");

        assert_eq!(components.find(2), components.find(0));
        assert_ne!(components.find(1), components.find(0));

        let sets = components.into_sets();
        assert_eq!(sets.len(), 3);
        assert_eq!(sets[0].0, vec![0, 2]);
        assert_eq!(sets[0].1, vec!["a", "b"]);
        assert_eq!(sets[1].0, vec![1]);
        assert_eq!(sets[2].1, vec!["c"]);
    }
}
