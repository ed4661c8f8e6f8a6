//! This module contains the path condition of an execution state.

use std::rc::Rc;

use crate::expr::{Array, ExprRef};

/// An ordered, persistent conjunction of boolean expressions.
///
/// Cloning a constraint set is cheap, and the clones share structure until
/// either of them is extended.
#[derive(Clone, Debug, Default)]
pub struct ConstraintSet {
    constraints: imbl::Vector<ExprRef>,
}

impl ConstraintSet {
    /// Creates an empty constraint set, which is trivially satisfiable.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `constraint` to the set.
    ///
    /// Constant `true` constraints carry no information and are skipped.
    pub fn add(&mut self, constraint: ExprRef) {
        if constraint.is_true() {
            return;
        }
        self.constraints.push_back(constraint);
    }

    /// Checks whether the set contains the constant `false`, and hence has no
    /// solutions.
    #[must_use]
    pub fn is_trivially_false(&self) -> bool {
        self.constraints.iter().any(ExprRef::is_false)
    }

    /// Gets the number of constraints in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    /// Checks if the set has no constraints.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Iterates over the constraints in the order they were added.
    pub fn iter(&self) -> impl Iterator<Item = &ExprRef> {
        self.constraints.iter()
    }

    /// Collects every array that the constraints read from.
    #[must_use]
    pub fn arrays(&self) -> Vec<Rc<Array>> {
        let mut arrays: Vec<Rc<Array>> = self.constraints.iter().flat_map(ExprRef::arrays).collect();
        arrays.sort_by_key(|a| a.id());
        arrays.dedup_by_key(|a| a.id());
        arrays
    }
}

impl<'a> IntoIterator for &'a ConstraintSet {
    type IntoIter = imbl::vector::Iter<'a, ExprRef>;
    type Item = &'a ExprRef;

    fn into_iter(self) -> Self::IntoIter {
        self.constraints.iter()
    }
}

#[cfg(test)]
mod test {
    use crate::{
        constraint::ConstraintSet,
        expr::{ArraySource, Context, ExprBuilder, UpdateList},
    };

    #[test]
    fn skips_true_and_detects_false() {
        let builder = ExprBuilder::new(Context::default());
        let mut constraints = ConstraintSet::new();
        constraints.add(builder.true_expr());
        assert!(constraints.is_empty());

        let array = builder.create_array("x", 1, ArraySource::MakeSymbolic);
        let x = builder.read(&UpdateList::new(array), &builder.pointer(0));
        constraints.add(builder.is_zero(&x));
        let branch = constraints.clone();
        constraints.add(builder.false_expr());

        assert_eq!(branch.len(), 1);
        assert!(!branch.is_trivially_false());
        assert!(constraints.is_trivially_false());
        assert_eq!(constraints.arrays().len(), 1);
    }
}
