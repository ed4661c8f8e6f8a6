//! This module contains concrete evaluation of expressions under an assignment
//! of values to symbolic arrays.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::{
    constraint::ConstraintSet,
    expr::{builder::fold_binary, mask, sign_extend, ArrayId, Expr, ExprRef},
};

/// A concrete value for the bytes of some set of symbolic arrays.
///
/// Bytes that the assignment does not mention evaluate to zero.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    bindings: BTreeMap<ArrayId, Vec<u8>>,
}

impl Assignment {
    /// Creates an empty assignment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the contents of `array` to `bytes`.
    pub fn bind(&mut self, array: ArrayId, bytes: Vec<u8>) {
        self.bindings.insert(array, bytes);
    }

    /// Sets the byte at `index` of `array`, growing its binding as needed.
    pub fn set_byte(&mut self, array: ArrayId, index: u64, value: u8) {
        let Ok(index) = usize::try_from(index) else {
            return;
        };
        let bytes = self.bindings.entry(array).or_default();
        if bytes.len() <= index {
            bytes.resize(index + 1, 0);
        }
        bytes[index] = value;
    }

    /// Gets the bytes bound to `array`, if any.
    #[must_use]
    pub fn get(&self, array: ArrayId) -> Option<&[u8]> {
        self.bindings.get(&array).map(Vec::as_slice)
    }

    /// Gets the byte at `index` of `array`.
    #[must_use]
    pub fn byte(&self, array: ArrayId, index: u64) -> u8 {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.bindings.get(&array).and_then(|b| b.get(i)).copied())
            .unwrap_or(0)
    }

    /// Iterates over the bindings in array order.
    pub fn iter(&self) -> impl Iterator<Item = (&ArrayId, &Vec<u8>)> {
        self.bindings.iter()
    }

    /// Evaluates `expr` to a concrete value.
    #[must_use]
    pub fn evaluate(&self, expr: &ExprRef) -> u64 {
        Evaluator::new(self).eval(expr)
    }

    /// Evaluates the boolean `expr`.
    #[must_use]
    pub fn holds(&self, expr: &ExprRef) -> bool {
        self.evaluate(expr) != 0
    }

    /// Checks whether every constraint in `constraints` holds under this
    /// assignment.
    #[must_use]
    pub fn satisfies(&self, constraints: &ConstraintSet) -> bool {
        let mut evaluator = Evaluator::new(self);
        constraints.iter().all(|c| evaluator.eval(c) != 0)
    }

    /// Checks whether every expression in `exprs` holds under this assignment.
    #[must_use]
    pub fn satisfies_all<'a>(&self, exprs: impl IntoIterator<Item = &'a ExprRef>) -> bool {
        let mut evaluator = Evaluator::new(self);
        exprs.into_iter().all(|c| evaluator.eval(c) != 0)
    }
}

/// A memoizing evaluator over a single assignment.
pub(crate) struct Evaluator<'a> {
    assignment: &'a Assignment,
    cache:      FxHashMap<u64, u64>,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(assignment: &'a Assignment) -> Self {
        Self {
            assignment,
            cache: FxHashMap::default(),
        }
    }

    pub(crate) fn eval(&mut self, expr: &ExprRef) -> u64 {
        if let Some(value) = self.cache.get(&expr.id()) {
            return *value;
        }
        let value = self.compute(expr) & mask(expr.width());
        self.cache.insert(expr.id(), value);
        value
    }

    fn compute(&mut self, expr: &ExprRef) -> u64 {
        match expr.kind() {
            Expr::Constant { value, .. } => *value,
            Expr::Read { updates, index } => {
                let index = self.eval(index);
                for node in updates.iter() {
                    if self.eval(node.index()) == index {
                        return self.eval(node.value());
                    }
                }
                let root = updates.root();
                root.constant_byte(index)
                    .unwrap_or_else(|| self.assignment.byte(root.id(), index))
                    .into()
            }
            Expr::Select {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond) != 0 {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Concat { high, low } => {
                let h = self.eval(high);
                let l = self.eval(low);
                if low.width() >= 64 {
                    l
                } else {
                    (h << low.width()) | l
                }
            }
            Expr::Extract { expr, offset, .. } => {
                let value = self.eval(expr);
                if *offset >= 64 {
                    0
                } else {
                    value >> offset
                }
            }
            Expr::ZExt { expr, .. } => self.eval(expr),
            Expr::SExt { expr, width } => {
                let value = self.eval(expr);
                sign_extend(value, expr.width(), *width)
            }
            Expr::Not { expr } => !self.eval(expr),
            Expr::Binary { op, lhs, rhs } => {
                let l = self.eval(lhs);
                let r = self.eval(rhs);
                fold_binary(*op, l, r, lhs.width())
            }
            Expr::Compare { op, lhs, rhs } => {
                let l = self.eval(lhs);
                let r = self.eval(rhs);
                u64::from(op.apply(l, r, lhs.width()))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use crate::expr::{ArraySource, Assignment, Context, ExprBuilder, UpdateList};

    #[test]
    fn evaluates_reads_through_symbolic_updates() {
        let builder = ExprBuilder::new(Context::default());
        let input = builder.create_array("input", 2, ArraySource::MakeSymbolic);
        let buffer = builder.create_array("buffer", 4, ArraySource::Zeroed);
        let input_list = UpdateList::new(input.clone());

        let index = builder.zext(&builder.read(&input_list, &builder.pointer(0)), 64);
        let updates = UpdateList::new(buffer).extend(index.clone(), builder.constant(42, 8));
        let read_back = builder.read(&updates, &builder.pointer(2));

        let mut assignment = Assignment::new();
        assignment.bind(input.id(), vec![2, 0]);
        assert_eq!(assignment.evaluate(&read_back), 42);

        assignment.bind(input.id(), vec![1, 0]);
        assert_eq!(assignment.evaluate(&read_back), 0);
    }

    #[test]
    fn unbound_bytes_read_as_zero() {
        let builder = ExprBuilder::new(Context::default());
        let input = builder.create_array("input", 1, ArraySource::MakeSymbolic);
        let x = builder.read(&UpdateList::new(input), &builder.pointer(0));
        let is_zero = builder.is_zero(&x);
        assert!(Assignment::new().holds(&is_zero));
    }
}
