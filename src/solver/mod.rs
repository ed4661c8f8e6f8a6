//! This module contains the interface through which the engine asks questions
//! about path conditions, along with the built-in [`EnumerationSolver`] and the
//! [`TimingSolver`] wrapper that the executor talks to.
//!
//! # Queries
//!
//! Every query consists of a path condition (a [`ConstraintSet`]) and a set of
//! [`Assumption`]s that must additionally hold. The only primitive a solver
//! must provide is [`Solver::check`], which finds a model for the query or
//! proves that none exists. Everything else is derived from it.

pub mod components;
pub mod enumeration;
pub mod timing;

use std::{rc::Rc, time::Duration};

pub use enumeration::EnumerationSolver;
use serde::{Deserialize, Serialize};
pub use timing::{SolverStats, TimingSolver};

use crate::{
    constraint::ConstraintSet,
    error::solver::{Error, Result},
    expr::{Array, Assignment, ExprRef},
};

/// The answer to whether a boolean expression holds under a path condition.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum Validity {
    /// The expression holds for every model of the path condition.
    True,

    /// The expression holds for no model of the path condition.
    False,

    /// The expression holds for some models but not for others.
    Unknown,
}

/// The answer used when deciding how to fork a state.
///
/// The `May` variants are produced when only one side of a branch was asked
/// about, because the other side was already known to be uninteresting. They
/// say nothing about whether the other side is feasible.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum PartialValidity {
    /// The condition is provably true.
    MustBeTrue,

    /// The condition is provably false.
    MustBeFalse,

    /// The condition can be true, and the false side was not asked about.
    MayBeTrue,

    /// The condition can be false, and the true side was not asked about.
    MayBeFalse,

    /// The condition can be both true and false.
    TrueOrFalse,

    /// No answer could be produced.
    None,
}

impl From<Validity> for PartialValidity {
    fn from(value: Validity) -> Self {
        match value {
            Validity::True => Self::MustBeTrue,
            Validity::False => Self::MustBeFalse,
            Validity::Unknown => Self::TrueOrFalse,
        }
    }
}

/// A boolean expression that is required to take a particular truth value in a
/// query.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Assumption {
    /// The boolean expression.
    pub expr: ExprRef,

    /// Whether `expr` is required to be true (`true`) or false (`false`).
    pub holds: bool,
}

impl Assumption {
    /// Requires `expr` to be true.
    #[must_use]
    pub fn holds(expr: &ExprRef) -> Self {
        Self {
            expr:  expr.clone(),
            holds: true,
        }
    }

    /// Requires `expr` to be false.
    #[must_use]
    pub fn fails(expr: &ExprRef) -> Self {
        Self {
            expr:  expr.clone(),
            holds: false,
        }
    }

    /// Checks whether the assumption is satisfied by `assignment`.
    #[must_use]
    pub fn is_satisfied_by(&self, assignment: &Assignment) -> bool {
        assignment.holds(&self.expr) == self.holds
    }
}

/// A decision procedure for path conditions.
///
/// Implementations must never return a guessed answer. When a query cannot be
/// decided in the time allotted, or lies outside the fragment that the solver
/// supports, an [`Error`] is returned instead.
pub trait Solver {
    /// Gets a short name for the solver, used in diagnostics.
    fn name(&self) -> &'static str;

    /// Finds an assignment that satisfies `constraints` and every one of the
    /// `assumptions`, returning [`None`] if there is provably no such
    /// assignment.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the query cannot be decided within `timeout`.
    fn check(
        &self,
        constraints: &ConstraintSet,
        assumptions: &[Assumption],
        timeout: Duration,
    ) -> Result<Option<Assignment>>;

    /// Determines whether the boolean `expr` must, may, or cannot hold under
    /// `constraints`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the query cannot be decided within `timeout`.
    fn evaluate(
        &self,
        constraints: &ConstraintSet,
        expr: &ExprRef,
        timeout: Duration,
    ) -> Result<Validity> {
        if let Some(value) = expr.as_constant() {
            return Ok(if value == 0 {
                Validity::False
            } else {
                Validity::True
            });
        }
        if self.check(constraints, &[Assumption::holds(expr)], timeout)?.is_none() {
            return Ok(Validity::False);
        }
        if self.check(constraints, &[Assumption::fails(expr)], timeout)?.is_none() {
            return Ok(Validity::True);
        }
        Ok(Validity::Unknown)
    }

    /// Checks whether the boolean `expr` can hold under `constraints`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the query cannot be decided within `timeout`.
    fn may_be_true(
        &self,
        constraints: &ConstraintSet,
        expr: &ExprRef,
        timeout: Duration,
    ) -> Result<bool> {
        if let Some(value) = expr.as_constant() {
            return Ok(value != 0);
        }
        Ok(self
            .check(constraints, &[Assumption::holds(expr)], timeout)?
            .is_some())
    }

    /// Checks whether the boolean `expr` holds for every model of
    /// `constraints`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the query cannot be decided within `timeout`.
    fn must_be_true(
        &self,
        constraints: &ConstraintSet,
        expr: &ExprRef,
        timeout: Duration,
    ) -> Result<bool> {
        if let Some(value) = expr.as_constant() {
            return Ok(value != 0);
        }
        Ok(self
            .check(constraints, &[Assumption::fails(expr)], timeout)?
            .is_none())
    }

    /// Checks whether the boolean `expr` can fail to hold under `constraints`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the query cannot be decided within `timeout`.
    fn may_be_false(
        &self,
        constraints: &ConstraintSet,
        expr: &ExprRef,
        timeout: Duration,
    ) -> Result<bool> {
        Ok(!self.must_be_true(constraints, expr, timeout)?)
    }

    /// Checks whether the boolean `expr` fails to hold for every model of
    /// `constraints`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the query cannot be decided within `timeout`.
    fn must_be_false(
        &self,
        constraints: &ConstraintSet,
        expr: &ExprRef,
        timeout: Duration,
    ) -> Result<bool> {
        Ok(!self.may_be_true(constraints, expr, timeout)?)
    }

    /// Gets a value that `expr` can take under `constraints`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the query cannot be decided within `timeout`, or if
    /// `constraints` are unsatisfiable.
    fn get_value(
        &self,
        constraints: &ConstraintSet,
        expr: &ExprRef,
        timeout: Duration,
    ) -> Result<u64> {
        if let Some(value) = expr.as_constant() {
            return Ok(value);
        }
        let model = self
            .check(constraints, &[], timeout)?
            .ok_or(Error::Unsatisfiable)?;
        Ok(model.evaluate(expr))
    }

    /// Gets concrete contents for each of the `arrays` that together satisfy
    /// `constraints`.
    ///
    /// The returned assignment binds every byte of every requested array.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the query cannot be decided within `timeout`, or if
    /// `constraints` are unsatisfiable.
    fn get_initial_values(
        &self,
        constraints: &ConstraintSet,
        arrays: &[Rc<Array>],
        timeout: Duration,
    ) -> Result<Assignment> {
        let model = self
            .check(constraints, &[], timeout)?
            .ok_or(Error::Unsatisfiable)?;
        let mut values = Assignment::new();
        for array in arrays {
            let bytes = (0..array.size())
                .map(|i| {
                    array
                        .constant_byte(i)
                        .unwrap_or_else(|| model.byte(array.id(), i))
                })
                .collect();
            values.bind(array.id(), bytes);
        }
        Ok(values)
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use crate::{
        constraint::ConstraintSet,
        expr::{ArraySource, Context, ExprBuilder, UpdateList},
        solver::{EnumerationSolver, Solver, Validity},
    };

    #[test]
    fn can_evaluate_validity() -> anyhow::Result<()> {
        let builder = ExprBuilder::new(Context::default());
        let solver = EnumerationSolver::new();
        let timeout = Duration::from_secs(1);
        let array = builder.create_array("x", 1, ArraySource::MakeSymbolic);
        let x = builder.read(&UpdateList::new(array), &builder.pointer(0));

        let mut constraints = ConstraintSet::new();
        constraints.add(builder.ult(&x, &builder.constant(10, 8)));

        let small = builder.ult(&x, &builder.constant(20, 8));
        let five = builder.eq(&x, &builder.constant(5, 8));
        let big = builder.ugt(&x, &builder.constant(50, 8));

        assert_eq!(solver.evaluate(&constraints, &small, timeout)?, Validity::True);
        assert_eq!(solver.evaluate(&constraints, &five, timeout)?, Validity::Unknown);
        assert_eq!(solver.evaluate(&constraints, &big, timeout)?, Validity::False);

        Ok(())
    }

    #[test]
    fn can_get_initial_values() -> anyhow::Result<()> {
        let builder = ExprBuilder::new(Context::default());
        let solver = EnumerationSolver::new();
        let array = builder.create_array("x", 2, ArraySource::MakeSymbolic);
        let updates = UpdateList::new(array.clone());
        let x = builder.read(&updates, &builder.pointer(1));

        let mut constraints = ConstraintSet::new();
        constraints.add(builder.eq(&x, &builder.constant(0x2a, 8)));

        let values =
            solver.get_initial_values(&constraints, &[array.clone()], Duration::from_secs(1))?;
        assert_eq!(values.get(array.id()), Some(&[0, 0x2a][..]));

        Ok(())
    }
}
