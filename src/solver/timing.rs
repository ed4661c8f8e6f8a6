//! This module contains the [`TimingSolver`], which is the solver interface
//! that the rest of the engine talks to.

use std::{
    cell::RefCell,
    rc::Rc,
    time::{Duration, Instant},
};

use derivative::Derivative;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    constraint::ConstraintSet,
    error::solver::{Error, Result},
    expr::{mask, Array, Assignment, ExprBuilder, ExprRef},
    solver::{Assumption, PartialValidity, Solver, Validity},
};

/// Statistics about the queries issued through a [`TimingSolver`].
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SolverStats {
    /// The number of queries issued.
    pub queries: u64,

    /// The number of queries that ended in an error.
    pub failures: u64,

    /// The number of queries that ran out of time.
    pub timeouts: u64,

    /// The total time spent answering queries.
    pub time: Duration,
}

/// A wrapper around a [`Solver`] that applies the configured timeout to every
/// query and records statistics about them.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct TimingSolver {
    #[derivative(Debug = "ignore")]
    solver: Box<dyn Solver>,

    builder: Rc<ExprBuilder>,

    timeout: Duration,

    stats: RefCell<SolverStats>,
}

impl TimingSolver {
    /// Wraps `solver`, using `builder` to construct the auxiliary queries that
    /// some operations need.
    #[must_use]
    pub fn new(solver: Box<dyn Solver>, builder: Rc<ExprBuilder>, timeout: Duration) -> Self {
        Self {
            solver,
            builder,
            timeout,
            stats: RefCell::new(SolverStats::default()),
        }
    }

    /// Gets the timeout applied to each query.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Gets a snapshot of the query statistics.
    #[must_use]
    pub fn stats(&self) -> SolverStats {
        self.stats.borrow().clone()
    }

    /// Gets the name of the wrapped solver.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.solver.name()
    }

    fn timed<T>(&self, query: impl FnOnce(&dyn Solver, Duration) -> Result<T>) -> Result<T> {
        let started = Instant::now();
        let result = query(self.solver.as_ref(), self.timeout);
        let mut stats = self.stats.borrow_mut();
        stats.queries += 1;
        stats.time += started.elapsed();
        if let Err(error) = &result {
            stats.failures += 1;
            if matches!(error, Error::Timeout { .. }) {
                stats.timeouts += 1;
            }
            debug!(solver = self.solver.name(), %error, "Solver query failed");
        }
        result
    }

    /// Finds a model of `constraints` under `assumptions`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the query cannot be decided in time.
    pub fn check(
        &self,
        constraints: &ConstraintSet,
        assumptions: &[Assumption],
    ) -> Result<Option<Assignment>> {
        self.timed(|s, t| s.check(constraints, assumptions, t))
    }

    /// Determines the validity of the boolean `expr` under `constraints`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the query cannot be decided in time.
    pub fn evaluate(&self, constraints: &ConstraintSet, expr: &ExprRef) -> Result<Validity> {
        if let Some(value) = expr.as_constant() {
            return Ok(if value == 0 {
                Validity::False
            } else {
                Validity::True
            });
        }
        self.timed(|s, t| s.evaluate(constraints, expr, t))
    }

    /// Determines the validity of the boolean `expr` under `constraints`,
    /// asking only about the side selected by `only`.
    ///
    /// With `only` set to `Some(true)` the solver is only asked whether `expr`
    /// may be true, producing [`PartialValidity::MayBeTrue`] or
    /// [`PartialValidity::MustBeFalse`]. `Some(false)` is the mirror image, and
    /// [`None`] asks for the full validity.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the query cannot be decided in time.
    pub fn evaluate_partial(
        &self,
        constraints: &ConstraintSet,
        expr: &ExprRef,
        only: Option<bool>,
    ) -> Result<PartialValidity> {
        match only {
            None => Ok(self.evaluate(constraints, expr)?.into()),
            Some(true) => Ok(if self.may_be_true(constraints, expr)? {
                PartialValidity::MayBeTrue
            } else {
                PartialValidity::MustBeFalse
            }),
            Some(false) => Ok(if self.may_be_false(constraints, expr)? {
                PartialValidity::MayBeFalse
            } else {
                PartialValidity::MustBeTrue
            }),
        }
    }

    /// Checks whether the boolean `expr` can hold under `constraints`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the query cannot be decided in time.
    pub fn may_be_true(&self, constraints: &ConstraintSet, expr: &ExprRef) -> Result<bool> {
        if let Some(value) = expr.as_constant() {
            return Ok(value != 0);
        }
        self.timed(|s, t| s.may_be_true(constraints, expr, t))
    }

    /// Checks whether the boolean `expr` holds in every model of
    /// `constraints`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the query cannot be decided in time.
    pub fn must_be_true(&self, constraints: &ConstraintSet, expr: &ExprRef) -> Result<bool> {
        if let Some(value) = expr.as_constant() {
            return Ok(value != 0);
        }
        self.timed(|s, t| s.must_be_true(constraints, expr, t))
    }

    /// Checks whether the boolean `expr` can fail to hold under `constraints`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the query cannot be decided in time.
    pub fn may_be_false(&self, constraints: &ConstraintSet, expr: &ExprRef) -> Result<bool> {
        Ok(!self.must_be_true(constraints, expr)?)
    }

    /// Checks whether the boolean `expr` fails in every model of
    /// `constraints`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the query cannot be decided in time.
    pub fn must_be_false(&self, constraints: &ConstraintSet, expr: &ExprRef) -> Result<bool> {
        Ok(!self.may_be_true(constraints, expr)?)
    }

    /// Gets a value that `expr` may take under `constraints`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the query cannot be decided in time or the
    /// constraints are unsatisfiable.
    pub fn get_value(&self, constraints: &ConstraintSet, expr: &ExprRef) -> Result<u64> {
        if let Some(value) = expr.as_constant() {
            return Ok(value);
        }
        self.timed(|s, t| s.get_value(constraints, expr, t))
    }

    /// Gets concrete contents for `arrays` that satisfy `constraints`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the query cannot be decided in time or the
    /// constraints are unsatisfiable.
    pub fn get_initial_values(
        &self,
        constraints: &ConstraintSet,
        arrays: &[Rc<Array>],
    ) -> Result<Assignment> {
        self.timed(|s, t| s.get_initial_values(constraints, arrays, t))
    }

    /// Gets the smallest value of `expr` under `constraints`, if it is at most
    /// `bound`, by binary search.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if any query cannot be decided in time.
    pub fn min_value_up_to(
        &self,
        constraints: &ConstraintSet,
        expr: &ExprRef,
        bound: u64,
    ) -> Result<Option<u64>> {
        let width = expr.width();
        let bound = bound.min(mask(width));
        let at_most = |v: u64| self.builder.ule(expr, &self.builder.constant(v, width));
        if !self.may_be_true(constraints, &at_most(bound))? {
            return Ok(None);
        }
        let (mut lo, mut hi) = (0u64, bound);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.may_be_true(constraints, &at_most(mid))? {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        Ok(Some(lo))
    }

    /// Gets the unsigned range of values that `expr` may take under
    /// `constraints`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if any query cannot be decided in time.
    pub fn get_range(&self, constraints: &ConstraintSet, expr: &ExprRef) -> Result<(u64, u64)> {
        if let Some(value) = expr.as_constant() {
            return Ok((value, value));
        }
        let width = expr.width();
        let value = self.get_value(constraints, expr)?;

        let (mut lo, mut hi) = (0u64, value);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let at_most = self.builder.ule(expr, &self.builder.constant(mid, width));
            if self.may_be_true(constraints, &at_most)? {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        let min = lo;

        let (mut lo, mut hi) = (value, mask(width));
        while lo < hi {
            let mid = hi - (hi - lo) / 2;
            let at_least = self.builder.uge(expr, &self.builder.constant(mid, width));
            if self.may_be_true(constraints, &at_least)? {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        Ok((min, lo))
    }
}

#[cfg(test)]
mod test {
    use std::{rc::Rc, time::Duration};

    use crate::{
        constraint::ConstraintSet,
        error::solver::{Error, Result},
        expr::{ArraySource, Assignment, Context, ExprBuilder, UpdateList},
        solver::{Assumption, EnumerationSolver, PartialValidity, Solver, TimingSolver},
    };

    /// A solver that never answers in time.
    struct Stalling;

    impl Solver for Stalling {
        fn name(&self) -> &'static str {
            "stalling"
        }

        fn check(&self, _: &ConstraintSet, _: &[Assumption], timeout: Duration) -> Result<Option<Assignment>> {
            Err(Error::Timeout { timeout })
        }
    }

    fn solver(builder: &Rc<ExprBuilder>) -> TimingSolver {
        TimingSolver::new(
            Box::new(EnumerationSolver::new()),
            builder.clone(),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn can_get_range() -> anyhow::Result<()> {
        let builder = Rc::new(ExprBuilder::new(Context::default()));
        let solver = solver(&builder);
        let array = builder.create_array("x", 1, ArraySource::MakeSymbolic);
        let x = builder.read(&UpdateList::new(array), &builder.pointer(0));

        let mut constraints = ConstraintSet::new();
        constraints.add(builder.uge(&x, &builder.constant(10, 8)));
        constraints.add(builder.ult(&x, &builder.constant(20, 8)));

        assert_eq!(solver.get_range(&constraints, &x)?, (10, 19));
        assert_eq!(solver.min_value_up_to(&constraints, &x, 255)?, Some(10));
        assert_eq!(solver.min_value_up_to(&constraints, &x, 5)?, None);
        assert!(solver.stats().queries > 0);

        Ok(())
    }

    #[test]
    fn can_ask_about_one_side_only() -> anyhow::Result<()> {
        let builder = Rc::new(ExprBuilder::new(Context::default()));
        let solver = solver(&builder);
        let array = builder.create_array("x", 1, ArraySource::MakeSymbolic);
        let x = builder.read(&UpdateList::new(array), &builder.pointer(0));
        let cond = builder.ult(&x, &builder.constant(5, 8));
        let constraints = ConstraintSet::new();

        assert_eq!(
            solver.evaluate_partial(&constraints, &cond, None)?,
            PartialValidity::TrueOrFalse
        );
        assert_eq!(
            solver.evaluate_partial(&constraints, &cond, Some(true))?,
            PartialValidity::MayBeTrue
        );
        assert_eq!(
            solver.evaluate_partial(&constraints, &cond, Some(false))?,
            PartialValidity::MayBeFalse
        );

        Ok(())
    }

    #[test]
    fn counts_queries_that_time_out() {
        let builder = Rc::new(ExprBuilder::new(Context::default()));
        let timeout = Duration::from_millis(5);
        let solver = TimingSolver::new(Box::new(Stalling), builder.clone(), timeout);
        let array = builder.create_array("x", 1, ArraySource::MakeSymbolic);
        let x = builder.read(&UpdateList::new(array), &builder.pointer(0));
        let cond = builder.ult(&x, &builder.constant(5, 8));

        assert_eq!(
            solver.may_be_true(&ConstraintSet::new(), &cond),
            Err(Error::Timeout { timeout })
        );
        let stats = solver.stats();
        assert_eq!(stats.queries, 1);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.timeouts, 1);
    }
}
