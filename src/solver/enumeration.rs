//! This module contains the [`EnumerationSolver`], the engine's built-in
//! decision procedure.
//!
//! # How it Works
//!
//! The solver treats every run of consecutive constant-index reads from a
//! symbolic array as a single input _word_. A query is split into groups of
//! constraints that share no words, and each group is solved by searching over
//! candidate values for its words.
//!
//! Candidates are the values at which the truth of a comparison against the
//! constants of the group can change: each constant, the differences between
//! pairs of constants, their neighbours, and the boundaries of the signed and
//! unsigned ranges. For a group over a single word in which every comparison
//! is between that word (plus a constant offset) and a constant, the set of
//! satisfying values is a union of intervals whose endpoints are all
//! candidates, so failing to find a model proves that there is none. Groups
//! over few enough bits are instead searched exhaustively. Any other group can
//! still be satisfied by a candidate, but if none is found the solver reports
//! that the query is incomplete rather than claiming it is unsatisfiable.

use std::{
    collections::BTreeSet,
    time::{Duration, Instant},
};

use rustc_hash::FxHashSet;

use crate::{
    constant::{
        BOOL_WIDTH_BITS,
        BYTE_WIDTH_BITS,
        ENUMERATION_SOLVER_MAX_CANDIDATES,
        ENUMERATION_SOLVER_TIMEOUT_CHECK_INTERVAL,
        EXHAUSTIVE_SEARCH_MAX_BITS,
        MAX_EXPR_WIDTH_BITS,
    },
    constraint::ConstraintSet,
    error::solver::{Error, Result},
    expr::{eval::Evaluator, mask, ArrayId, Assignment, BinaryOp, Expr, ExprRef, Width},
    solver::{components::Components, Assumption, Solver},
};

/// The largest number of distinct constants used to derive candidates for a
/// word. Groups with more constants than this lose their exactness.
const MAX_CANDIDATE_CONSTANTS: usize = 64;

/// A decision procedure based on the enumeration of candidate input values.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnumerationSolver {
    /// The number of candidate assignments that may be tried in one query.
    max_candidates: u64,

    /// The number of input bits below which a group is searched exhaustively.
    exhaustive_bits: u32,
}

impl EnumerationSolver {
    /// Constructs a solver with the default limits.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_candidates:  ENUMERATION_SOLVER_MAX_CANDIDATES,
            exhaustive_bits: EXHAUSTIVE_SEARCH_MAX_BITS,
        }
    }

    /// Sets the number of candidate assignments that may be tried in one query.
    #[must_use]
    pub fn with_max_candidates(mut self, value: u64) -> Self {
        self.max_candidates = value;
        self
    }

    /// Sets the number of input bits below which a group of constraints is
    /// searched exhaustively.
    #[must_use]
    pub fn with_exhaustive_bits(mut self, value: u32) -> Self {
        self.exhaustive_bits = value;
        self
    }
}

impl Default for EnumerationSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Solver for EnumerationSolver {
    fn name(&self) -> &'static str {
        "enumeration"
    }

    fn check(
        &self,
        constraints: &ConstraintSet,
        assumptions: &[Assumption],
        timeout: Duration,
    ) -> Result<Option<Assignment>> {
        let formulas: Vec<Assumption> = constraints
            .iter()
            .map(Assumption::holds)
            .chain(assumptions.iter().cloned())
            .collect();

        let mut budget = Budget {
            started: Instant::now(),
            timeout,
            tried: 0,
            limit: self.max_candidates,
        };

        let mut analyses = Vec::with_capacity(formulas.len());
        let mut all_words = BTreeSet::new();
        for formula in &formulas {
            if let Some(value) = formula.expr.as_constant() {
                if (value != 0) != formula.holds {
                    return Ok(None);
                }
                continue;
            }
            let analysis = Analysis::of(&formula.expr);
            all_words.extend(analysis.words.iter().copied());
            analyses.push((formula, analysis));
        }

        let vars = merge_words(&all_words);
        let mut components = Components::new(vars.len());
        let mut free_formulas = Vec::new();
        for (formula, analysis) in analyses {
            let members = analysis.variables(&vars);
            match members.first() {
                Some(&first) => {
                    for &other in &members[1..] {
                        components.union(first, other);
                    }
                    components.add_item(first, (formula, analysis));
                }
                None => free_formulas.push((formula, analysis)),
            }
        }

        // Formulas without inputs only depend on bytes that read as zero.
        let empty = Assignment::new();
        for (formula, analysis) in &free_formulas {
            if !formula.is_satisfied_by(&empty) {
                if analysis.opaque_arrays.is_empty() {
                    return Ok(None);
                }
                return Err(Error::incomplete(
                    "a constraint reads symbolic memory at a symbolic index",
                ));
            }
        }

        let mut model = Assignment::new();
        for (members, group) in components.into_sets() {
            if group.is_empty() {
                continue;
            }
            let group_vars: Vec<Word> = members.iter().map(|&i| vars[i]).collect();
            match self.solve_group(&group_vars, &group, &mut budget)? {
                GroupResult::Model(values) => {
                    for (var, value) in group_vars.iter().zip(values) {
                        var.write(value, &mut model);
                    }
                }
                GroupResult::Unsatisfiable => return Ok(None),
                GroupResult::Unknown => {
                    return Err(Error::incomplete(
                        "no candidate satisfied constraints outside the decidable fragment",
                    ));
                }
            }
        }

        let mut evaluator = Evaluator::new(&model);
        let consistent = formulas
            .iter()
            .all(|f| (evaluator.eval(&f.expr) != 0) == f.holds);
        if !consistent {
            return Err(Error::incomplete(
                "independently solved constraint groups interfere through memory",
            ));
        }

        Ok(Some(model))
    }
}

impl EnumerationSolver {
    fn solve_group(
        &self,
        vars: &[Word],
        group: &[(&Assumption, Analysis)],
        budget: &mut Budget,
    ) -> Result<GroupResult> {
        let formulas: Vec<&Assumption> = group.iter().map(|(f, _)| *f).collect();
        let opaque = group.iter().any(|(_, a)| !a.opaque_arrays.is_empty());
        let total_bits: u32 = vars.iter().map(Word::width).sum();

        if !opaque && total_bits <= self.exhaustive_bits {
            let candidates: Vec<Vec<u64>> = vars
                .iter()
                .map(|v| (0..=mask(v.width())).collect())
                .collect();
            return Ok(match search(vars, &candidates, &formulas, budget)? {
                Some(values) => GroupResult::Model(values),
                None => GroupResult::Unsatisfiable,
            });
        }

        let mut constants = BTreeSet::new();
        for formula in &formulas {
            collect_constants(&formula.expr, &mut constants);
        }
        let truncated = constants.len() > MAX_CANDIDATE_CONSTANTS;
        let constants: Vec<u64> = constants.into_iter().take(MAX_CANDIDATE_CONSTANTS).collect();

        let exact = !opaque
            && !truncated
            && vars.len() == 1
            && formulas.iter().all(|f| is_linear_formula(&f.expr, &vars[0]));

        let candidates: Vec<Vec<u64>> = vars
            .iter()
            .map(|v| candidates_for(v.width(), &constants))
            .collect();

        Ok(match search(vars, &candidates, &formulas, budget)? {
            Some(values) => GroupResult::Model(values),
            None if exact => GroupResult::Unsatisfiable,
            None => GroupResult::Unknown,
        })
    }
}

/// The outcome of solving one group of constraints.
enum GroupResult {
    Model(Vec<u64>),
    Unsatisfiable,
    Unknown,
}

/// The limits on the work done by a single query.
struct Budget {
    started: Instant,
    timeout: Duration,
    tried:   u64,
    limit:   u64,
}

impl Budget {
    fn tick(&mut self) -> Result<()> {
        self.tried += 1;
        if self.tried > self.limit {
            return Err(Error::incomplete("the candidate limit was exhausted"));
        }
        if self.tried % ENUMERATION_SOLVER_TIMEOUT_CHECK_INTERVAL == 0
            && self.started.elapsed() > self.timeout
        {
            return Err(Error::Timeout {
                timeout: self.timeout,
            });
        }
        Ok(())
    }
}

/// A run of consecutive bytes of a symbolic array, read as one value.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
struct Word {
    array:  ArrayId,
    start:  u64,
    len:    u64,
    little: bool,
}

impl Word {
    fn width(&self) -> Width {
        u32::try_from(self.len).unwrap_or(u32::MAX / BYTE_WIDTH_BITS) * BYTE_WIDTH_BITS
    }

    fn end(&self) -> u64 {
        self.start + self.len
    }

    fn overlaps(&self, other: &Word) -> bool {
        self.array == other.array && self.start < other.end() && other.start < self.end()
    }

    fn write(&self, value: u64, assignment: &mut Assignment) {
        for i in 0..self.len {
            let shift = if self.little { i } else { self.len - 1 - i } * 8;
            let byte = if shift >= 64 { 0 } else { (value >> shift) & 0xff };
            assignment.set_byte(self.array, self.start + i, byte as u8);
        }
    }
}

/// Recognises `expr` as an input word.
fn match_word(expr: &ExprRef) -> Option<Word> {
    match expr.kind() {
        Expr::Read { updates, index } if updates.is_empty() && updates.root().is_symbolic() => {
            index.as_constant().map(|start| Word {
                array: updates.root().id(),
                start,
                len: 1,
                little: true,
            })
        }
        Expr::Concat { high, low } => {
            let high = match_word(high)?;
            let low = match_word(low)?;
            if high.array != low.array || high.len + low.len > 8 {
                return None;
            }
            let may_be = |w: &Word, little: bool| w.len == 1 || w.little == little;
            if high.start == low.end() && may_be(&high, true) && may_be(&low, true) {
                Some(Word {
                    array:  low.array,
                    start:  low.start,
                    len:    high.len + low.len,
                    little: true,
                })
            } else if high.end() == low.start && may_be(&high, false) && may_be(&low, false) {
                Some(Word {
                    array:  high.array,
                    start:  high.start,
                    len:    high.len + low.len,
                    little: false,
                })
            } else {
                None
            }
        }
        _ => None,
    }
}

/// The inputs that a formula depends on.
struct Analysis {
    words:         BTreeSet<Word>,
    opaque_arrays: BTreeSet<ArrayId>,
}

impl Analysis {
    fn of(expr: &ExprRef) -> Self {
        let mut analysis = Self {
            words:         BTreeSet::new(),
            opaque_arrays: BTreeSet::new(),
        };
        let mut visited = FxHashSet::default();
        let mut stack = vec![expr.clone()];
        while let Some(expr) = stack.pop() {
            if !visited.insert(expr.id()) {
                continue;
            }
            if let Some(word) = match_word(&expr) {
                analysis.words.insert(word);
                continue;
            }
            if let Expr::Read { updates, index } = expr.kind() {
                if updates.root().is_symbolic() {
                    analysis.opaque_arrays.insert(updates.root().id());
                }
                stack.push(index.clone());
                for node in updates.iter() {
                    stack.push(node.index().clone());
                    stack.push(node.value().clone());
                }
            } else {
                stack.extend(expr.children());
            }
        }
        analysis
    }

    /// Gets the indices of the variables in `vars` that the formula depends
    /// on.
    fn variables(&self, vars: &[Word]) -> Vec<usize> {
        vars.iter()
            .enumerate()
            .filter(|(_, var)| {
                self.opaque_arrays.contains(&var.array)
                    || self.words.iter().any(|w| w.overlaps(var))
            })
            .map(|(i, _)| i)
            .collect()
    }
}

/// Merges overlapping words into the variables that are searched over.
fn merge_words(words: &BTreeSet<Word>) -> Vec<Word> {
    let mut sorted: Vec<Word> = words.iter().copied().collect();
    sorted.sort_by_key(|w| (w.array, w.start, std::cmp::Reverse(w.len)));

    let mut merged: Vec<Word> = Vec::new();
    for word in sorted {
        match merged.last_mut() {
            Some(last) if last.overlaps(&word) => {
                let end = last.end().max(word.end());
                last.len = end - last.start;
            }
            _ => merged.push(word),
        }
    }

    let mut vars = Vec::with_capacity(merged.len());
    for word in merged {
        let mut start = word.start;
        while start < word.end() {
            let len = (word.end() - start).min(8);
            vars.push(Word {
                array: word.array,
                start,
                len,
                little: word.little,
            });
            start += len;
        }
    }
    vars
}

/// Searches the cartesian product of `candidates` for values of `vars` that
/// satisfy every formula.
fn search(
    vars: &[Word],
    candidates: &[Vec<u64>],
    formulas: &[&Assumption],
    budget: &mut Budget,
) -> Result<Option<Vec<u64>>> {
    if candidates.iter().any(Vec::is_empty) {
        return Ok(None);
    }
    let mut indices = vec![0usize; vars.len()];
    loop {
        budget.tick()?;
        let mut assignment = Assignment::new();
        for ((var, list), &i) in vars.iter().zip(candidates).zip(&indices) {
            var.write(list[i], &mut assignment);
        }
        let mut evaluator = Evaluator::new(&assignment);
        if formulas
            .iter()
            .all(|f| (evaluator.eval(&f.expr) != 0) == f.holds)
        {
            let values = candidates
                .iter()
                .zip(&indices)
                .map(|(list, &i)| list[i])
                .collect();
            return Ok(Some(values));
        }

        let mut position = 0;
        loop {
            if position == indices.len() {
                return Ok(None);
            }
            indices[position] += 1;
            if indices[position] < candidates[position].len() {
                break;
            }
            indices[position] = 0;
            position += 1;
        }
    }
}

/// Collects the values of the non-boolean constants in `expr`.
fn collect_constants(expr: &ExprRef, constants: &mut BTreeSet<u64>) {
    let mut visited = FxHashSet::default();
    let mut stack = vec![expr.clone()];
    while let Some(expr) = stack.pop() {
        if !visited.insert(expr.id()) {
            continue;
        }
        match expr.kind() {
            Expr::Constant { value, width } => {
                if *width > BOOL_WIDTH_BITS {
                    constants.insert(*value);
                }
            }
            Expr::Read { updates, index } => {
                stack.push(index.clone());
                for node in updates.iter() {
                    stack.push(node.index().clone());
                    stack.push(node.value().clone());
                }
            }
            _ => stack.extend(expr.children()),
        }
    }
}

/// Computes the candidate values for a variable of `width` bits.
fn candidates_for(width: Width, constants: &[u64]) -> Vec<u64> {
    let m = mask(width);
    let sign_bit = if width >= MAX_EXPR_WIDTH_BITS {
        1u64 << 63
    } else {
        1u64 << (width - 1)
    };

    let mut pool: BTreeSet<u64> = constants.iter().map(|c| c & m).collect();
    pool.insert(0);
    pool.insert(1);

    let mut result = BTreeSet::new();
    for extra in [0, 1, 2, m, m.wrapping_sub(1), sign_bit, sign_bit - 1, sign_bit + 1] {
        result.insert(extra & m);
    }
    for &a in &pool {
        for delta in [0u64, 1, u64::MAX] {
            result.insert(a.wrapping_add(delta) & m);
            for &b in &pool {
                result.insert(a.wrapping_sub(b).wrapping_add(delta) & m);
            }
        }
    }
    result.into_iter().collect()
}

/// Checks whether `expr` is a boolean combination of comparisons between
/// `var` (plus a constant offset) and constants.
fn is_linear_formula(expr: &ExprRef, var: &Word) -> bool {
    match expr.kind() {
        Expr::Constant { .. } => true,
        Expr::Not { expr } => is_linear_formula(expr, var),
        Expr::Binary {
            op: BinaryOp::And | BinaryOp::Or | BinaryOp::Xor,
            lhs,
            rhs,
        } if expr.width() == BOOL_WIDTH_BITS => {
            is_linear_formula(lhs, var) && is_linear_formula(rhs, var)
        }
        Expr::Select {
            cond,
            then,
            otherwise,
        } if expr.width() == BOOL_WIDTH_BITS => {
            is_linear_formula(cond, var)
                && is_linear_formula(then, var)
                && is_linear_formula(otherwise, var)
        }
        Expr::Compare { lhs, rhs, .. } => {
            if lhs.width() == BOOL_WIDTH_BITS {
                is_linear_formula(lhs, var) && is_linear_formula(rhs, var)
            } else {
                (is_linear_term(lhs, var) && rhs.is_constant())
                    || (lhs.is_constant() && is_linear_term(rhs, var))
            }
        }
        _ => false,
    }
}

/// Checks whether `expr` is `var`, extended or offset by a constant.
fn is_linear_term(expr: &ExprRef, var: &Word) -> bool {
    if let Some(word) = match_word(expr) {
        return word.array == var.array
            && word.start == var.start
            && word.len == var.len
            && (word.len == 1 || word.little == var.little);
    }
    match expr.kind() {
        Expr::Binary {
            op: BinaryOp::Add | BinaryOp::Sub,
            lhs,
            rhs,
        } => rhs.is_constant() && is_linear_term(lhs, var),
        Expr::ZExt { expr, .. } | Expr::SExt { expr, .. } => is_linear_term(expr, var),
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use crate::{
        constraint::ConstraintSet,
        error::solver::Error,
        expr::{ArraySource, Context, ExprBuilder, ExprRef, UpdateList},
        solver::{Assumption, EnumerationSolver, Solver},
    };

    fn word(builder: &ExprBuilder, name: &str, bytes: u64) -> ExprRef {
        let array = builder.create_array(name, bytes, ArraySource::MakeSymbolic);
        let updates = UpdateList::new(array);
        let reads: Vec<_> = (0..bytes)
            .map(|i| builder.read(&updates, &builder.pointer(i)))
            .collect();
        builder.concat_bytes(&reads)
    }

    #[test]
    fn can_find_models_for_offset_bounds() -> anyhow::Result<()> {
        let builder = ExprBuilder::new(Context::default());
        let solver = EnumerationSolver::new();
        let timeout = Duration::from_secs(5);
        let size = word(&builder, "size", 8);

        let mut constraints = ConstraintSet::new();
        constraints.add(builder.uge(&size, &builder.pointer(4)));
        constraints.add(builder.ne(&size, &builder.pointer(4)));
        constraints.add(builder.ugt(&size, &builder.pointer(128)));

        let model = solver
            .check(&constraints, &[], timeout)?
            .ok_or_else(|| anyhow::anyhow!("expected a model"))?;
        assert!(model.evaluate(&size) > 128);

        let in_bounds = builder.ult(&builder.pointer(200), &size);
        assert!(solver.may_be_true(&constraints, &in_bounds, timeout)?);
        assert!(!solver.must_be_true(&constraints, &in_bounds, timeout)?);

        Ok(())
    }

    #[test]
    fn proves_unsatisfiability_of_linear_constraints() -> anyhow::Result<()> {
        let builder = ExprBuilder::new(Context::default());
        let solver = EnumerationSolver::new();
        let pointer = word(&builder, "p", 8);
        let shifted = builder.add(&pointer, &builder.pointer(0x1000));

        let mut constraints = ConstraintSet::new();
        constraints.add(builder.ult(&shifted, &builder.pointer(0x1010)));
        constraints.add(builder.uge(&shifted, &builder.pointer(0x1000)));

        let outside = builder.ugt(&pointer, &builder.pointer(0x10));
        let result = solver.check(
            &constraints,
            &[Assumption::holds(&outside)],
            Duration::from_secs(5),
        )?;
        assert!(result.is_none());

        Ok(())
    }

    #[test]
    fn searches_small_inputs_exhaustively() -> anyhow::Result<()> {
        let builder = ExprBuilder::new(Context::default());
        let solver = EnumerationSolver::new();
        let a = word(&builder, "a", 1);
        let b = word(&builder, "b", 1);

        let mut constraints = ConstraintSet::new();
        let product = builder.mul(&a, &b);
        constraints.add(builder.eq(&product, &builder.constant(143, 8)));
        constraints.add(builder.ugt(&a, &b));
        constraints.add(builder.ugt(&b, &builder.constant(1, 8)));

        let model = solver
            .check(&constraints, &[], Duration::from_secs(30))?
            .ok_or_else(|| anyhow::anyhow!("expected a model"))?;
        let (a, b) = (model.evaluate(&a), model.evaluate(&b));
        assert_eq!((a * b) & 0xff, 143);
        assert!(a > b && b > 1);

        Ok(())
    }

    #[test]
    fn reports_incomplete_instead_of_guessing() {
        let builder = ExprBuilder::new(Context::default());
        let solver = EnumerationSolver::new().with_max_candidates(1 << 12);
        let x = word(&builder, "x", 8);
        let y = word(&builder, "y", 8);

        // The only factorisation is 65521 * 65519, neither of which is a
        // candidate.
        let mut constraints = ConstraintSet::new();
        let product = builder.mul(&x, &y);
        constraints.add(builder.eq(&product, &builder.pointer(4_292_870_399)));
        constraints.add(builder.ult(&x, &builder.pointer(0x1_0000)));
        constraints.add(builder.ult(&y, &builder.pointer(0x1_0000)));
        constraints.add(builder.ugt(&x, &builder.pointer(3)));
        constraints.add(builder.ugt(&y, &builder.pointer(3)));

        let result = solver.check(&constraints, &[], Duration::from_secs(5));
        assert!(matches!(result, Err(Error::Incomplete { .. })));
    }
}
