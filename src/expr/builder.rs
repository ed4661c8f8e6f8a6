//! This module contains the [`ExprBuilder`], which is the only way to create
//! expressions.
//!
//! Besides interning, the builder applies a set of local simplifications as
//! nodes are created: constant folding, canonical placement of constants in
//! commutative operations, merging of constant offsets, and forwarding of reads
//! through update lists whose writes are at known indices. The solver relies on
//! offsets being merged this way so that the bounds checks it sees compare a
//! single input against a constant.

use std::{
    cell::{Cell, RefCell},
    hash::{Hash, Hasher},
    rc::{Rc, Weak},
};

use rustc_hash::{FxHashMap, FxHasher};

use crate::{
    constant::{BOOL_WIDTH_BITS, BYTE_WIDTH_BITS},
    expr::{
        mask,
        sign_extend,
        to_signed,
        Array,
        ArrayId,
        ArraySource,
        BinaryOp,
        CompareOp,
        Context,
        Endianness,
        Expr,
        ExprNode,
        ExprRef,
        UpdateList,
        Width,
    },
};

/// The factory and interning table for expressions.
///
/// The table holds weak references, so expressions that are no longer used
/// anywhere are released.
#[derive(Debug)]
pub struct ExprBuilder {
    /// The machine configuration expressions are built for.
    context: Context,

    /// The interning table, keyed by content hash.
    table: RefCell<FxHashMap<u64, Vec<Weak<ExprNode>>>>,

    /// The identifier for the next node that is created.
    next_id: Cell<u64>,

    /// The identifier for the next array that is created.
    next_array: Cell<u64>,

    /// How many arrays have been created with each requested name.
    array_names: RefCell<FxHashMap<String, u32>>,
}

impl ExprBuilder {
    /// Creates a builder for expressions over the provided `context`.
    #[must_use]
    pub fn new(context: Context) -> Self {
        Self {
            context,
            table: RefCell::new(FxHashMap::default()),
            next_id: Cell::new(0),
            next_array: Cell::new(0),
            array_names: RefCell::new(FxHashMap::default()),
        }
    }

    /// Gets the machine configuration of this builder.
    #[must_use]
    pub fn context(&self) -> Context {
        self.context
    }

    /// Gets the number of live interned expressions.
    #[must_use]
    pub fn interned_count(&self) -> usize {
        self.table
            .borrow()
            .values()
            .map(|bucket| bucket.iter().filter(|w| w.strong_count() > 0).count())
            .sum()
    }

    fn intern(&self, kind: Expr, width: Width) -> ExprRef {
        let hash = {
            let mut hasher = FxHasher::default();
            kind.hash(&mut hasher);
            width.hash(&mut hasher);
            hasher.finish()
        };

        let mut table = self.table.borrow_mut();
        let bucket = table.entry(hash).or_default();
        bucket.retain(|weak| weak.strong_count() > 0);
        for weak in bucket.iter() {
            if let Some(existing) = ExprRef::upgrade(weak) {
                if existing.width() == width && existing.kind() == &kind {
                    return existing;
                }
            }
        }

        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let expr = ExprRef::from_node(kind, width, hash, id);
        bucket.push(expr.downgrade());
        expr
    }

    /// Creates a fresh array named after `name`.
    ///
    /// Array names are unique, so a numeric suffix is appended when `name` has
    /// already been used.
    #[must_use]
    pub fn create_array(&self, name: &str, size: u64, source: ArraySource) -> Rc<Array> {
        let id = ArrayId(self.next_array.get());
        self.next_array.set(id.0 + 1);

        let mut names = self.array_names.borrow_mut();
        let count = names.entry(name.to_string()).or_insert(0);
        let unique = if *count == 0 {
            name.to_string()
        } else {
            format!("{name}_{count}")
        };
        *count += 1;

        Rc::new(Array::new(id, unique, size, source))
    }

    /// Creates a constant of the provided `width`, truncating `value` to fit.
    #[must_use]
    pub fn constant(&self, value: u64, width: Width) -> ExprRef {
        let value = value & mask(width);
        self.intern(Expr::Constant { value, width }, width)
    }

    /// Creates a boolean constant.
    #[must_use]
    pub fn bool(&self, value: bool) -> ExprRef {
        self.constant(u64::from(value), BOOL_WIDTH_BITS)
    }

    /// The boolean constant `true`.
    #[must_use]
    pub fn true_expr(&self) -> ExprRef {
        self.bool(true)
    }

    /// The boolean constant `false`.
    #[must_use]
    pub fn false_expr(&self) -> ExprRef {
        self.bool(false)
    }

    /// Creates a pointer-width constant.
    #[must_use]
    pub fn pointer(&self, value: u64) -> ExprRef {
        self.constant(value, self.context.pointer_width())
    }

    /// Reads one byte at `index` from `updates`.
    #[must_use]
    pub fn read(&self, updates: &UpdateList, index: &ExprRef) -> ExprRef {
        let Some(i) = index.as_constant() else {
            return self.intern(
                Expr::Read {
                    updates: updates.clone(),
                    index:   index.clone(),
                },
                BYTE_WIDTH_BITS,
            );
        };

        let mut node = updates.head();
        while let Some(current) = node {
            match current.index().as_constant() {
                Some(j) if j == i => return current.value().clone(),
                Some(_) => node = current.next(),
                None => {
                    return self.intern(
                        Expr::Read {
                            updates: updates.starting_at(Some(current.clone())),
                            index:   index.clone(),
                        },
                        BYTE_WIDTH_BITS,
                    );
                }
            }
        }

        if let Some(byte) = updates.root().constant_byte(i) {
            return self.constant(u64::from(byte), BYTE_WIDTH_BITS);
        }

        self.intern(
            Expr::Read {
                updates: UpdateList::new(updates.root().clone()),
                index:   index.clone(),
            },
            BYTE_WIDTH_BITS,
        )
    }

    /// Selects between `then` and `otherwise` based on the boolean `cond`.
    #[must_use]
    pub fn select(&self, cond: &ExprRef, then: &ExprRef, otherwise: &ExprRef) -> ExprRef {
        if cond.is_true() || then == otherwise {
            return then.clone();
        }
        if cond.is_false() {
            return otherwise.clone();
        }
        if then.width() == BOOL_WIDTH_BITS {
            if then.is_true() && otherwise.is_false() {
                return cond.clone();
            }
            if then.is_false() && otherwise.is_true() {
                return self.not(cond);
            }
        }
        let width = then.width();
        self.intern(
            Expr::Select {
                cond:      cond.clone(),
                then:      then.clone(),
                otherwise: otherwise.clone(),
            },
            width,
        )
    }

    /// Concatenates `high` above `low`.
    #[must_use]
    pub fn concat(&self, high: &ExprRef, low: &ExprRef) -> ExprRef {
        let width = high.width() + low.width();
        if let (Some(h), Some(l)) = (high.as_constant(), low.as_constant()) {
            return self.constant((h << low.width()) | l, width);
        }
        if high.as_constant() == Some(0) {
            return self.zext(low, width);
        }
        if let (
            Expr::Extract {
                expr: high_expr,
                offset: high_offset,
                width: high_width,
            },
            Expr::Extract {
                expr: low_expr,
                offset: low_offset,
                width: low_width,
            },
        ) = (high.kind(), low.kind())
        {
            if high_expr == low_expr && *high_offset == low_offset + low_width {
                return self.extract(high_expr, *low_offset, high_width + low_width);
            }
        }
        self.intern(
            Expr::Concat {
                high: high.clone(),
                low:  low.clone(),
            },
            width,
        )
    }

    /// Extracts `width` bits of `expr` starting from bit `offset`.
    #[must_use]
    pub fn extract(&self, expr: &ExprRef, offset: Width, width: Width) -> ExprRef {
        if offset == 0 && width == expr.width() {
            return expr.clone();
        }
        if let Some(value) = expr.as_constant() {
            return self.constant(value >> offset, width);
        }
        match expr.kind() {
            Expr::Concat { high, low } => {
                if offset + width <= low.width() {
                    return self.extract(low, offset, width);
                }
                if offset >= low.width() {
                    return self.extract(high, offset - low.width(), width);
                }
            }
            Expr::Extract {
                expr: inner,
                offset: inner_offset,
                ..
            } => return self.extract(inner, inner_offset + offset, width),
            Expr::ZExt { expr: inner, .. } => {
                if offset + width <= inner.width() {
                    return self.extract(inner, offset, width);
                }
                if offset >= inner.width() {
                    return self.constant(0, width);
                }
            }
            _ => {}
        }
        self.intern(
            Expr::Extract {
                expr: expr.clone(),
                offset,
                width,
            },
            width,
        )
    }

    /// Zero-extends `expr` to `width`, or truncates it when `width` is
    /// narrower.
    #[must_use]
    pub fn zext(&self, expr: &ExprRef, width: Width) -> ExprRef {
        if width == expr.width() {
            return expr.clone();
        }
        if width < expr.width() {
            return self.extract(expr, 0, width);
        }
        if let Some(value) = expr.as_constant() {
            return self.constant(value, width);
        }
        if let Expr::ZExt { expr: inner, .. } = expr.kind() {
            return self.zext(inner, width);
        }
        self.intern(
            Expr::ZExt {
                expr: expr.clone(),
                width,
            },
            width,
        )
    }

    /// Sign-extends `expr` to `width`, or truncates it when `width` is
    /// narrower.
    #[must_use]
    pub fn sext(&self, expr: &ExprRef, width: Width) -> ExprRef {
        if width == expr.width() {
            return expr.clone();
        }
        if width < expr.width() {
            return self.extract(expr, 0, width);
        }
        if let Some(value) = expr.as_constant() {
            return self.constant(sign_extend(value, expr.width(), width), width);
        }
        self.intern(
            Expr::SExt {
                expr: expr.clone(),
                width,
            },
            width,
        )
    }

    /// Truncates `expr` to its low `width` bits.
    #[must_use]
    pub fn trunc(&self, expr: &ExprRef, width: Width) -> ExprRef {
        self.extract(expr, 0, width.min(expr.width()))
    }

    /// Computes the bitwise complement of `expr`, which for booleans is logical
    /// negation.
    #[must_use]
    pub fn not(&self, expr: &ExprRef) -> ExprRef {
        if let Some(value) = expr.as_constant() {
            return self.constant(!value, expr.width());
        }
        match expr.kind() {
            Expr::Not { expr: inner } => return inner.clone(),
            Expr::Compare { op, lhs, rhs } => return self.compare(op.negated(), lhs, rhs),
            _ => {}
        }
        let width = expr.width();
        self.intern(Expr::Not { expr: expr.clone() }, width)
    }

    /// Applies the binary operation `op` to `lhs` and `rhs`, which must have
    /// the same width.
    #[must_use]
    pub fn binary(&self, op: BinaryOp, lhs: &ExprRef, rhs: &ExprRef) -> ExprRef {
        let width = lhs.width();
        if let (Some(l), Some(r)) = (lhs.as_constant(), rhs.as_constant()) {
            return self.constant(fold_binary(op, l, r, width), width);
        }

        let (lhs, rhs) = if op.is_commutative() && lhs.is_constant() {
            (rhs, lhs)
        } else {
            (lhs, rhs)
        };
        let all_ones = mask(width);

        match (op, rhs.as_constant()) {
            (BinaryOp::Add, Some(0))
            | (BinaryOp::Sub, Some(0))
            | (BinaryOp::Mul | BinaryOp::UDiv | BinaryOp::SDiv, Some(1))
            | (BinaryOp::Or | BinaryOp::Xor, Some(0))
            | (BinaryOp::Shl | BinaryOp::LShr | BinaryOp::AShr, Some(0)) => return lhs.clone(),
            (BinaryOp::Mul | BinaryOp::And, Some(0)) => return self.constant(0, width),
            (BinaryOp::And, Some(c)) if c == all_ones => return lhs.clone(),
            (BinaryOp::Or, Some(c)) if c == all_ones => return rhs.clone(),
            (BinaryOp::Xor, Some(1)) if width == BOOL_WIDTH_BITS => return self.not(lhs),
            (BinaryOp::Add, Some(c)) => {
                if let Expr::Binary {
                    op: BinaryOp::Add,
                    lhs: inner,
                    rhs: inner_offset,
                } = lhs.kind()
                {
                    if let Some(d) = inner_offset.as_constant() {
                        return self.add(inner, &self.constant(c.wrapping_add(d), width));
                    }
                }
            }
            (BinaryOp::Sub, Some(c)) => {
                return self.add(lhs, &self.constant(c.wrapping_neg(), width));
            }
            _ => {}
        }

        match op {
            BinaryOp::Sub => {
                if lhs == rhs {
                    return self.constant(0, width);
                }
                let (lhs_base, lhs_offset) = split_offset(lhs);
                let (rhs_base, rhs_offset) = split_offset(rhs);
                if lhs_base.is_some() && lhs_base == rhs_base {
                    return self.constant(lhs_offset.wrapping_sub(rhs_offset), width);
                }
            }
            BinaryOp::And | BinaryOp::Or if lhs == rhs => return lhs.clone(),
            BinaryOp::Xor if lhs == rhs => return self.constant(0, width),
            BinaryOp::Add => {
                if let Expr::Binary {
                    op: BinaryOp::Add,
                    lhs: inner,
                    rhs: inner_offset,
                } = rhs.kind()
                {
                    if inner_offset.is_constant() {
                        return self.add(&self.add(lhs, inner), inner_offset);
                    }
                }
                if let Expr::Binary {
                    op: BinaryOp::Add,
                    lhs: inner,
                    rhs: inner_offset,
                } = lhs.kind()
                {
                    if inner_offset.is_constant() {
                        return self.add(&self.add(inner, rhs), inner_offset);
                    }
                }
            }
            _ => {}
        }

        self.intern(
            Expr::Binary {
                op,
                lhs: lhs.clone(),
                rhs: rhs.clone(),
            },
            width,
        )
    }

    /// Computes `lhs + rhs`.
    #[must_use]
    pub fn add(&self, lhs: &ExprRef, rhs: &ExprRef) -> ExprRef {
        self.binary(BinaryOp::Add, lhs, rhs)
    }

    /// Computes `lhs - rhs`.
    #[must_use]
    pub fn sub(&self, lhs: &ExprRef, rhs: &ExprRef) -> ExprRef {
        self.binary(BinaryOp::Sub, lhs, rhs)
    }

    /// Computes `lhs * rhs`.
    #[must_use]
    pub fn mul(&self, lhs: &ExprRef, rhs: &ExprRef) -> ExprRef {
        self.binary(BinaryOp::Mul, lhs, rhs)
    }

    /// Computes `lhs & rhs`, which for booleans is logical conjunction.
    #[must_use]
    pub fn and(&self, lhs: &ExprRef, rhs: &ExprRef) -> ExprRef {
        self.binary(BinaryOp::And, lhs, rhs)
    }

    /// Computes `lhs | rhs`, which for booleans is logical disjunction.
    #[must_use]
    pub fn or(&self, lhs: &ExprRef, rhs: &ExprRef) -> ExprRef {
        self.binary(BinaryOp::Or, lhs, rhs)
    }

    /// Computes the conjunction of all of the provided booleans.
    #[must_use]
    pub fn and_all<'a>(&self, exprs: impl IntoIterator<Item = &'a ExprRef>) -> ExprRef {
        exprs
            .into_iter()
            .fold(self.true_expr(), |acc, e| self.and(&acc, e))
    }

    /// Computes the disjunction of all of the provided booleans.
    #[must_use]
    pub fn or_all<'a>(&self, exprs: impl IntoIterator<Item = &'a ExprRef>) -> ExprRef {
        exprs
            .into_iter()
            .fold(self.false_expr(), |acc, e| self.or(&acc, e))
    }

    /// Compares `lhs` with `rhs` using `op`, producing a boolean.
    #[must_use]
    pub fn compare(&self, op: CompareOp, lhs: &ExprRef, rhs: &ExprRef) -> ExprRef {
        let width = lhs.width();
        if let (Some(l), Some(r)) = (lhs.as_constant(), rhs.as_constant()) {
            return self.bool(op.apply(l, r, width));
        }
        if lhs == rhs {
            let reflexive = matches!(
                op,
                CompareOp::Eq | CompareOp::Ule | CompareOp::Uge | CompareOp::Sle | CompareOp::Sge
            );
            return self.bool(reflexive);
        }
        if lhs.is_constant() {
            return self.compare(op.swapped(), rhs, lhs);
        }

        if let Some(c) = rhs.as_constant() {
            match op {
                CompareOp::Ult if c == 0 => return self.false_expr(),
                CompareOp::Uge if c == 0 => return self.true_expr(),
                CompareOp::Ule if c == mask(width) => return self.true_expr(),
                CompareOp::Ugt if c == mask(width) => return self.false_expr(),
                _ => {}
            }

            if matches!(op, CompareOp::Eq | CompareOp::Ne) {
                if width == BOOL_WIDTH_BITS {
                    let holds_when_set = (op == CompareOp::Eq) == (c == 1);
                    return if holds_when_set {
                        lhs.clone()
                    } else {
                        self.not(lhs)
                    };
                }
                match lhs.kind() {
                    Expr::Binary {
                        op: BinaryOp::Add,
                        lhs: inner,
                        rhs: offset,
                    } => {
                        if let Some(d) = offset.as_constant() {
                            let shifted = self.constant(c.wrapping_sub(d), width);
                            return self.compare(op, inner, &shifted);
                        }
                    }
                    Expr::ZExt { expr: inner, .. } => {
                        if c & !mask(inner.width()) != 0 {
                            return self.bool(op == CompareOp::Ne);
                        }
                        let narrowed = self.constant(c, inner.width());
                        return self.compare(op, inner, &narrowed);
                    }
                    _ => {}
                }
            }
        }

        self.intern(
            Expr::Compare {
                op,
                lhs: lhs.clone(),
                rhs: rhs.clone(),
            },
            BOOL_WIDTH_BITS,
        )
    }

    /// Computes `lhs == rhs`.
    #[must_use]
    pub fn eq(&self, lhs: &ExprRef, rhs: &ExprRef) -> ExprRef {
        self.compare(CompareOp::Eq, lhs, rhs)
    }

    /// Computes `lhs != rhs`.
    #[must_use]
    pub fn ne(&self, lhs: &ExprRef, rhs: &ExprRef) -> ExprRef {
        self.compare(CompareOp::Ne, lhs, rhs)
    }

    /// Computes the unsigned `lhs < rhs`.
    #[must_use]
    pub fn ult(&self, lhs: &ExprRef, rhs: &ExprRef) -> ExprRef {
        self.compare(CompareOp::Ult, lhs, rhs)
    }

    /// Computes the unsigned `lhs <= rhs`.
    #[must_use]
    pub fn ule(&self, lhs: &ExprRef, rhs: &ExprRef) -> ExprRef {
        self.compare(CompareOp::Ule, lhs, rhs)
    }

    /// Computes the unsigned `lhs > rhs`.
    #[must_use]
    pub fn ugt(&self, lhs: &ExprRef, rhs: &ExprRef) -> ExprRef {
        self.compare(CompareOp::Ugt, lhs, rhs)
    }

    /// Computes the unsigned `lhs >= rhs`.
    #[must_use]
    pub fn uge(&self, lhs: &ExprRef, rhs: &ExprRef) -> ExprRef {
        self.compare(CompareOp::Uge, lhs, rhs)
    }

    /// Computes `expr == 0`.
    #[must_use]
    pub fn is_zero(&self, expr: &ExprRef) -> ExprRef {
        self.eq(expr, &self.constant(0, expr.width()))
    }

    /// Assembles a value from `bytes` given in memory order, using the byte
    /// order of the builder's context.
    ///
    /// `bytes` must not be empty.
    #[must_use]
    pub fn concat_bytes(&self, bytes: &[ExprRef]) -> ExprRef {
        let Some((first, rest)) = bytes.split_first() else {
            return self.constant(0, BYTE_WIDTH_BITS);
        };
        match self.context.endianness() {
            Endianness::Little => rest
                .iter()
                .fold(first.clone(), |acc, byte| self.concat(byte, &acc)),
            Endianness::Big => rest
                .iter()
                .fold(first.clone(), |acc, byte| self.concat(&acc, byte)),
        }
    }

    /// Splits `value` into its bytes in memory order, using the byte order of
    /// the builder's context.
    ///
    /// The width of `value` must be a whole number of bytes.
    #[must_use]
    pub fn split_bytes(&self, value: &ExprRef) -> Vec<ExprRef> {
        let count = value.width() / BYTE_WIDTH_BITS;
        (0..count)
            .map(|i| {
                let byte = match self.context.endianness() {
                    Endianness::Little => i,
                    Endianness::Big => count - 1 - i,
                };
                self.extract(value, byte * BYTE_WIDTH_BITS, BYTE_WIDTH_BITS)
            })
            .collect()
    }
}

/// Splits `expr` into a symbolic base and a constant offset.
fn split_offset(expr: &ExprRef) -> (Option<ExprRef>, u64) {
    if let Some(value) = expr.as_constant() {
        return (None, value);
    }
    if let Expr::Binary {
        op: BinaryOp::Add,
        lhs,
        rhs,
    } = expr.kind()
    {
        if let Some(offset) = rhs.as_constant() {
            return (Some(lhs.clone()), offset);
        }
    }
    (Some(expr.clone()), 0)
}

/// Evaluates `op` over concrete operands of the provided `width`.
///
/// Division by zero follows the usual bit-vector conventions: unsigned division
/// yields all ones and remainder yields the dividend.
#[must_use]
pub fn fold_binary(op: BinaryOp, lhs: u64, rhs: u64, width: Width) -> u64 {
    let m = mask(width);
    let (sl, sr) = (to_signed(lhs, width), to_signed(rhs, width));
    let result = match op {
        BinaryOp::Add => lhs.wrapping_add(rhs),
        BinaryOp::Sub => lhs.wrapping_sub(rhs),
        BinaryOp::Mul => lhs.wrapping_mul(rhs),
        BinaryOp::UDiv => {
            if rhs == 0 {
                m
            } else {
                lhs / rhs
            }
        }
        BinaryOp::URem => {
            if rhs == 0 {
                lhs
            } else {
                lhs % rhs
            }
        }
        BinaryOp::SDiv => {
            if rhs == 0 {
                if sl < 0 {
                    1
                } else {
                    m
                }
            } else {
                sl.wrapping_div(sr) as u64
            }
        }
        BinaryOp::SRem => {
            if rhs == 0 {
                lhs
            } else {
                sl.wrapping_rem(sr) as u64
            }
        }
        BinaryOp::And => lhs & rhs,
        BinaryOp::Or => lhs | rhs,
        BinaryOp::Xor => lhs ^ rhs,
        BinaryOp::Shl => {
            if rhs >= u64::from(width) {
                0
            } else {
                lhs << rhs
            }
        }
        BinaryOp::LShr => {
            if rhs >= u64::from(width) {
                0
            } else {
                lhs >> rhs
            }
        }
        BinaryOp::AShr => {
            if rhs >= u64::from(width) {
                if sl < 0 {
                    m
                } else {
                    0
                }
            } else {
                (sl >> rhs) as u64
            }
        }
    };
    result & m
}

#[cfg(test)]
mod test {
    use crate::expr::{ArraySource, BinaryOp, Context, Expr, ExprBuilder, UpdateList};

    #[test]
    fn interns_structurally_equal_expressions() {
        let builder = ExprBuilder::new(Context::default());
        let array = builder.create_array("input", 8, ArraySource::MakeSymbolic);
        let updates = UpdateList::new(array);
        let index = builder.pointer(3);

        let a = builder.read(&updates, &index);
        let b = builder.read(&updates, &index);
        assert_eq!(a, b);

        let sum_a = builder.add(&builder.zext(&a, 64), &builder.pointer(4));
        let sum_b = builder.add(&builder.pointer(4), &builder.zext(&b, 64));
        assert_eq!(sum_a, sum_b);
    }

    #[test]
    fn folds_constants() {
        let builder = ExprBuilder::new(Context::default());
        let a = builder.constant(200, 8);
        let b = builder.constant(100, 8);
        assert_eq!(builder.add(&a, &b).as_constant(), Some(44));
        assert_eq!(builder.ult(&b, &a).as_constant(), Some(1));
        assert_eq!(
            builder.binary(BinaryOp::UDiv, &a, &builder.constant(0, 8)).as_constant(),
            Some(0xff)
        );
    }

    #[test]
    fn cancels_matching_offsets() {
        let builder = ExprBuilder::new(Context::default());
        let array = builder.create_array("p", 8, ArraySource::MakeSymbolic);
        let updates = UpdateList::new(array);
        let bytes: Vec<_> = (0..8)
            .map(|i| builder.read(&updates, &builder.pointer(i)))
            .collect();
        let base = builder.concat_bytes(&bytes);

        let pointer = builder.add(&base, &builder.pointer(24));
        let offset = builder.sub(&pointer, &base);
        assert_eq!(offset.as_constant(), Some(24));

        let back = builder.sub(&builder.add(&pointer, &builder.pointer(8)), &builder.pointer(32));
        assert_eq!(back, base);
    }

    #[test]
    fn reassembles_split_values() {
        let builder = ExprBuilder::new(Context::default());
        let array = builder.create_array("size", 8, ArraySource::MakeSymbolic);
        let updates = UpdateList::new(array);
        let bytes: Vec<_> = (0..8)
            .map(|i| builder.read(&updates, &builder.pointer(i)))
            .collect();
        let value = builder.concat_bytes(&bytes);

        let split = builder.split_bytes(&value);
        assert_eq!(split, bytes);
        assert_eq!(builder.concat_bytes(&split), value);
    }

    #[test]
    fn forwards_reads_through_concrete_updates() {
        let builder = ExprBuilder::new(Context::default());
        let array = builder.create_array("buffer", 4, ArraySource::Zeroed);
        let updates = UpdateList::new(array)
            .extend(builder.pointer(1), builder.constant(7, 8))
            .extend(builder.pointer(2), builder.constant(9, 8));

        assert_eq!(builder.read(&updates, &builder.pointer(1)).as_constant(), Some(7));
        assert_eq!(builder.read(&updates, &builder.pointer(0)).as_constant(), Some(0));

        let symbolic = builder.create_array("index", 1, ArraySource::MakeSymbolic);
        let index = builder.zext(
            &builder.read(&UpdateList::new(symbolic), &builder.pointer(0)),
            64,
        );
        let read = builder.read(&updates, &index);
        assert!(matches!(read.kind(), Expr::Read { .. }));
    }

    #[test]
    fn negates_comparisons() {
        let builder = ExprBuilder::new(Context::default());
        let array = builder.create_array("x", 1, ArraySource::MakeSymbolic);
        let x = builder.read(&UpdateList::new(array), &builder.pointer(0));
        let lt = builder.ult(&x, &builder.constant(10, 8));
        let ge = builder.uge(&x, &builder.constant(10, 8));
        assert_eq!(builder.not(&lt), ge);
    }
}
