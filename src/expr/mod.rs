//! This module contains the symbolic expression language that every other part
//! of the engine is built on.
//!
//! # Hash Consing
//!
//! Expressions are immutable and are only ever created through an
//! [`ExprBuilder`], which interns every node it creates. Two expressions built
//! by the same builder are therefore structurally equal if and only if they are
//! the same allocation, and [`ExprRef`] equality is a pointer comparison.
//! Expressions from different builders must not be mixed.
//!
//! # Widths
//!
//! Every expression has a width in bits between 1 and
//! [`crate::constant::MAX_EXPR_WIDTH_BITS`]. Booleans are one bit wide.

pub mod array;
pub mod builder;
pub mod eval;

use std::{
    cmp::Ordering,
    fmt::{Display, Formatter},
    hash::{Hash, Hasher},
    rc::Rc,
};

pub use array::{Array, ArrayId, ArraySource, UpdateList, UpdateNode};
pub use builder::ExprBuilder;
pub use eval::Assignment;
use serde::{Deserialize, Serialize};

use crate::constant::{BOOL_WIDTH_BITS, DEFAULT_POINTER_WIDTH_BITS, MAX_EXPR_WIDTH_BITS};

/// The width of an expression in bits.
pub type Width = u32;

/// The byte order used when multi-byte values are laid out in memory.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum Endianness {
    Little,
    Big,
}

/// The machine configuration that the engine is executing against.
///
/// It is established once, before any state exists, and is then passed to
/// everything that needs to know about pointer sizes or byte order.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct Context {
    /// The width of a pointer in bits.
    pointer_width: Width,

    /// The order in which the bytes of multi-byte values are stored.
    endianness: Endianness,
}

impl Context {
    /// Creates a new context with the provided `pointer_width` and
    /// `endianness`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `pointer_width` is not a whole number of bytes that
    /// fits within the widest supported expression.
    pub fn new(
        pointer_width: Width,
        endianness: Endianness,
    ) -> Result<Self, crate::error::program::Error> {
        if pointer_width == 0 || pointer_width % 8 != 0 || pointer_width > MAX_EXPR_WIDTH_BITS {
            return Err(crate::error::program::Error::InvalidWidth {
                width: pointer_width,
            });
        }
        Ok(Self {
            pointer_width,
            endianness,
        })
    }

    /// Gets the width of a pointer in bits.
    #[must_use]
    pub fn pointer_width(&self) -> Width {
        self.pointer_width
    }

    /// Gets the width of a pointer in bytes.
    #[must_use]
    pub fn pointer_bytes(&self) -> u64 {
        u64::from(self.pointer_width / 8)
    }

    /// Gets the byte order of the machine.
    #[must_use]
    pub fn endianness(&self) -> Endianness {
        self.endianness
    }
}

impl Default for Context {
    fn default() -> Self {
        Self {
            pointer_width: DEFAULT_POINTER_WIDTH_BITS,
            endianness:    Endianness::Little,
        }
    }
}

/// The binary bit-vector operations.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
}

impl BinaryOp {
    /// Checks if the operation is commutative.
    #[must_use]
    pub fn is_commutative(self) -> bool {
        matches!(self, Self::Add | Self::Mul | Self::And | Self::Or | Self::Xor)
    }

    /// Checks if the operation is a division or remainder, and hence undefined
    /// for a zero divisor in the programs being explored.
    #[must_use]
    pub fn is_division(self) -> bool {
        matches!(self, Self::UDiv | Self::SDiv | Self::URem | Self::SRem)
    }
}

/// The comparison operations, all of which produce a boolean.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Uge,
    Slt,
    Sle,
    Sgt,
    Sge,
}

impl CompareOp {
    /// Gets the comparison that holds exactly when `self` does not.
    #[must_use]
    pub fn negated(self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Ult => Self::Uge,
            Self::Ule => Self::Ugt,
            Self::Ugt => Self::Ule,
            Self::Uge => Self::Ult,
            Self::Slt => Self::Sge,
            Self::Sle => Self::Sgt,
            Self::Sgt => Self::Sle,
            Self::Sge => Self::Slt,
        }
    }

    /// Gets the comparison that holds for `(rhs, lhs)` exactly when `self`
    /// holds for `(lhs, rhs)`.
    #[must_use]
    pub fn swapped(self) -> Self {
        match self {
            Self::Eq => Self::Eq,
            Self::Ne => Self::Ne,
            Self::Ult => Self::Ugt,
            Self::Ule => Self::Uge,
            Self::Ugt => Self::Ult,
            Self::Uge => Self::Ule,
            Self::Slt => Self::Sgt,
            Self::Sle => Self::Sge,
            Self::Sgt => Self::Slt,
            Self::Sge => Self::Sle,
        }
    }

    /// Evaluates the comparison over concrete `lhs` and `rhs` of the provided
    /// `width`.
    #[must_use]
    pub fn apply(self, lhs: u64, rhs: u64, width: Width) -> bool {
        let (sl, sr) = (to_signed(lhs, width), to_signed(rhs, width));
        match self {
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
            Self::Ult => lhs < rhs,
            Self::Ule => lhs <= rhs,
            Self::Ugt => lhs > rhs,
            Self::Uge => lhs >= rhs,
            Self::Slt => sl < sr,
            Self::Sle => sl <= sr,
            Self::Sgt => sl > sr,
            Self::Sge => sl >= sr,
        }
    }
}

/// A symbolic expression node.
///
/// The children of a node are themselves interned, so the derived equality
/// only ever looks one level deep.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Expr {
    /// A concrete bit-vector.
    Constant { value: u64, width: Width },

    /// A single byte read from `updates` at `index`.
    Read { updates: UpdateList, index: ExprRef },

    /// `then` if `cond` holds, and `otherwise` if not.
    Select {
        cond:      ExprRef,
        then:      ExprRef,
        otherwise: ExprRef,
    },

    /// The bits of `high` followed by the bits of `low`.
    Concat { high: ExprRef, low: ExprRef },

    /// `width` bits of `expr`, starting at bit `offset`.
    Extract {
        expr:   ExprRef,
        offset: Width,
        width:  Width,
    },

    /// `expr` zero-extended to `width`.
    ZExt { expr: ExprRef, width: Width },

    /// `expr` sign-extended to `width`.
    SExt { expr: ExprRef, width: Width },

    /// The bitwise complement of `expr`.
    Not { expr: ExprRef },

    /// A binary bit-vector operation.
    Binary {
        op:  BinaryOp,
        lhs: ExprRef,
        rhs: ExprRef,
    },

    /// A comparison.
    Compare {
        op:  CompareOp,
        lhs: ExprRef,
        rhs: ExprRef,
    },
}

/// An interned expression node along with its cached metadata.
#[derive(Debug)]
pub struct ExprNode {
    /// The expression itself.
    kind: Expr,

    /// The width of the expression in bits.
    width: Width,

    /// The content hash of the expression.
    hash: u64,

    /// The creation order of the node within its builder.
    id: u64,
}

/// A shared handle to an interned expression.
#[derive(Clone, Debug)]
pub struct ExprRef(Rc<ExprNode>);

impl ExprRef {
    pub(crate) fn from_node(kind: Expr, width: Width, hash: u64, id: u64) -> Self {
        Self(Rc::new(ExprNode {
            kind,
            width,
            hash,
            id,
        }))
    }

    /// Gets the expression that this handle refers to.
    #[must_use]
    pub fn kind(&self) -> &Expr {
        &self.0.kind
    }

    /// Gets the width of the expression in bits.
    #[must_use]
    pub fn width(&self) -> Width {
        self.0.width
    }

    /// Gets the cached content hash of the expression.
    #[must_use]
    pub fn content_hash(&self) -> u64 {
        self.0.hash
    }

    /// Gets the creation order of the expression within its builder.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Gets the value of the expression if it is a constant.
    #[must_use]
    pub fn as_constant(&self) -> Option<u64> {
        match self.kind() {
            Expr::Constant { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Checks if the expression is a constant.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        self.as_constant().is_some()
    }

    /// Checks if the expression is the boolean constant `true`.
    #[must_use]
    pub fn is_true(&self) -> bool {
        self.width() == BOOL_WIDTH_BITS && self.as_constant() == Some(1)
    }

    /// Checks if the expression is the boolean constant `false`.
    #[must_use]
    pub fn is_false(&self) -> bool {
        self.width() == BOOL_WIDTH_BITS && self.as_constant() == Some(0)
    }

    pub(crate) fn downgrade(&self) -> std::rc::Weak<ExprNode> {
        Rc::downgrade(&self.0)
    }

    pub(crate) fn upgrade(weak: &std::rc::Weak<ExprNode>) -> Option<Self> {
        weak.upgrade().map(Self)
    }

    /// Collects every array that this expression reads from, including the
    /// arrays read by the indices and values of update lists.
    #[must_use]
    pub fn arrays(&self) -> Vec<Rc<Array>> {
        let mut seen = rustc_hash::FxHashSet::default();
        let mut arrays = Vec::new();
        let mut stack = vec![self.clone()];
        let mut visited = rustc_hash::FxHashSet::default();
        while let Some(expr) = stack.pop() {
            if !visited.insert(expr.id()) {
                continue;
            }
            match expr.kind() {
                Expr::Constant { .. } => {}
                Expr::Read { updates, index } => {
                    if seen.insert(updates.root().id()) {
                        arrays.push(updates.root().clone());
                    }
                    for node in updates.iter() {
                        stack.push(node.index().clone());
                        stack.push(node.value().clone());
                    }
                    stack.push(index.clone());
                }
                Expr::Select {
                    cond,
                    then,
                    otherwise,
                } => {
                    stack.push(cond.clone());
                    stack.push(then.clone());
                    stack.push(otherwise.clone());
                }
                Expr::Concat { high, low } => {
                    stack.push(high.clone());
                    stack.push(low.clone());
                }
                Expr::Extract { expr, .. }
                | Expr::ZExt { expr, .. }
                | Expr::SExt { expr, .. }
                | Expr::Not { expr } => stack.push(expr.clone()),
                Expr::Binary { lhs, rhs, .. } | Expr::Compare { lhs, rhs, .. } => {
                    stack.push(lhs.clone());
                    stack.push(rhs.clone());
                }
            }
        }
        arrays.sort_by_key(|a| a.id());
        arrays
    }

    /// Gets the direct children of this expression.
    #[must_use]
    pub fn children(&self) -> Vec<ExprRef> {
        match self.kind() {
            Expr::Constant { .. } => vec![],
            Expr::Read { index, .. } => vec![index.clone()],
            Expr::Select {
                cond,
                then,
                otherwise,
            } => vec![cond.clone(), then.clone(), otherwise.clone()],
            Expr::Concat { high, low } => vec![high.clone(), low.clone()],
            Expr::Extract { expr, .. }
            | Expr::ZExt { expr, .. }
            | Expr::SExt { expr, .. }
            | Expr::Not { expr } => vec![expr.clone()],
            Expr::Binary { lhs, rhs, .. } | Expr::Compare { lhs, rhs, .. } => {
                vec![lhs.clone(), rhs.clone()]
            }
        }
    }
}

/// Interned expressions are equal exactly when they are the same node.
impl PartialEq for ExprRef {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ExprRef {}

impl Hash for ExprRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

/// Expressions are ordered by creation, which is a total order consistent with
/// equality for the expressions of a single builder.
impl PartialOrd for ExprRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ExprRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id().cmp(&other.id())
    }
}

/// Renders the expression as an s-expression.
impl Display for ExprRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.kind() {
            Expr::Constant { value, width } => write!(f, "(w{width} {value:#x})"),
            Expr::Read { updates, index } => {
                write!(f, "(Read {} [{} updates] {index})", updates.root().name(), updates.len())
            }
            Expr::Select {
                cond,
                then,
                otherwise,
            } => write!(f, "(Select {cond} {then} {otherwise})"),
            Expr::Concat { high, low } => write!(f, "(Concat {high} {low})"),
            Expr::Extract {
                expr,
                offset,
                width,
            } => write!(f, "(Extract w{width} {offset} {expr})"),
            Expr::ZExt { expr, width } => write!(f, "(ZExt w{width} {expr})"),
            Expr::SExt { expr, width } => write!(f, "(SExt w{width} {expr})"),
            Expr::Not { expr } => write!(f, "(Not {expr})"),
            Expr::Binary { op, lhs, rhs } => write!(f, "({op:?} {lhs} {rhs})"),
            Expr::Compare { op, lhs, rhs } => write!(f, "({op:?} {lhs} {rhs})"),
        }
    }
}

/// Gets the mask that selects the low `width` bits of a value.
#[must_use]
pub fn mask(width: Width) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Interprets the low `width` bits of `value` as a two's complement number.
#[must_use]
pub fn to_signed(value: u64, width: Width) -> i64 {
    if width == 0 {
        return 0;
    }
    if width >= 64 {
        return value as i64;
    }
    let shift = 64 - width;
    ((value << shift) as i64) >> shift
}

/// Sign-extends the low `from` bits of `value` to `to` bits.
#[must_use]
pub fn sign_extend(value: u64, from: Width, to: Width) -> u64 {
    (to_signed(value, from) as u64) & mask(to)
}
