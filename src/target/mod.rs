//! This module contains the target subsystem, which directs exploration
//! towards particular places in the program.
//!
//! # How it Works
//!
//! A [`Target`] names a place that a state should reach: the end of a block,
//! one side of a branch, or an error at a source location. Targets are
//! interned in a [`TargetCache`] so that they can be compared by identity.
//!
//! Each state carries a [`TargetForest`] describing the sequences of targets it
//! still has to reach, along with the history of those it already has. The
//! [`TargetManager`] advances these forests as states move, using the
//! [`DistanceCalculator`] to decide whether a target has been reached, can
//! still be reached, or has been missed. When targets come from a trace
//! specification, the [`TargetedExecutionManager`] builds the forests and turns
//! the outcome of the run into true- and false-positive reports.

pub mod calculator;
pub mod distance;
pub mod forest;
pub mod manager;
pub mod spec;
pub mod targeted;

use std::{
    cell::{Cell, RefCell},
    cmp::Ordering,
    fmt::{Display, Formatter},
    hash::{Hash, Hasher},
    rc::{Rc, Weak},
};

pub use calculator::TargetCalculator;
pub use distance::{DistanceCalculator, DistanceResult, TargetKind, WeightResult};
pub use forest::{TargetForest, TargetsHistory, TargetsSet};
use itertools::Itertools;
pub use manager::{GuidanceKind, TargetManager};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
pub use targeted::{FalsePositive, TargetedExecutionManager, TargetedHaltsOnTraces, TruePositive};

use crate::program::{BlockId, Instruction};

/// The kinds of error that a target may ask to be reproduced.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum ReachWithError {
    DoubleFree,
    UseAfterFree,
    MayBeNullPointerException,
    #[serde(alias = "NullPointerException")]
    MustBeNullPointerException,
    NullCheckAfterDerefException,
    Reachable,
    None,
}

impl ReachWithError {
    /// Renders a list of errors as a single error, or as `(A|B)`.
    #[must_use]
    pub fn errors_string(errors: &[Self]) -> String {
        match errors {
            [single] => single.to_string(),
            _ => format!("({})", errors.iter().join("|")),
        }
    }
}

impl Display for ReachWithError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::DoubleFree => "DoubleFree",
            Self::UseAfterFree => "UseAfterFree",
            Self::MayBeNullPointerException => "MayBeNullPointerException",
            Self::MustBeNullPointerException => "NullPointerException",
            Self::NullCheckAfterDerefException => "NullCheckAfterDerefException",
            Self::Reachable => "Reachable",
            Self::None => "None",
        };
        write!(f, "{name}")
    }
}

/// A source range at which an error is expected.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct ErrorLocation {
    pub start_line:   u32,
    pub end_line:     u32,
    pub start_column: Option<u32>,
    pub end_column:   Option<u32>,
}

impl ErrorLocation {
    /// Checks whether the source position `line:column` lies in the range.
    #[must_use]
    pub fn contains(&self, line: u32, column: u32) -> bool {
        if line < self.start_line || line > self.end_line {
            return false;
        }
        match (self.start_column, self.end_column) {
            (Some(start), Some(end)) => column >= start && column <= end,
            (Some(start), None) => column >= start,
            (None, Some(end)) => column <= end,
            (None, None) => true,
        }
    }

    /// Checks whether `instruction` is at this location within `block`.
    #[must_use]
    pub fn is_the_same_as_in(&self, block: BlockId, instruction: &Instruction) -> bool {
        instruction.block == block
            && instruction
                .location
                .as_ref()
                .map_or(true, |l| self.contains(l.line, l.column))
    }
}

impl Display for ErrorLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start_line, self.end_line)?;
        if let (Some(start), Some(end)) = (self.start_column, self.end_column) {
            write!(f, ":{start}-{end}")?;
        }
        Ok(())
    }
}

/// A place in the program that a state can be directed towards.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum Target {
    /// Entering `block`, or leaving it through its last instruction if
    /// `at_end` is set.
    ReachBlock { block: BlockId, at_end: bool },

    /// Leaving `block` towards its successor at index `branch`.
    CoverBranch { block: BlockId, branch: usize },

    /// Reaching `location` in `block` and failing there with one of `errors`,
    /// as the final event of trace `id`.
    ReproduceError {
        errors:   Vec<ReachWithError>,
        id:       String,
        location: ErrorLocation,
        block:    BlockId,
    },
}

impl Target {
    /// Gets the block the target lies in.
    #[must_use]
    pub fn block(&self) -> BlockId {
        match self {
            Self::ReachBlock { block, .. }
            | Self::CoverBranch { block, .. }
            | Self::ReproduceError { block, .. } => *block,
        }
    }

    /// Checks whether reaching the target should end the state with an error.
    #[must_use]
    pub fn should_fail_on_this_target(&self) -> bool {
        matches!(self, Self::ReproduceError { .. })
    }

    /// Checks whether the target lies at the end of its block.
    #[must_use]
    pub fn is_at_end(&self) -> bool {
        matches!(self, Self::ReachBlock { at_end: true, .. } | Self::CoverBranch { .. })
    }

    /// Checks whether `error` is one of the errors that the target expects.
    #[must_use]
    pub fn is_that_error(&self, error: ReachWithError) -> bool {
        match self {
            Self::ReproduceError { errors, .. } => errors.contains(&error),
            _ => false,
        }
    }

    /// Gets the identifier of the trace the target ends, if any.
    #[must_use]
    pub fn trace_id(&self) -> Option<&str> {
        match self {
            Self::ReproduceError { id, .. } => Some(id),
            _ => None,
        }
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReachBlock { block, at_end } => {
                write!(f, "{block}{}", if *at_end { " (end)" } else { "" })
            }
            Self::CoverBranch { block, branch } => write!(f, "{block} branch {branch}"),
            Self::ReproduceError {
                errors,
                id,
                location,
                block,
            } => write!(
                f,
                "{} at {block} ({location}) for trace {id}",
                ReachWithError::errors_string(errors)
            ),
        }
    }
}

/// An interned target.
#[derive(Debug)]
pub struct TargetNode {
    id:       u64,
    target:   Target,
    reported: Cell<bool>,
}

/// A handle to an interned target, compared by identity.
#[derive(Clone, Debug)]
pub struct TargetRef(Rc<TargetNode>);

impl TargetRef {
    /// Gets the interning identity of the target.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    #[must_use]
    pub fn target(&self) -> &Target {
        &self.0.target
    }

    /// Checks whether the target has already been reported as reached.
    #[must_use]
    pub fn is_reported(&self) -> bool {
        self.0.reported.get()
    }

    pub fn set_reported(&self, reported: bool) {
        self.0.reported.set(reported);
    }
}

impl std::ops::Deref for TargetRef {
    type Target = Target;

    fn deref(&self) -> &Target {
        &self.0.target
    }
}

impl PartialEq for TargetRef {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for TargetRef {}

impl PartialOrd for TargetRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TargetRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.id.cmp(&other.0.id)
    }
}

impl Hash for TargetRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl Display for TargetRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.0.target.fmt(f)
    }
}

/// The interning table for targets.
///
/// Interning the same target twice yields the same handle for as long as some
/// handle to it is alive.
#[derive(Debug, Default)]
pub struct TargetCache {
    targets: RefCell<FxHashMap<Target, Weak<TargetNode>>>,
    next_id: Cell<u64>,
}

impl TargetCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the interned handle for `target`.
    pub fn intern(&self, target: Target) -> TargetRef {
        let mut targets = self.targets.borrow_mut();
        if let Some(node) = targets.get(&target).and_then(Weak::upgrade) {
            return TargetRef(node);
        }
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let node = Rc::new(TargetNode {
            id,
            target: target.clone(),
            reported: Cell::new(false),
        });
        targets.insert(target, Rc::downgrade(&node));
        TargetRef(node)
    }

    /// Creates a block target.
    pub fn reach_block(&self, block: BlockId, at_end: bool) -> TargetRef {
        self.intern(Target::ReachBlock { block, at_end })
    }

    /// Creates a branch target.
    pub fn cover_branch(&self, block: BlockId, branch: usize) -> TargetRef {
        self.intern(Target::CoverBranch { block, branch })
    }

    /// Creates an error target.
    pub fn reproduce_error(
        &self,
        errors: Vec<ReachWithError>,
        id: impl Into<String>,
        location: ErrorLocation,
        block: BlockId,
    ) -> TargetRef {
        self.intern(Target::ReproduceError {
            errors,
            id: id.into(),
            location,
            block,
        })
    }
}

#[cfg(test)]
mod test {
    use crate::{
        program::BlockId,
        target::{ErrorLocation, ReachWithError, TargetCache},
    };

    #[test]
    fn interns_equal_targets_to_the_same_handle() {
        let cache = TargetCache::new();
        let a = cache.reach_block(BlockId(1), true);
        let b = cache.reach_block(BlockId(1), true);
        let c = cache.reach_block(BlockId(1), false);
        assert_eq!(a, b);
        assert_ne!(a, c);

        a.set_reported(true);
        assert!(b.is_reported());
    }

    #[test]
    fn renders_error_lists() {
        assert_eq!(
            ReachWithError::errors_string(&[ReachWithError::DoubleFree]),
            "DoubleFree"
        );
        assert_eq!(
            ReachWithError::errors_string(&[
                ReachWithError::UseAfterFree,
                ReachWithError::DoubleFree
            ]),
            "(UseAfterFree|DoubleFree)"
        );
    }

    #[test]
    fn error_locations_respect_columns() {
        let location = ErrorLocation {
            start_line:   4,
            end_line:     6,
            start_column: Some(2),
            end_column:   Some(8),
        };
        assert!(location.contains(5, 3));
        assert!(!location.contains(5, 9));
        assert!(!location.contains(7, 3));
    }
}
