//! This module contains the arrays that symbolic memory contents are rooted in,
//! and the persistent update lists that record writes to them.

use std::{
    fmt::{Display, Formatter},
    hash::{Hash, Hasher},
    rc::Rc,
};

use serde::{Deserialize, Serialize};

use crate::expr::ExprRef;

/// The identity of an [`Array`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct ArrayId(pub u64);

impl Display for ArrayId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "arr{}", self.0)
    }
}

/// Where the contents of an array come from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ArraySource {
    /// Freshly allocated memory that reads as zero.
    Zeroed,

    /// Memory with known initial contents, such as an initialised global.
    ///
    /// Bytes past the end of `values` read as zero.
    Constant { values: Rc<[u8]> },

    /// An input explicitly marked as symbolic by the program.
    MakeSymbolic,

    /// A symbolic argument to the function that exploration started in.
    Argument { index: u32 },

    /// The contents of a lazily initialized object.
    LazyInitializationContent,

    /// The size of a lazily initialized object.
    LazyInitializationSize,

    /// The size of an allocation whose requested size was symbolic.
    AllocationSize,
}

impl ArraySource {
    /// Checks if the array's contents are unknown, and hence solved for.
    #[must_use]
    pub fn is_symbolic(&self) -> bool {
        !matches!(self, Self::Zeroed | Self::Constant { .. })
    }

    /// Checks if the array holds input to the program, as opposed to values the
    /// engine itself introduced.
    ///
    /// Pointers computed purely from input are the ones that may be lazily
    /// initialized.
    #[must_use]
    pub fn is_input(&self) -> bool {
        matches!(
            self,
            Self::MakeSymbolic | Self::Argument { .. } | Self::LazyInitializationContent
        )
    }
}

/// A byte-addressed array that memory contents are rooted in.
///
/// Arrays are compared by identity.
#[derive(Debug)]
pub struct Array {
    /// The unique identity of the array.
    id: ArrayId,

    /// The unique, human-readable name of the array.
    name: String,

    /// The number of bytes in the array.
    size: u64,

    /// Where the contents of the array come from.
    source: ArraySource,
}

impl Array {
    pub(crate) fn new(id: ArrayId, name: String, size: u64, source: ArraySource) -> Self {
        Self {
            id,
            name,
            size,
            source,
        }
    }

    /// Gets the identity of the array.
    #[must_use]
    pub fn id(&self) -> ArrayId {
        self.id
    }

    /// Gets the name of the array.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the number of bytes in the array.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Gets the source of the array's contents.
    #[must_use]
    pub fn source(&self) -> &ArraySource {
        &self.source
    }

    /// Checks if the array's contents are symbolic.
    #[must_use]
    pub fn is_symbolic(&self) -> bool {
        self.source.is_symbolic()
    }

    /// Gets the byte at `index` if the array's contents are concrete.
    #[must_use]
    pub fn constant_byte(&self, index: u64) -> Option<u8> {
        match &self.source {
            ArraySource::Zeroed => Some(0),
            ArraySource::Constant { values } => Some(
                usize::try_from(index)
                    .ok()
                    .and_then(|i| values.get(i).copied())
                    .unwrap_or(0),
            ),
            _ => None,
        }
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Array {}

impl Hash for Array {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// A single write recorded in an [`UpdateList`].
#[derive(Debug)]
pub struct UpdateNode {
    /// The byte index that was written.
    index: ExprRef,

    /// The byte that was written.
    value: ExprRef,

    /// The older writes.
    next: Option<Rc<UpdateNode>>,

    /// A hash over this node and every older node.
    hash: u64,

    /// The number of writes including this one.
    len: usize,
}

impl UpdateNode {
    /// Gets the index written by this update.
    #[must_use]
    pub fn index(&self) -> &ExprRef {
        &self.index
    }

    /// Gets the value written by this update.
    #[must_use]
    pub fn value(&self) -> &ExprRef {
        &self.value
    }

    /// Gets the next-older update, if any.
    #[must_use]
    pub fn next(&self) -> Option<&Rc<UpdateNode>> {
        self.next.as_ref()
    }
}

/// A persistent, newest-first list of byte writes applied to a root array.
///
/// Extending a list never changes it; it produces a new list that shares every
/// older write with the original.
#[derive(Clone, Debug)]
pub struct UpdateList {
    root: Rc<Array>,
    head: Option<Rc<UpdateNode>>,
}

impl UpdateList {
    /// Creates a list with no writes over `root`.
    #[must_use]
    pub fn new(root: Rc<Array>) -> Self {
        Self { root, head: None }
    }

    /// Gets the array that the writes apply to.
    #[must_use]
    pub fn root(&self) -> &Rc<Array> {
        &self.root
    }

    /// Gets the newest write, if any.
    #[must_use]
    pub fn head(&self) -> Option<&Rc<UpdateNode>> {
        self.head.as_ref()
    }

    /// Gets the number of writes in the list.
    #[must_use]
    pub fn len(&self) -> usize {
        self.head.as_ref().map_or(0, |h| h.len)
    }

    /// Checks if the list records no writes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Produces a new list with the write of `value` at `index` on top of the
    /// writes in `self`.
    #[must_use]
    pub fn extend(&self, index: ExprRef, value: ExprRef) -> Self {
        let next = self.head.clone();
        let len = self.len() + 1;
        let hash = {
            let mut hasher = rustc_hash::FxHasher::default();
            index.content_hash().hash(&mut hasher);
            value.content_hash().hash(&mut hasher);
            next.as_ref().map_or(0, |n| n.hash).hash(&mut hasher);
            hasher.finish()
        };
        let head = Some(Rc::new(UpdateNode {
            index,
            value,
            next,
            hash,
            len,
        }));
        Self {
            root: self.root.clone(),
            head,
        }
    }

    /// Produces the list that starts at `node`, which must be one of the nodes
    /// of `self`.
    #[must_use]
    pub fn starting_at(&self, node: Option<Rc<UpdateNode>>) -> Self {
        Self {
            root: self.root.clone(),
            head: node,
        }
    }

    /// Iterates over the writes from newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = &UpdateNode> {
        let mut current = self.head.as_deref();
        std::iter::from_fn(move || {
            let node = current?;
            current = node.next.as_deref();
            Some(node)
        })
    }

    fn content_hash(&self) -> u64 {
        self.head.as_ref().map_or(0, |h| h.hash)
    }
}

impl PartialEq for UpdateList {
    fn eq(&self, other: &Self) -> bool {
        if self.root != other.root || self.len() != other.len() {
            return false;
        }
        let mut left = self.head.as_ref();
        let mut right = other.head.as_ref();
        loop {
            match (left, right) {
                (None, None) => return true,
                (Some(l), Some(r)) => {
                    if Rc::ptr_eq(l, r) {
                        return true;
                    }
                    if l.hash != r.hash || l.index != r.index || l.value != r.value {
                        return false;
                    }
                    left = l.next.as_ref();
                    right = r.next.as_ref();
                }
                _ => return false,
            }
        }
    }
}

impl Eq for UpdateList {}

impl Hash for UpdateList {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.root.id.hash(state);
        state.write_u64(self.content_hash());
    }
}
