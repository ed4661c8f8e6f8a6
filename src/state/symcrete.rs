//! This module contains symcretes: symbolic values that the memory model has
//! had to give a concrete witness to, such as the size of an allocation or
//! the address of a lazily initialized object.

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
    rc::Rc,
};

use serde::{Deserialize, Serialize};

use crate::{
    expr::{Array, Assignment, ExprRef},
    memory::MemoryObjectId,
};

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct SymcreteId(pub u64);

impl Display for SymcreteId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "sc{}", self.0)
    }
}

/// What a symcrete stands for.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum SymcreteKind {
    /// The size of an object.
    Size,

    /// The base address of an object.
    Address,
}

impl Display for SymcreteKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Size => write!(f, "size"),
            Self::Address => write!(f, "address"),
        }
    }
}

/// A symbolic value together with the object it describes.
#[derive(Clone, Debug)]
pub struct Symcrete {
    pub id:         SymcreteId,
    pub kind:       SymcreteKind,
    pub expr:       ExprRef,
    pub array:      Option<Rc<Array>>,
    pub object:     MemoryObjectId,
    pub depends_on: Vec<SymcreteId>,
}

/// The symcretes of one execution state.
///
/// Edges between symcretes are stored as identifiers, so the table can be
/// cloned with the state without duplicating anything.
#[derive(Clone, Debug, Default)]
pub struct SymcreteTable {
    symcretes: imbl::OrdMap<SymcreteId, Rc<Symcrete>>,
}

impl SymcreteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, symcrete: Symcrete) {
        self.symcretes.insert(symcrete.id, Rc::new(symcrete));
    }

    #[must_use]
    pub fn get(&self, id: SymcreteId) -> Option<&Rc<Symcrete>> {
        self.symcretes.get(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.symcretes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symcretes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<Symcrete>> {
        self.symcretes.values()
    }

    /// Gets every symcrete that `id` transitively depends on, excluding `id`
    /// itself.
    #[must_use]
    pub fn dependencies(&self, id: SymcreteId) -> Vec<SymcreteId> {
        let mut found = Vec::new();
        let mut pending = self
            .get(id)
            .map(|s| s.depends_on.clone())
            .unwrap_or_default();
        while let Some(next) = pending.pop() {
            if next == id || found.contains(&next) {
                continue;
            }
            found.push(next);
            if let Some(symcrete) = self.get(next) {
                pending.extend(symcrete.depends_on.iter().copied());
            }
        }
        found.sort();
        found
    }

    /// Evaluates every symcrete under `assignment`.
    #[must_use]
    pub fn concretize(&self, assignment: &Assignment) -> BTreeMap<SymcreteId, u64> {
        self.symcretes
            .iter()
            .map(|(id, s)| (*id, assignment.evaluate(&s.expr)))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use crate::{
        expr::{ArraySource, Assignment, Context, ExprBuilder, UpdateList},
        memory::MemoryObjectId,
        state::{Symcrete, SymcreteId, SymcreteKind, SymcreteTable},
    };

    #[test]
    fn follows_dependencies_transitively() -> anyhow::Result<()> {
        let builder = ExprBuilder::new(Context::default());
        let array = builder.create_array("size", 1, ArraySource::LazyInitializationSize);
        let expr = builder.zext(&builder.read(&UpdateList::new(array.clone()), &builder.pointer(0)), 64);

        let mut table = SymcreteTable::new();
        for (id, depends_on) in [(1, vec![]), (2, vec![1]), (3, vec![2])] {
            table.add(Symcrete {
                id: SymcreteId(id),
                kind: SymcreteKind::Size,
                expr: expr.clone(),
                array: Some(array.clone()),
                object: MemoryObjectId(1),
                depends_on: depends_on.into_iter().map(SymcreteId).collect(),
            });
        }
        assert_eq!(table.dependencies(SymcreteId(3)), vec![SymcreteId(1), SymcreteId(2)]);
        assert!(table.dependencies(SymcreteId(1)).is_empty());

        let mut assignment = Assignment::new();
        assignment.bind(array.id(), vec![42]);
        let values = table.concretize(&assignment);
        assert_eq!(values.get(&SymcreteId(2)), Some(&42));

        Ok(())
    }
}
