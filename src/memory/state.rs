//! This module contains the [`ObjectState`], the contents of a single memory
//! object.

use std::rc::Rc;

use crate::{
    constant::BYTE_WIDTH_BITS,
    error::memory::{Error, Result},
    expr::{Array, ExprBuilder, ExprRef, UpdateList, Width},
    memory::MemoryObjectId,
};

/// The byte contents of one memory object.
///
/// Bytes written at concrete offsets are kept in a sparse map, and everything
/// else is recorded in a persistent update list over the object's root array.
/// Every byte in the map is newer than every write in the update list, which
/// is maintained by flushing the map into the list before a write at a
/// symbolic offset.
///
/// Object states are shared between execution states behind an [`Rc`], and are
/// copied on write.
#[derive(Clone, Debug)]
pub struct ObjectState {
    object:    MemoryObjectId,
    known:     imbl::OrdMap<u64, ExprRef>,
    updates:   UpdateList,
    read_only: bool,
}

impl ObjectState {
    /// Creates the contents of `object`, initially those of `root`.
    #[must_use]
    pub fn new(object: MemoryObjectId, root: Rc<Array>) -> Self {
        Self {
            object,
            known: imbl::OrdMap::new(),
            updates: UpdateList::new(root),
            read_only: false,
        }
    }

    #[must_use]
    pub fn object(&self) -> MemoryObjectId {
        self.object
    }

    /// Gets the array that the contents are rooted in.
    #[must_use]
    pub fn root(&self) -> &Rc<Array> {
        self.updates.root()
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Replaces the contents with those of `root`, discarding every write.
    pub fn reset(&mut self, root: Rc<Array>) {
        self.known = imbl::OrdMap::new();
        self.updates = UpdateList::new(root);
    }

    /// Gets the update list that describes the full contents, including the
    /// bytes in the sparse map.
    #[must_use]
    pub fn flushed_updates(&self, builder: &ExprBuilder) -> UpdateList {
        let width = builder.context().pointer_width();
        self.known.iter().fold(self.updates.clone(), |list, (offset, value)| {
            list.extend(builder.constant(*offset, width), value.clone())
        })
    }

    /// Reads the byte at `offset`.
    #[must_use]
    pub fn read8(&self, builder: &ExprBuilder, offset: &ExprRef) -> ExprRef {
        match offset.as_constant() {
            Some(index) => match self.known.get(&index) {
                Some(value) => value.clone(),
                None => builder.read(&self.updates, offset),
            },
            None => builder.read(&self.flushed_updates(builder), offset),
        }
    }

    /// Reads a value of `width` bits starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `width` is not a whole number of bytes.
    pub fn read(&self, builder: &ExprBuilder, offset: &ExprRef, width: Width) -> Result<ExprRef> {
        if width == 0 || width % BYTE_WIDTH_BITS != 0 {
            return Err(Error::InvalidAccessWidth { width });
        }
        let bytes: Vec<ExprRef> = (0..u64::from(width / BYTE_WIDTH_BITS))
            .map(|i| {
                let at = builder.add(offset, &builder.constant(i, offset.width()));
                self.read8(builder, &at)
            })
            .collect();
        Ok(builder.concat_bytes(&bytes))
    }

    /// Writes the byte `value` at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the object is read-only.
    pub fn write8(&mut self, builder: &ExprBuilder, offset: &ExprRef, value: ExprRef) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnlyWrite { id: self.object });
        }
        match offset.as_constant() {
            Some(index) => {
                self.known.insert(index, value);
            }
            None => {
                self.updates = self.flushed_updates(builder);
                self.known = imbl::OrdMap::new();
                self.updates = self.updates.extend(offset.clone(), value);
            }
        }
        Ok(())
    }

    /// Writes `value` starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the object is read-only or the width of `value` is
    /// not a whole number of bytes.
    pub fn write(&mut self, builder: &ExprBuilder, offset: &ExprRef, value: &ExprRef) -> Result<()> {
        let width = value.width();
        if width == 0 || width % BYTE_WIDTH_BITS != 0 {
            return Err(Error::InvalidAccessWidth { width });
        }
        for (i, byte) in builder.split_bytes(value).into_iter().enumerate() {
            let at = builder.add(offset, &builder.constant(i as u64, offset.width()));
            self.write8(builder, &at, byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use crate::{
        error::memory::Error,
        expr::{ArraySource, Context, ExprBuilder, UpdateList},
        memory::{MemoryObjectId, ObjectState},
    };

    #[test]
    fn can_read_back_concrete_writes() -> anyhow::Result<()> {
        let builder = ExprBuilder::new(Context::default());
        let root = builder.create_array("buffer", 16, ArraySource::Zeroed);
        let mut state = ObjectState::new(MemoryObjectId(1), root);

        let value = builder.constant(0x1122_3344, 32);
        state.write(&builder, &builder.pointer(4), &value)?;
        assert_eq!(state.read(&builder, &builder.pointer(4), 32)?, value);
        assert_eq!(
            state.read(&builder, &builder.pointer(5), 8)?.as_constant(),
            Some(0x33)
        );
        assert_eq!(
            state.read(&builder, &builder.pointer(0), 32)?.as_constant(),
            Some(0)
        );

        Ok(())
    }

    #[test]
    fn symbolic_writes_shadow_older_bytes() -> anyhow::Result<()> {
        let builder = ExprBuilder::new(Context::default());
        let root = builder.create_array("buffer", 4, ArraySource::Zeroed);
        let input = builder.create_array("index", 1, ArraySource::MakeSymbolic);
        let index = builder.zext(
            &builder.read(&UpdateList::new(input), &builder.pointer(0)),
            64,
        );

        let mut state = ObjectState::new(MemoryObjectId(1), root);
        state.write8(&builder, &builder.pointer(1), builder.constant(5, 8))?;
        let before = state.clone();
        state.write8(&builder, &index, builder.constant(9, 8))?;

        assert!(!state.read8(&builder, &builder.pointer(1)).is_constant());
        assert_eq!(
            before.read8(&builder, &builder.pointer(1)).as_constant(),
            Some(5)
        );

        Ok(())
    }

    #[test]
    fn rejects_writes_to_read_only_objects() {
        let builder = ExprBuilder::new(Context::default());
        let root = builder.create_array("constant", 4, ArraySource::Zeroed);
        let mut state = ObjectState::new(MemoryObjectId(3), Rc::clone(&root));
        state.set_read_only(true);

        let result = state.write8(&builder, &builder.pointer(0), builder.constant(1, 8));
        assert_eq!(result, Err(Error::ReadOnlyWrite { id: MemoryObjectId(3) }));
    }
}
