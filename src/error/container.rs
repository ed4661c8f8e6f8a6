//! This module contains the containers that tie errors to the instruction at
//! which they occurred, and that gather them over a run.

use std::fmt::{Display, Formatter};

use thiserror::Error;

use crate::program::InstructionId;

/// An error raised while executing a particular instruction.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub struct Located<E>
where
    E: Clone,
{
    /// The instruction being executed.
    pub location: InstructionId,

    pub payload: E,
}

/// Instructions are shown by their global index in hexadecimal.
impl<E> Display for Located<E>
where
    E: Display + Clone,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[0x{}]: {}",
            hex::encode(self.location.0.to_be_bytes()),
            self.payload
        )
    }
}

/// Types to which the instruction being executed can be attached.
pub trait Locatable: Sized {
    type Located;

    /// Attaches `instruction` as the location of the error.
    fn locate(self, instruction: InstructionId) -> Self::Located;
}

impl<T, E> Locatable for Result<T, E>
where
    E: std::error::Error + Clone,
{
    type Located = Result<T, Located<E>>;

    fn locate(self, instruction: InstructionId) -> Self::Located {
        self.map_err(|payload| Located {
            location: instruction,
            payload,
        })
    }
}

/// The errors gathered over a run, ordered by the instruction at which they
/// occurred. Errors at the same instruction keep the order they arrived in.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub struct Errors<E>
where
    E: Clone,
{
    located: Vec<Located<E>>,
}

impl<E> Errors<E>
where
    E: Clone,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            located: Vec::new(),
        }
    }

    /// Adds `error`, keeping the container ordered.
    pub fn add(&mut self, error: Located<E>) {
        let at = self
            .located
            .partition_point(|e| e.location <= error.location);
        self.located.insert(at, error);
    }

    /// Adds `payload` as having occurred at `instruction`.
    pub fn add_at(&mut self, instruction: InstructionId, payload: E) {
        self.add(Located {
            location: instruction,
            payload,
        });
    }

    #[must_use]
    pub fn payloads(&self) -> &[Located<E>] {
        &self.located
    }

    /// Gets the errors that occurred at `instruction`.
    pub fn at(&self, instruction: InstructionId) -> impl Iterator<Item = &E> {
        self.located
            .iter()
            .filter(move |e| e.location == instruction)
            .map(|e| &e.payload)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.located.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.located.is_empty()
    }

    /// Converts every payload into the more general error `F`.
    #[must_use]
    pub fn widen<F>(self) -> Errors<F>
    where
        F: From<E> + Clone,
    {
        Errors {
            located: self
                .located
                .into_iter()
                .map(|e| Located {
                    location: e.location,
                    payload:  F::from(e.payload),
                })
                .collect(),
        }
    }
}

impl<E> Default for Errors<E>
where
    E: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> From<Located<E>> for Errors<E>
where
    E: Clone,
{
    fn from(value: Located<E>) -> Self {
        Self {
            located: vec![value],
        }
    }
}

impl<E> Display for Errors<E>
where
    E: Display + Clone,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.located.len() {
            0 => write!(f, "No errors"),
            1 => write!(f, "1 error: {}", self.located[0]),
            n => {
                writeln!(f, "{n} errors:")?;
                for error in &self.located {
                    writeln!(f, "  {error}")?;
                }
                Ok(())
            }
        }
    }
}
