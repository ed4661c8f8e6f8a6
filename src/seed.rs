//! This module contains the seeds that replay known inputs through the
//! executor.
//!
//! A seed is a set of concrete contents for the symbolic objects of a run,
//! typically the objects of a [`TestCase`] produced by an earlier run. While
//! seeds are replayed, every state carries the seeds that are consistent with
//! its path. At a fork the seeds are split between the two sides by
//! evaluating the condition under each of them, so that each seed is followed
//! by exactly one state down to the end of its path.
//!
//! Seeds are given as JSON, with object contents in hexadecimal:
//!
//! ```json
//! [{
//!     "id": "crash-1",
//!     "objects": [{ "name": "word", "bytes": "2a000000" }]
//! }]
//! ```

use std::{collections::BTreeSet, rc::Rc};

use serde::{Deserialize, Serialize};

use crate::{
    constant::{
        DEFAULT_ALLOW_SEED_EXTENSION,
        DEFAULT_ALLOW_SEED_TRUNCATION,
        DEFAULT_NAMED_SEED_MATCHING,
        DEFAULT_ONLY_REPLAY_SEEDS,
        DEFAULT_ONLY_SEED,
        DEFAULT_ZERO_SEED_EXTENSION,
    },
    error::seed::{Error, Result},
    expr::Assignment,
    report::TestCase,
};

/// The concrete contents of one symbolic object.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SeedObject {
    pub name: String,

    #[serde(with = "hex::serde")]
    pub bytes: Vec<u8>,
}

/// Concrete contents for the symbolic objects of a run.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Seed {
    pub id:      String,
    pub objects: Vec<SeedObject>,
}

impl Seed {
    /// Checks that the seed names at least one object, and no object twice.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the seed is malformed.
    pub fn validate(&self) -> Result<()> {
        if self.objects.is_empty() {
            return Err(Error::EmptySeed { id: self.id.clone() });
        }
        let mut names = BTreeSet::new();
        for object in &self.objects {
            if !names.insert(object.name.as_str()) {
                return Err(Error::DuplicateObject {
                    id:   self.id.clone(),
                    name: object.name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Replays the inputs of an earlier test case.
impl From<&TestCase> for Seed {
    fn from(value: &TestCase) -> Self {
        let objects = value
            .objects
            .iter()
            .map(|o| SeedObject {
                name:  o.name.clone(),
                bytes: o.bytes.clone(),
            })
            .collect();
        Self {
            id: format!("test{}", value.id),
            objects,
        }
    }
}

/// Parses a list of seeds from `json`.
///
/// # Errors
///
/// Returns [`Err`] if the text is not a list of seeds, or if some seed in it
/// fails [`Seed::validate`].
pub fn parse(json: &str) -> Result<Vec<Seed>> {
    let seeds: Vec<Seed> = serde_json::from_str(json)?;
    for seed in &seeds {
        seed.validate()?;
    }
    Ok(seeds)
}

/// How the seeds of a run are matched with its symbolic objects.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Whether states that no seed follows are abandoned while seeds remain.
    pub only_replay_seeds: bool,

    /// Whether the run halts once no state carries a seed.
    pub only_seed: bool,

    /// Whether a seed object may be shorter than its symbolic object, the
    /// remaining bytes being zero.
    pub allow_seed_extension: bool,

    /// Whether symbolic objects that no seed object matches are zero.
    pub zero_seed_extension: bool,

    /// Whether a seed object may be longer than its symbolic object.
    pub allow_seed_truncation: bool,

    /// Whether seed objects are matched by name rather than by position.
    pub named_seed_matching: bool,
}

impl Config {
    #[must_use]
    pub fn with_only_replay_seeds(mut self, value: bool) -> Self {
        self.only_replay_seeds = value;
        self
    }

    #[must_use]
    pub fn with_only_seed(mut self, value: bool) -> Self {
        self.only_seed = value;
        self
    }

    /// Sets whether short seed objects are zero-extended.
    #[must_use]
    pub fn with_allow_seed_extension(mut self, value: bool) -> Self {
        self.allow_seed_extension = value;
        self
    }

    /// Sets whether unmatched symbolic objects are zero.
    #[must_use]
    pub fn with_zero_seed_extension(mut self, value: bool) -> Self {
        self.zero_seed_extension = value;
        self
    }

    /// Sets whether long seed objects are truncated.
    #[must_use]
    pub fn with_allow_seed_truncation(mut self, value: bool) -> Self {
        self.allow_seed_truncation = value;
        self
    }

    #[must_use]
    pub fn with_named_seed_matching(mut self, value: bool) -> Self {
        self.named_seed_matching = value;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            only_replay_seeds:     DEFAULT_ONLY_REPLAY_SEEDS,
            only_seed:             DEFAULT_ONLY_SEED,
            allow_seed_extension:  DEFAULT_ALLOW_SEED_EXTENSION,
            zero_seed_extension:   DEFAULT_ZERO_SEED_EXTENSION,
            allow_seed_truncation: DEFAULT_ALLOW_SEED_TRUNCATION,
            named_seed_matching:   DEFAULT_NAMED_SEED_MATCHING,
        }
    }
}

/// A seed being followed by a state, along with the values it gives to the
/// arrays created on the state's path so far.
#[derive(Clone, Debug)]
pub struct SeedInfo {
    seed: Rc<Seed>,

    /// The values of the arrays bound from the seed.
    pub assignment: Assignment,

    /// The objects of the seed already matched with a symbolic object.
    used: BTreeSet<usize>,

    /// The number of constraints on the path known to hold under
    /// `assignment`.
    pub checked: usize,
}

impl SeedInfo {
    #[must_use]
    pub fn new(seed: Rc<Seed>) -> Self {
        Self {
            seed,
            assignment: Assignment::new(),
            used: BTreeSet::new(),
            checked: 0,
        }
    }

    #[must_use]
    pub fn seed(&self) -> &Seed {
        &self.seed
    }

    /// Takes the seed object for the symbolic object called `name`.
    ///
    /// By name, this is the unused object with the same name. By position, it
    /// is the first object not yet used.
    pub fn next_input(&mut self, name: &str, by_name: bool) -> Option<&SeedObject> {
        let index = self
            .seed
            .objects
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.used.contains(i))
            .find(|(_, o)| !by_name || o.name == name)
            .map(|(i, _)| i)?;
        self.used.insert(index);
        self.seed.objects.get(index)
    }
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use crate::{
        error::seed::Error,
        seed,
        seed::{Seed, SeedInfo, SeedObject},
    };

    fn object(name: &str, bytes: &[u8]) -> SeedObject {
        SeedObject {
            name:  name.to_string(),
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn can_parse_seeds_with_hex_contents() -> anyhow::Result<()> {
        let json = r#"[{ "id": "s", "objects": [{ "name": "word", "bytes": "2a00ff" }] }]"#;
        let seeds = seed::parse(json)?;
        assert_eq!(seeds.len(), 1);
        assert_eq!(seeds[0].objects[0].bytes, vec![0x2a, 0x00, 0xff]);

        Ok(())
    }

    #[test]
    fn rejects_malformed_seeds() {
        assert!(matches!(
            seed::parse(r#"[{ "id": "s", "objects": [{ "name": "w", "bytes": "zz" }] }]"#),
            Err(Error::Malformed { .. })
        ));
        assert_eq!(
            seed::parse(r#"[{ "id": "s", "objects": [] }]"#),
            Err(Error::EmptySeed { id: "s".into() })
        );
        let duplicated = Seed {
            id:      "d".into(),
            objects: vec![object("a", &[1]), object("a", &[2])],
        };
        assert_eq!(
            duplicated.validate(),
            Err(Error::DuplicateObject {
                id:   "d".into(),
                name: "a".into(),
            })
        );
    }

    #[test]
    fn matches_inputs_by_position_or_by_name() {
        let seed = Rc::new(Seed {
            id:      "s".into(),
            objects: vec![object("a", &[1]), object("b", &[2])],
        });

        let mut positional = SeedInfo::new(seed.clone());
        assert_eq!(positional.next_input("b", false).map(|o| o.bytes[0]), Some(1));
        assert_eq!(positional.next_input("a", false).map(|o| o.bytes[0]), Some(2));
        assert!(positional.next_input("c", false).is_none());

        let mut named = SeedInfo::new(seed);
        assert_eq!(named.next_input("b", true).map(|o| o.bytes[0]), Some(2));
        assert!(named.next_input("b", true).is_none());
        assert!(named.next_input("c", true).is_none());
    }
}
