//! This module contains the format of the trace specifications that direct
//! error-guided exploration, and the mapping of their locations onto the
//! program.
//!
//! A specification is a JSON array of traces. Each trace is a sequence of
//! source locations that a path should pass through, ending at the location
//! where one of the listed errors is expected.
//!
//! ```json
//! [{
//!     "id": "trace-1",
//!     "locations": [
//!         { "file": "src/main.c", "start_line": 4, "end_line": 4 },
//!         { "file": "src/main.c", "start_line": 9, "end_line": 9, "start_column": 5, "end_column": 12 }
//!     ],
//!     "errors": ["NullPointerException"]
//! }]
//! ```

use serde::{Deserialize, Serialize};

use crate::{
    error::target::{Error, Result},
    program::{Block, SourceLocation},
    target::{ErrorLocation, ReachWithError},
};

/// A range of source code in a file.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct LocationSpec {
    pub file:       String,
    pub start_line: u32,
    pub end_line:   u32,

    #[serde(default)]
    pub start_column: Option<u32>,

    #[serde(default)]
    pub end_column: Option<u32>,
}

impl LocationSpec {
    /// Gets the range as an error location, dropping the file.
    #[must_use]
    pub fn error_location(&self) -> ErrorLocation {
        ErrorLocation {
            start_line:   self.start_line,
            end_line:     self.end_line,
            start_column: self.start_column,
            end_column:   self.end_column,
        }
    }

    /// Checks whether the file `name` is the file of this location.
    ///
    /// The names match when one is a path suffix of the other, either ending
    /// at a path separator or, for suffixes of at least three characters,
    /// covering one of the names entirely.
    #[must_use]
    pub fn is_inside_file(&self, name: &str) -> bool {
        let name = name.as_bytes();
        let file = self.file.as_bytes();
        let mut suffix = 0;
        let mut m = name.len();
        let mut n = file.len();
        while m > 0 && n > 0 && name[m - 1] == file[n - 1] {
            m -= 1;
            n -= 1;
            suffix += 1;
            if is_separator(file[n]) {
                return true;
            }
        }
        suffix >= 3
            && if n == 0 {
                m == 0 || is_separator(name[m - 1])
            } else {
                m == 0 && is_separator(file[n - 1])
            }
    }

    /// Checks whether some of `block` lies within this location.
    ///
    /// Without columns, the lines spanned by the block must overlap the range.
    /// With columns, some instruction must be positioned inside the range.
    #[must_use]
    pub fn is_inside_block(&self, block: &Block) -> bool {
        let locations: Vec<&SourceLocation> = block
            .instructions
            .iter()
            .filter_map(|i| i.location.as_ref())
            .filter(|l| self.is_inside_file(&l.file))
            .collect();
        let (Some(first), Some(last)) = (locations.first(), locations.last()) else {
            return false;
        };
        if self.start_column.is_none() {
            return first.line <= self.end_line && self.start_line <= last.line;
        }
        let range = self.error_location();
        locations.iter().any(|l| range.contains(l.line, l.column))
    }
}

impl std::fmt::Display for LocationSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.error_location())
    }
}

fn is_separator(c: u8) -> bool {
    c == b'/' || c == b'\\'
}

/// A single trace ending in an expected error.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TraceSpec {
    pub id:        String,
    pub locations: Vec<LocationSpec>,
    pub errors:    Vec<ReachWithError>,
}

impl TraceSpec {
    /// Checks that the trace can be turned into targets.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the trace has no locations or no error kinds.
    pub fn validate(&self) -> Result<()> {
        if self.locations.is_empty() {
            return Err(Error::EmptyTrace { id: self.id.clone() });
        }
        if self.errors.is_empty() {
            return Err(Error::NoErrorKinds { id: self.id.clone() });
        }
        Ok(())
    }
}

/// Parses a trace specification from `json`.
///
/// # Errors
///
/// Returns [`Err`] if the text is not a valid specification, or if some trace
/// in it fails [`TraceSpec::validate`].
pub fn parse(json: &str) -> Result<Vec<TraceSpec>> {
    let traces: Vec<TraceSpec> = serde_json::from_str(json)?;
    for trace in &traces {
        trace.validate()?;
    }
    Ok(traces)
}

#[cfg(test)]
mod test {
    use crate::{
        error::target::Error,
        target::{spec, spec::LocationSpec, ReachWithError},
    };

    fn location(file: &str) -> LocationSpec {
        LocationSpec {
            file:         file.into(),
            start_line:   1,
            end_line:     1,
            start_column: None,
            end_column:   None,
        }
    }

    #[test]
    fn matches_files_by_path_suffix() {
        assert!(location("src/main.c").is_inside_file("/home/user/project/src/main.c"));
        assert!(location("/home/user/project/src/main.c").is_inside_file("main.c"));
        assert!(location("main.c").is_inside_file("main.c"));
        assert!(!location("main.c").is_inside_file("domain.c"));
        assert!(!location("a.c").is_inside_file("b/aa.c"));
        assert!(!location("x.c").is_inside_file("y.c"));
    }

    #[test]
    fn can_parse_traces() -> anyhow::Result<()> {
        let traces = spec::parse(
            r#"[{
                "id": "t1",
                "locations": [
                    { "file": "main.c", "start_line": 3, "end_line": 3 },
                    { "file": "main.c", "start_line": 7, "end_line": 7, "start_column": 2, "end_column": 9 }
                ],
                "errors": ["NullPointerException", "DoubleFree"]
            }]"#,
        )?;
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].errors, vec![
            ReachWithError::MustBeNullPointerException,
            ReachWithError::DoubleFree
        ]);
        assert_eq!(traces[0].locations[1].start_column, Some(2));

        let empty = spec::parse(r#"[{ "id": "t2", "locations": [], "errors": ["DoubleFree"] }]"#);
        assert_eq!(empty, Err(Error::EmptyTrace { id: "t2".into() }));
        assert!(matches!(spec::parse("{"), Err(Error::Malformed { .. })));

        Ok(())
    }
}
