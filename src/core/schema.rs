//! Purpose: Choose how row-insert lines are parsed for a given `externallinks` schema version.
//! Exports: `Schema`, `LineCursor`, `LineValues`.
//! Role: The single variant point between dump layouts and the version-agnostic driver.
//! Invariants: Adding a schema version adds a variant here and a walker module; the driver is untouched.
//! Invariants: Values come out in left-to-right tuple order, one per tuple.
use std::fmt;
use std::str::FromStr;

use crate::core::error::{Error, ErrorKind};
use crate::core::scan::ExtractedLink;
use crate::core::v129::{self, TupleWalker};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum Schema {
    /// MediaWiki 1.29 and later: `(el_id, el_from, el_to, el_index, el_index_60)`.
    #[default]
    V129,
}

impl Schema {
    pub const ALL: &'static [Schema] = &[Schema::V129];

    pub fn version(self) -> &'static str {
        match self {
            Schema::V129 => "1.29",
        }
    }

    /// The literal text every row-insert line of this schema starts with.
    pub fn prefix(self) -> &'static [u8] {
        match self {
            Schema::V129 => v129::PREFIX,
        }
    }

    pub fn matches(self, line: &[u8]) -> bool {
        line.starts_with(self.prefix())
    }

    /// A paused, owned position for walking one line's values.
    pub fn cursor(self) -> LineCursor {
        let walker = match self {
            Schema::V129 => Walker::V129(TupleWalker::new()),
        };
        LineCursor { walker }
    }

    /// Decoded values of one row-insert line.
    pub fn values(self, line: &[u8]) -> LineValues<'_> {
        LineValues {
            line,
            cursor: self.cursor(),
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.version())
    }
}

impl FromStr for Schema {
    type Err = Error;

    fn from_str(label: &str) -> Result<Self, Self::Err> {
        let trimmed = label.trim();
        let version = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        Schema::ALL
            .iter()
            .copied()
            .find(|schema| schema.version() == version)
            .ok_or_else(|| {
                let known = Schema::ALL
                    .iter()
                    .map(|schema| schema.version())
                    .collect::<Vec<_>>()
                    .join(", ");
                Error::new(ErrorKind::Usage)
                    .with_message(format!("unsupported schema version `{label}`"))
                    .with_hint(format!("Supported versions: {known}."))
            })
    }
}

#[derive(Clone, Debug)]
enum Walker {
    V129(TupleWalker),
}

/// Resumable per-line position. Feed it the same line buffer until it returns `Ok(None)`.
#[derive(Clone, Debug)]
pub struct LineCursor {
    walker: Walker,
}

impl LineCursor {
    /// Next raw value of `line`, without decoding it.
    pub fn advance<'a>(&mut self, line: &'a [u8]) -> Result<Option<ExtractedLink<'a>>, Error> {
        match &mut self.walker {
            Walker::V129(walker) => walker.advance(line),
        }
    }
}

/// Iterator over the decoded values of one line. Ends after the first error.
#[derive(Debug)]
pub struct LineValues<'a> {
    line: &'a [u8],
    cursor: LineCursor,
}

impl Iterator for LineValues<'_> {
    type Item = Result<String, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.cursor.advance(self.line) {
            Ok(Some(link)) => Some(Ok(link.decode())),
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}
