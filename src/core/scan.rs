//! Purpose: Escape-aware scanning primitives for tuples in MySQL `INSERT` statements.
//! Exports: `ExtractedLink`, `extract_link`, `RowCursor`.
//! Role: Shared by every schema strategy; carries no knowledge of column layouts.
//! Invariants: Positions are byte offsets into one line; no character decoding happens here.
//! Invariants: A single quote terminates a value unless the byte before it is a backslash.
//! Invariants: Failures are `Malformed` errors carrying the byte column; nothing resynchronizes.
use bstr::ByteSlice;

use crate::core::error::{Error, ErrorKind};

const QUOTE: u8 = b'\'';
const BACKSLASH: u8 = b'\\';
const ESCAPED_QUOTE: &[u8] = b"\\'";

/// One quoted value as it appears in the dump, between its quotes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExtractedLink<'a> {
    raw: &'a [u8],
}

impl<'a> ExtractedLink<'a> {
    /// Source bytes including any `\'` sequences. Its length is what the scan consumed.
    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    /// Number of `\'` sequences inside the value.
    pub fn escapes(&self) -> usize {
        // Every quote inside a raw value was preceded by a backslash.
        self.raw.iter().filter(|byte| **byte == QUOTE).count()
    }

    /// The value with each `\'` collapsed to `'`. Other escapes pass through untouched.
    pub fn decode(&self) -> String {
        if self.escapes() == 0 {
            return self.raw.to_str_lossy().into_owned();
        }
        self.raw
            .replace(ESCAPED_QUOTE, [QUOTE])
            .to_str_lossy()
            .into_owned()
    }
}

/// Scans `text`, which starts just past an opening quote, for the terminating quote.
///
/// Returns `None` when the text ends before an unescaped quote is found.
pub fn extract_link(text: &[u8]) -> Option<ExtractedLink<'_>> {
    let mut from = 0;
    loop {
        let quote = from + text[from..].find_byte(QUOTE)?;
        if quote > 0 && text[quote - 1] == BACKSLASH {
            // e.g. 'http://www.example.com/bleedin\''
            from = quote + 1;
            continue;
        }
        return Some(ExtractedLink {
            raw: &text[..quote],
        });
    }
}

/// Forward-only position within one line, with the column-level moves a tuple walker needs.
#[derive(Debug)]
pub struct RowCursor<'a> {
    line: &'a [u8],
    pos: usize,
}

impl<'a> RowCursor<'a> {
    pub fn new(line: &'a [u8], pos: usize) -> Self {
        Self { line, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn peek(&self) -> Option<u8> {
        self.line.get(self.pos).copied()
    }

    pub fn expect(&mut self, byte: u8) -> Result<(), Error> {
        match self.peek() {
            Some(found) if found == byte => {
                self.pos += 1;
                Ok(())
            }
            Some(found) => Err(self.malformed(format!(
                "expected '{}' but found '{}'",
                byte as char,
                found.escape_ascii()
            ))),
            None => Err(self.malformed(format!(
                "expected '{}' but the line ended",
                byte as char
            ))),
        }
    }

    pub fn skip_spaces(&mut self) {
        while self.peek().is_some_and(|byte| byte.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    /// Consumes a quoted value including both quotes.
    pub fn quoted(&mut self) -> Result<ExtractedLink<'a>, Error> {
        if self.peek() != Some(QUOTE) {
            return Err(self.malformed("expected a quoted value"));
        }
        let start = self.pos + 1;
        let link = extract_link(&self.line[start..]).ok_or_else(|| {
            Error::new(ErrorKind::Malformed)
                .with_message("unterminated quoted value")
                .with_column(start)
        })?;
        self.pos = start + link.raw().len() + 1;
        Ok(link)
    }

    /// Consumes one column of any kind, leaving the cursor on the delimiter that follows it.
    pub fn skip_column(&mut self) -> Result<(), Error> {
        if self.peek() == Some(QUOTE) {
            return self.quoted().map(|_| ());
        }
        // Bare columns (numbers, NULL) cannot contain delimiters.
        match self.line[self.pos..].find_byteset(b",)") {
            Some(len) => {
                self.pos += len;
                Ok(())
            }
            None => Err(self.malformed("missing column delimiter")),
        }
    }

    /// After a tuple's `)`: `Ok(true)` if another tuple follows, `Ok(false)` at the `;`.
    pub fn next_tuple(&mut self) -> Result<bool, Error> {
        self.skip_spaces();
        match self.peek() {
            Some(b',') => {
                self.pos += 1;
                self.skip_spaces();
                Ok(true)
            }
            Some(b';') => {
                self.pos += 1;
                Ok(false)
            }
            Some(_) => Err(self.malformed("expected ',' or ';' after tuple")),
            None => Err(self.malformed("statement ended without ';'")),
        }
    }

    fn malformed(&self, message: impl Into<String>) -> Error {
        Error::new(ErrorKind::Malformed)
            .with_message(message)
            .with_column(self.pos)
    }
}
