// Tuple walker for the `externallinks` layout used since MediaWiki 1.29:
// (el_id, el_from, el_to, el_index, el_index_60), extracting el_to.
use crate::core::error::{Error, ErrorKind};
use crate::core::scan::{ExtractedLink, RowCursor};

pub(crate) const PREFIX: &[u8] = b"INSERT INTO `externallinks` VALUES ";

const COLUMNS: usize = 5;
const TARGET: usize = 2;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum WalkState {
    Prefix,
    /// At the `(` of the next tuple.
    Head,
    /// Just past the target column; the tuple's remaining columns are unread.
    Tail,
    Done,
}

/// Paused position within one row-insert line; holds no borrow of the line.
#[derive(Clone, Debug)]
pub(crate) struct TupleWalker {
    pos: usize,
    state: WalkState,
}

impl TupleWalker {
    pub(crate) fn new() -> Self {
        Self {
            pos: 0,
            state: WalkState::Prefix,
        }
    }

    /// Returns the `el_to` value of the next tuple in `line`.
    ///
    /// The value is handed out as soon as its closing quote is found; the rest of
    /// its tuple is checked on the following call. `line` must be the same buffer
    /// on every call. After `Ok(None)` or an error the walker stays finished.
    pub(crate) fn advance<'a>(
        &mut self,
        line: &'a [u8],
    ) -> Result<Option<ExtractedLink<'a>>, Error> {
        let result = self.step(line);
        if result.is_err() {
            self.state = WalkState::Done;
        }
        result
    }

    fn step<'a>(&mut self, line: &'a [u8]) -> Result<Option<ExtractedLink<'a>>, Error> {
        if self.state == WalkState::Prefix {
            if !line.starts_with(PREFIX) {
                return Err(Error::new(ErrorKind::Malformed)
                    .with_message("line does not start with the externallinks row-insert prefix")
                    .with_column(0));
            }
            self.pos = PREFIX.len();
            self.state = WalkState::Head;
        }

        let mut cursor = RowCursor::new(line, self.pos);
        if self.state == WalkState::Tail {
            let more = finish_tuple(&mut cursor)?;
            self.pos = cursor.position();
            self.state = if more {
                WalkState::Head
            } else {
                WalkState::Done
            };
        }
        if self.state == WalkState::Done {
            return Ok(None);
        }

        let link = read_target(&mut cursor)?;
        self.pos = cursor.position();
        self.state = WalkState::Tail;
        Ok(Some(link))
    }
}

fn read_target<'a>(cursor: &mut RowCursor<'a>) -> Result<ExtractedLink<'a>, Error> {
    cursor.expect(b'(')?;
    for _ in 0..TARGET {
        cursor.skip_column()?;
        cursor.expect(b',')?;
    }
    cursor.quoted()
}

fn finish_tuple(cursor: &mut RowCursor<'_>) -> Result<bool, Error> {
    for _ in TARGET + 1..COLUMNS {
        cursor.expect(b',')?;
        cursor.skip_column()?;
    }
    cursor.expect(b')')?;
    cursor.next_tuple()
}
