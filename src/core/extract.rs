//! Purpose: Flatten a dump stream into one ordered, index-tagged sequence of link values.
//! Exports: `Link`, `ExtractOptions`, `Extractor`, `Extraction`.
//! Role: Offset-aware driver over the line source, the decompressor, and a schema cursor.
//! Invariants: Emitted indexes are exactly `offset..total` with no gaps or repeats.
//! Invariants: Values before the offset are scanned for position only and never decoded.
//! Invariants: The stream and reader are dropped as soon as the sequence ends, fails, or is cancelled.
//! Invariants: Lines without the schema prefix are skipped; malformed row lines are fatal.
#![allow(clippy::result_large_err)]

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::core::cancel::CancelToken;
use crate::core::decompress::{ByteStream, Compression, Decompressor};
use crate::core::error::{Error, map_io_error_kind};
use crate::core::lines::LineSource;
use crate::core::schema::{LineCursor, Schema};

// Row-insert lines in production dumps run to roughly a megabyte.
const READ_BUFFER_BYTES: usize = 256 * 1024;

/// One extracted value and its 0-based position across the whole dump.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Link {
    pub index: u64,
    /// Exactly as stored in the dump: may be relative, protocol-relative, or malformed.
    pub url: String,
}

#[derive(Clone, Debug, Default)]
pub struct ExtractOptions {
    offset: u64,
    cancel: CancelToken,
}

impl ExtractOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// First global index to emit. Negative values are treated as zero.
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = u64::try_from(offset).unwrap_or(0);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn cancel(&self) -> &CancelToken {
        &self.cancel
    }
}

#[derive(Clone)]
pub struct Extractor {
    schema: Schema,
    decompressor: Arc<dyn Decompressor>,
}

impl Extractor {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            decompressor: Arc::new(Compression::Gzip),
        }
    }

    pub fn with_compression(self, compression: Compression) -> Self {
        self.with_decompressor(compression)
    }

    pub fn with_decompressor(mut self, decompressor: impl Decompressor + 'static) -> Self {
        self.decompressor = Arc::new(decompressor);
        self
    }

    pub fn schema(&self) -> Schema {
        self.schema
    }

    /// Extracts from a local dump file.
    pub fn extract_path(
        &self,
        path: impl AsRef<Path>,
        options: ExtractOptions,
    ) -> Result<Extraction, Error> {
        let path = path.as_ref();
        options.cancel().check()?;
        let file = File::open(path).map_err(|err| {
            Error::new(map_io_error_kind(&err))
                .with_message("failed to open dump file")
                .with_path(path)
                .with_source(err)
        })?;
        tracing::debug!(path = %path.display(), offset = options.offset(), "opened dump file");
        self.extract(file, options)
    }

    /// Extracts from any byte stream; the stream is owned by the returned sequence.
    pub fn extract<R>(&self, reader: R, options: ExtractOptions) -> Result<Extraction, Error>
    where
        R: Read + Send + 'static,
    {
        options.cancel().check()?;
        let stream: ByteStream = Box::new(reader);
        let decompressed = match self.decompressor.wrap(stream) {
            Ok(decompressed) => decompressed,
            Err(_) if options.cancel().is_cancelled() => return Err(Error::cancelled()),
            Err(err) => return Err(err),
        };
        let lines = LineSource::new(BufReader::with_capacity(READ_BUFFER_BYTES, decompressed));
        Ok(Extraction {
            lines: Some(lines),
            schema: self.schema,
            buf: Vec::new(),
            cursor: None,
            offset: options.offset,
            next_index: 0,
            cancel: options.cancel,
        })
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(Schema::default())
    }
}

impl fmt::Debug for Extractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extractor")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// Lazy, single-pass sequence of links. Fused: after `None` or an error it yields nothing.
pub struct Extraction {
    lines: Option<LineSource<BufReader<ByteStream>>>,
    schema: Schema,
    buf: Vec<u8>,
    // Present while a row-insert line in `buf` still has values to walk.
    cursor: Option<LineCursor>,
    offset: u64,
    next_index: u64,
    cancel: CancelToken,
}

impl Extraction {
    /// Index the next emitted value would carry; pass it as the offset to resume later.
    pub fn next_index(&self) -> u64 {
        self.next_index.max(self.offset)
    }

    /// 1-based number of the last line read from the dump.
    pub fn line_number(&self) -> u64 {
        self.lines.as_ref().map_or(0, LineSource::line_number)
    }

    pub fn is_finished(&self) -> bool {
        self.lines.is_none()
    }

    fn advance(&mut self) -> Result<Option<Link>, Error> {
        loop {
            let Some(lines) = self.lines.as_mut() else {
                return Ok(None);
            };
            if self.cancel.is_cancelled() {
                return Err(Error::cancelled().with_index(self.next_index.max(self.offset)));
            }

            if self.cursor.is_none() {
                let more = match lines.read_line(&mut self.buf) {
                    Ok(more) => more,
                    // Cancellable readers fail a pending read once the token is raised.
                    Err(_) if self.cancel.is_cancelled() => {
                        return Err(Error::cancelled().with_index(self.next_index.max(self.offset)));
                    }
                    Err(err) => return Err(err),
                };
                if !more {
                    if self.next_index < self.offset {
                        tracing::debug!(
                            offset = self.offset,
                            total = self.next_index,
                            "stream ended before the requested offset"
                        );
                    }
                    return Ok(None);
                }
                if self.schema.matches(&self.buf) {
                    self.cursor = Some(self.schema.cursor());
                } else {
                    tracing::trace!(line = lines.line_number(), "skipping non row-insert line");
                }
                continue;
            }

            let Some(cursor) = self.cursor.as_mut() else {
                continue;
            };
            let index = self.next_index;
            let link = match cursor.advance(&self.buf) {
                Ok(Some(link)) => link,
                Ok(None) => {
                    self.cursor = None;
                    continue;
                }
                Err(err) => {
                    return Err(err.with_line(lines.line_number()).with_index(index));
                }
            };
            self.next_index += 1;
            if index < self.offset {
                continue;
            }
            if index == self.offset && index > 0 {
                tracing::info!(
                    offset = index,
                    line = lines.line_number(),
                    "reached start offset"
                );
            }
            return Ok(Some(Link {
                index,
                url: link.decode(),
            }));
        }
    }

    fn release(&mut self) {
        self.lines = None;
        self.cursor = None;
        self.buf = Vec::new();
    }
}

impl Iterator for Extraction {
    type Item = Result<Link, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(Some(link)) => Some(Ok(link)),
            Ok(None) => {
                self.release();
                None
            }
            Err(err) => {
                self.release();
                Some(Err(err))
            }
        }
    }
}

impl std::iter::FusedIterator for Extraction {}

impl fmt::Debug for Extraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extraction")
            .field("schema", &self.schema)
            .field("offset", &self.offset)
            .field("next_index", &self.next_index)
            .field("line", &self.line_number())
            .field("finished", &self.is_finished())
            .finish()
    }
}
