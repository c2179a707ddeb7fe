// Forward-only line reader over decompressed dump bytes.
use std::io::BufRead;

use crate::core::error::{Error, ErrorKind};

#[derive(Debug)]
pub struct LineSource<R> {
    reader: R,
    line_number: u64,
}

impl<R: BufRead> LineSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_number: 0,
        }
    }

    /// 1-based number of the line most recently read; 0 before the first read.
    pub fn line_number(&self) -> u64 {
        self.line_number
    }

    /// Reads the next line into `buf` without its `\n` or `\r\n`.
    ///
    /// Returns `Ok(false)` at end of stream; an empty line returns `Ok(true)`
    /// with `buf` empty.
    pub fn read_line(&mut self, buf: &mut Vec<u8>) -> Result<bool, Error> {
        buf.clear();
        let read = self.reader.read_until(b'\n', buf).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read dump stream")
                .with_line(self.line_number + 1)
                .with_source(err)
        })?;
        if read == 0 {
            return Ok(false);
        }
        self.line_number += 1;
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        Ok(true)
    }
}
