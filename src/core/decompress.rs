//! Purpose: Turn the raw dump byte stream into decompressed SQL text.
//! Exports: `ByteStream`, `Decompressor`, `Compression`.
//! Role: Pluggable provider consumed by the extractor; gzip is the production default.
//! Invariants: Wrapping never reads past the bytes it needs to decide on a format.
//! Invariants: `Compression::None` is an exact pass-through.
use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;

use flate2::read::MultiGzDecoder;

use crate::core::error::{Error, ErrorKind};

pub type ByteStream = Box<dyn Read + Send>;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub trait Decompressor: Send + Sync {
    fn wrap(&self, stream: ByteStream) -> Result<ByteStream, Error>;
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Compression {
    /// gzip framing, including concatenated members.
    #[default]
    Gzip,
    /// Already-decompressed text.
    None,
    /// gzip when the stream starts with the gzip magic, otherwise pass-through.
    Auto,
}

impl Decompressor for Compression {
    fn wrap(&self, stream: ByteStream) -> Result<ByteStream, Error> {
        match self {
            Compression::Gzip => Ok(Box::new(MultiGzDecoder::new(stream))),
            Compression::None => Ok(stream),
            Compression::Auto => sniff(stream),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Compression::Gzip => "gzip",
            Compression::None => "none",
            Compression::Auto => "auto",
        };
        f.write_str(label)
    }
}

impl FromStr for Compression {
    type Err = Error;

    fn from_str(label: &str) -> Result<Self, Self::Err> {
        match label.trim().to_ascii_lowercase().as_str() {
            "gzip" | "gz" => Ok(Compression::Gzip),
            "none" | "identity" => Ok(Compression::None),
            "auto" => Ok(Compression::Auto),
            _ => Err(Error::new(ErrorKind::Usage)
                .with_message(format!("unknown compression `{label}`"))
                .with_hint("Use gzip, none, or auto.")),
        }
    }
}

fn sniff(mut stream: ByteStream) -> Result<ByteStream, Error> {
    let mut head = Vec::with_capacity(GZIP_MAGIC.len());
    (&mut stream)
        .take(GZIP_MAGIC.len() as u64)
        .read_to_end(&mut head)
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read dump header")
                .with_source(err)
        })?;
    let is_gzip = head == GZIP_MAGIC;
    tracing::debug!(is_gzip, "sniffed dump compression");
    let replayed: ByteStream = Box::new(io::Cursor::new(head).chain(stream));
    if is_gzip {
        Ok(Box::new(MultiGzDecoder::new(replayed)))
    } else {
        Ok(replayed)
    }
}

#[cfg(test)]
mod tests {
    use super::{ByteStream, Compression, Decompressor};
    use crate::core::error::ErrorKind;
    use flate2::write::GzEncoder;
    use std::io::{Read, Write};

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).expect("write");
        encoder.finish().expect("finish")
    }

    fn read(compression: Compression, input: Vec<u8>) -> Vec<u8> {
        let stream: ByteStream = Box::new(std::io::Cursor::new(input));
        let mut out = Vec::new();
        compression
            .wrap(stream)
            .expect("wrap")
            .read_to_end(&mut out)
            .expect("read");
        out
    }

    #[test]
    fn gzip_decodes_concatenated_members() {
        let mut input = gzip(b"first\n");
        input.extend(gzip(b"second\n"));
        assert_eq!(read(Compression::Gzip, input), b"first\nsecond\n");
    }

    #[test]
    fn none_passes_through() {
        assert_eq!(read(Compression::None, b"plain".to_vec()), b"plain");
    }

    #[test]
    fn auto_detects_both() {
        assert_eq!(read(Compression::Auto, gzip(b"zipped")), b"zipped");
        assert_eq!(read(Compression::Auto, b"plain text".to_vec()), b"plain text");
        assert_eq!(read(Compression::Auto, b"x".to_vec()), b"x");
        assert!(read(Compression::Auto, Vec::new()).is_empty());
    }

    #[test]
    fn gzip_rejects_plain_text() {
        let stream: ByteStream = Box::new(std::io::Cursor::new(b"not gzip".to_vec()));
        let mut out = Vec::new();
        let result = Compression::Gzip
            .wrap(stream)
            .expect("wrap")
            .read_to_end(&mut out);
        assert!(result.is_err());
    }

    #[test]
    fn parses_labels() {
        assert_eq!("GZIP".parse::<Compression>().expect("gzip"), Compression::Gzip);
        assert_eq!("none".parse::<Compression>().expect("none"), Compression::None);
        let err = "bz2".parse::<Compression>().expect_err("unknown");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
