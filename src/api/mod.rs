//! Purpose: Define the public Rust API boundary for `extlinks`.
//! Exports: Extraction entry points, schema selection, decompression, cancellation, errors.
//! Role: Stable surface for the CLI and library users; hides the scanning internals.
//! Invariants: This module is the only public path to the core types.
//! Invariants: Additions are additive-only.

mod remote;

pub use crate::core::cancel::CancelToken;
pub use crate::core::decompress::{ByteStream, Compression, Decompressor};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::extract::{ExtractOptions, Extraction, Extractor, Link};
pub use crate::core::scan::{ExtractedLink, extract_link};
pub use crate::core::schema::{LineCursor, LineValues, Schema};
pub use remote::RemoteStreamer;
