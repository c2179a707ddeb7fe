// Core modules: escape-aware scanning, schema strategies, and the offset-aware driver.
pub mod cancel;
pub mod decompress;
pub mod error;
pub mod extract;
pub mod lines;
pub mod scan;
pub mod schema;
pub mod v129;
