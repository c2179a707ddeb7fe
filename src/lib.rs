//! Purpose: Library crate behind the `extlinks` CLI.
//! Exports: `api` (extraction, remote streaming, errors) and `notice` (stderr diagnostics).
//! Role: Reads MediaWiki `externallinks` SQL dumps as a lazy stream of URLs, no database needed.
//! Invariants: Core modules stay private; `api` is the public path.
//! Invariants: Parsing is synchronous and pull-driven; no background threads.
pub mod api;
mod core;
pub mod notice;
