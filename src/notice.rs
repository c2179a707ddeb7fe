//! Purpose: Structured, non-fatal stderr notices for interrupted or empty extractions.
//! Exports: `Notice`, `NoticeKind`.
//! Role: Shared contract helper for CLI diagnostics.
//! Invariants: Notices are non-fatal and never alter stdout payloads.
//! Invariants: JSON shape is `{"notice":{kind,time,cmd,source,message,details}}`; fields are additive-only.
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "details")]
pub enum NoticeKind {
    /// Cancelled before the dump was exhausted; `resume_offset` is the first index not printed.
    Interrupted { resume_offset: u64 },
    /// The requested offset is at or past the last value in the dump.
    Empty { offset: u64 },
}

impl NoticeKind {
    pub fn label(self) -> &'static str {
        match self {
            NoticeKind::Interrupted { .. } => "interrupted",
            NoticeKind::Empty { .. } => "empty",
        }
    }

    pub fn message(self) -> String {
        match self {
            NoticeKind::Interrupted { resume_offset } => {
                format!("interrupted; resume with --offset {resume_offset}")
            }
            NoticeKind::Empty { offset } => format!("no URLs at or after offset {offset}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notice {
    #[serde(flatten)]
    pub kind: NoticeKind,
    pub time: String,
    pub cmd: String,
    /// Dump path or URI the command was reading.
    pub source: String,
    pub message: String,
}

#[derive(Serialize)]
struct Envelope<'a> {
    notice: &'a Notice,
}

impl Notice {
    /// Builds a notice stamped with the current UTC time.
    pub fn new(kind: NoticeKind, cmd: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            kind,
            time: now_rfc3339().unwrap_or_default(),
            cmd: cmd.into(),
            source: source.into(),
            message: kind.message(),
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(Envelope { notice: self }).unwrap_or(Value::Null)
    }
}

fn now_rfc3339() -> Option<String> {
    let duration = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
    let ts = time::OffsetDateTime::from_unix_timestamp_nanos(duration.as_nanos() as i128).ok()?;
    ts.format(&Rfc3339).ok()
}
