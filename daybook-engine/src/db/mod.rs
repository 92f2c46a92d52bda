//! Database operations for daybook-engine
//!
//! Free async functions over `&SqlitePool`. Operations that must change
//! several rows atomically open their own transaction.

pub mod atoms;
pub mod classify_runs;
pub mod jobs;
pub mod outputs;
pub mod prompts;
pub mod runs;
pub mod spend;

use chrono::{DateTime, SecondsFormat, Utc};
use daybook_common::{Error, Result};
use std::str::FromStr;

/// Fixed-width RFC 3339 (microseconds, `Z`) so stored timestamps compare
/// correctly as text
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn now_ts() -> String {
    format_ts(Utc::now())
}

pub(crate) fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse timestamp '{}': {}", value, e)))
}

pub(crate) fn parse_opt_ts(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_ts).transpose()
}

/// Parse a stored enum column
pub(crate) fn parse_column<T: FromStr<Err = String>>(value: &str) -> Result<T> {
    value.parse::<T>().map_err(Error::Internal)
}

/// `?, ?, ?` for an IN clause
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
