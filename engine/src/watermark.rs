//! Watermark comparison for deciding which rows changed since the last sync.
//!
//! Timestamps are ISO-8601 strings compared lexically. That order matches
//! chronological order as long as both sides use the same format, which is
//! what every replica of the dataset writes.

use crate::row::Row;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Watermark used when no successful sync has been recorded.
pub const EPOCH: &str = "1970-01-01T00:00:00";

/// The last instant both replicas are known to have agreed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Watermark(String);

impl Watermark {
    pub fn new(timestamp: impl Into<String>) -> Self {
        Self(timestamp.into())
    }

    pub fn epoch() -> Self {
        Self(EPOCH.to_string())
    }

    /// Build from an optional stored value; missing or empty means epoch.
    pub fn or_epoch(timestamp: Option<String>) -> Self {
        match timestamp {
            Some(ts) if !ts.is_empty() => Self(ts),
            _ => Self::epoch(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a modification marker is strictly after this watermark.
    /// An absent or empty marker is never dirty.
    pub fn is_after(&self, marker: Option<&str>) -> bool {
        match marker {
            Some(ts) if !ts.is_empty() => ts > self.0.as_str(),
            _ => false,
        }
    }

    /// Whether the row was modified after this watermark.
    pub fn is_dirty(&self, row: &Row) -> bool {
        self.is_after(row.last_modified())
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::epoch()
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Watermark {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Watermark {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Current local wall-clock time in the dataset's timestamp format.
///
/// Rows carry naive local timestamps; comparing them against a UTC value
/// would shift every marker by the zone offset.
pub fn now_iso() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}
