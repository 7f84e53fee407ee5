//! Error types for the Duet engine.

use crate::{StableId, TableName};
use thiserror::Error;

/// All possible errors from the Duet engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Schema errors
    #[error("table is not syncable: {0}")]
    UnknownTable(TableName),

    // Row errors
    #[error("row in '{table}' has no stable identifier")]
    MissingStableId { table: TableName },

    #[error("row not found in '{table}': {stable_id}")]
    RowNotFound {
        table: TableName,
        stable_id: StableId,
    },

    // Pass errors
    #[error("sync cancelled by user while merging '{table}'")]
    Cancelled { table: TableName },

    // Backend errors
    #[error("replica error: {0}")]
    Replica(String),
}

impl Error {
    /// Wrap a backend failure reported by a replica handle.
    pub fn replica(err: impl std::fmt::Display) -> Self {
        Error::Replica(err.to_string())
    }

    /// Whether this error is a deliberate user abort rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
