//! Duet Sync - merges a downloaded snapshot into the local study database.
//!
//! The cloud transport is out of scope: this crate starts from two SQLite
//! files on disk, the local database and a freshly downloaded copy of the
//! canonical one, and uses the duet-engine reconciliation to fold the
//! snapshot into the local file.

pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod prompt;

pub use commands::{merge, status, MergeOptions, MergeOutcome, StatusReport};
pub use config::{Config, ConfigError, ConflictMode};
pub use error::{AppError, Result};
pub use prompt::TerminalArbiter;
