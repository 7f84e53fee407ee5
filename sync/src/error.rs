//! Unified error handling for the sync tool.

use crate::config::ConfigError;
use std::path::PathBuf;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] duet_engine::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database file not found: {}", .0.display())]
    MissingDatabase(PathBuf),

    #[error("Invalid timestamp '{0}', expected YYYY-MM-DDTHH:MM:SS")]
    InvalidTimestamp(String),
}

impl AppError {
    /// Whether the user aborted the pass at a conflict prompt.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, AppError::Engine(err) if err.is_cancellation())
    }
}

/// Result type alias for commands.
pub type Result<T> = std::result::Result<T, AppError>;
