//! Configuration management for the sync tool.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// How conflicts without an automatic policy are settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ConflictMode {
    /// Prompt on the terminal for each conflict
    #[default]
    Ask,
    /// Keep the local version without asking
    Local,
    /// Take the remote version without asking
    Remote,
}

impl FromStr for ConflictMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ask" => Ok(ConflictMode::Ask),
            "local" => Ok(ConflictMode::Local),
            "remote" => Ok(ConflictMode::Remote),
            _ => Err(ConfigError::InvalidConflictMode(s.to_string())),
        }
    }
}

impl fmt::Display for ConflictMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictMode::Ask => "ask",
            ConflictMode::Local => "local",
            ConflictMode::Remote => "remote",
        };
        f.write_str(name)
    }
}

/// Defaults loaded from environment variables, overridden by CLI flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Local study database
    pub local_db: PathBuf,
    /// Downloaded snapshot to merge from
    pub remote_db: Option<PathBuf>,
    /// Conflict handling when no flag is given
    pub conflict_mode: ConflictMode,
    /// Copy the local database aside before merging
    pub backup: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local_db: PathBuf::from("flashcards.db"),
            remote_db: None,
            conflict_mode: ConflictMode::Ask,
            backup: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let local_db = lookup("DUET_LOCAL_DB")
            .map(PathBuf::from)
            .unwrap_or(defaults.local_db);

        let remote_db = lookup("DUET_REMOTE_DB")
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);

        let conflict_mode = match lookup("DUET_CONFLICT_MODE") {
            Some(mode) => mode.parse()?,
            None => defaults.conflict_mode,
        };

        let backup = match lookup("DUET_BACKUP") {
            Some(flag) => parse_flag(&flag).ok_or(ConfigError::InvalidBackupFlag(flag))?,
            None => defaults.backup,
        };

        Ok(Self {
            local_db,
            remote_db,
            conflict_mode,
            backup,
        })
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("DUET_CONFLICT_MODE must be ask, local or remote, got '{0}'")]
    InvalidConflictMode(String),

    #[error("DUET_BACKUP must be true or false, got '{0}'")]
    InvalidBackupFlag(String),

    #[error("no remote database given (use --remote or DUET_REMOTE_DB)")]
    MissingRemoteDb,
}
