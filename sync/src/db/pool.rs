//! Opening database files as connections.

use crate::error::{AppError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::ConnectOptions;
use std::path::Path;

async fn options(path: &Path) -> Result<SqliteConnectOptions> {
    if !tokio::fs::try_exists(path).await? {
        return Err(AppError::MissingDatabase(path.to_path_buf()));
    }

    Ok(SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(false))
}

/// Open the local database for reading and writing.
pub async fn open_writable(path: &Path) -> Result<SqliteConnection> {
    let conn = options(path).await?.connect().await?;
    tracing::debug!(path = %path.display(), "opened database");
    Ok(conn)
}

/// Open a database that must not be written, such as a downloaded snapshot.
pub async fn open_read_only(path: &Path) -> Result<SqliteConnection> {
    let conn = options(path).await?.read_only(true).connect().await?;
    tracing::debug!(path = %path.display(), "opened database read-only");
    Ok(conn)
}
