//! Sync bookkeeping stored alongside the data in the local database.

use sqlx::SqliteConnection;

/// Key under which the last successful sync time is kept.
pub const LAST_SYNC_KEY: &str = "last_sync";

/// Create the metadata table if needed.
pub async fn init(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(conn)
    .await?;

    Ok(())
}

/// Time of the last successful sync, if one was ever recorded.
///
/// Does not create the metadata table, so it is safe on a read-only handle.
pub async fn last_sync(conn: &mut SqliteConnection) -> Result<Option<String>, sqlx::Error> {
    let (exists,): (bool,) = sqlx::query_as(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'sync_metadata')",
    )
    .fetch_one(&mut *conn)
    .await?;
    if !exists {
        return Ok(None);
    }

    let value: Option<(String,)> = sqlx::query_as("SELECT value FROM sync_metadata WHERE key = ?")
        .bind(LAST_SYNC_KEY)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(value.map(|(v,)| v).filter(|v| !v.is_empty()))
}

/// Store `at` as the time of the last successful sync.
pub async fn record_sync(conn: &mut SqliteConnection, at: &str) -> Result<(), sqlx::Error> {
    init(&mut *conn).await?;

    sqlx::query(
        r#"
        INSERT INTO sync_metadata (key, value) VALUES (?, ?)
        ON CONFLICT (key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(LAST_SYNC_KEY)
    .bind(at)
    .execute(&mut *conn)
    .await?;

    tracing::debug!(last_sync = at, "sync time recorded");
    Ok(())
}
