//! SQLite-backed replica handle.
//!
//! Rows are decoded column by column from each value's storage class, so any
//! table can be read without a compile-time schema. Identifiers are quoted;
//! values are always bound.

use async_trait::async_trait;
use duet_engine::{Error, Filter, Query, ReadReplica, Row, Value, WriteReplica, LOCAL_KEY, STABLE_ID};
use sqlx::query::Query as SqlQuery;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnection, SqliteRow};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};
use std::collections::HashSet;

type Statement<'q> = SqlQuery<'q, Sqlite, SqliteArguments<'q>>;

/// Quote an identifier for interpolation into SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn bind_value<'q>(statement: Statement<'q>, value: &Value) -> Statement<'q> {
    match value {
        Value::Null => statement.bind(None::<String>),
        Value::Integer(i) => statement.bind(*i),
        Value::Real(r) => statement.bind(*r),
        Value::Text(s) => statement.bind(s.clone()),
        Value::Blob(b) => statement.bind(b.clone()),
    }
}

/// Decode a result row into an engine row, keeping every column.
pub fn decode_row(row: &SqliteRow) -> Result<Row, sqlx::Error> {
    let mut decoded = Row::new();

    for (index, column) in row.columns().iter().enumerate() {
        let storage_class = {
            let raw = row.try_get_raw(index)?;
            if raw.is_null() {
                None
            } else {
                Some(raw.type_info().name().to_string())
            }
        };

        let value = match storage_class.as_deref() {
            None => Value::Null,
            Some("INTEGER") | Some("BOOLEAN") => Value::Integer(row.try_get_unchecked(index)?),
            Some("REAL") => Value::Real(row.try_get_unchecked(index)?),
            Some("BLOB") => Value::Blob(row.try_get_unchecked(index)?),
            Some(_) => Value::Text(row.try_get_unchecked(index)?),
        };
        decoded.set(column.name(), value);
    }

    Ok(decoded)
}

/// Build the SELECT for a query against a table with the given columns.
///
/// Returns `None` when no row can match. A table without a tombstone column
/// (an older schema) has only live rows, and one without a stable identifier
/// has no row to look up. Filters never name a missing column, since SQLite
/// reads an unknown double-quoted identifier as a string literal.
fn select_sql(query: &Query, columns: &HashSet<String>) -> Option<(String, Option<String>)> {
    let mut sql = format!("SELECT * FROM {}", quote_ident(&query.table));
    let mut param = None;

    if let Some(filter) = &query.filter {
        let present = columns.contains(filter.column());
        let column = quote_ident(filter.column());
        match filter {
            Filter::Live if !present => {}
            Filter::Tombstoned | Filter::StableId(_) if !present => return None,
            Filter::Live => sql.push_str(&format!(" WHERE {} IS NULL", column)),
            Filter::Tombstoned => sql.push_str(&format!(" WHERE {} IS NOT NULL", column)),
            Filter::StableId(id) => {
                sql.push_str(&format!(" WHERE {} = ?", column));
                param = Some(id.clone());
            }
        }
    }

    if let Some(column) = query.order_by.as_ref().filter(|c| columns.contains(c.as_str())) {
        sql.push_str(&format!(" ORDER BY {}", quote_ident(column)));
    }

    Some((sql, param))
}

/// A replica handle over one SQLite connection.
pub struct SqliteReplica {
    conn: SqliteConnection,
}

impl SqliteReplica {
    pub fn new(conn: SqliteConnection) -> Self {
        Self { conn }
    }

    /// Borrow the underlying connection, e.g. for sync bookkeeping.
    pub fn connection_mut(&mut self) -> &mut SqliteConnection {
        &mut self.conn
    }

    pub fn into_inner(self) -> SqliteConnection {
        self.conn
    }

    /// Column names of a table; empty when the table does not exist.
    async fn columns(&mut self, table: &str) -> Result<HashSet<String>, Error> {
        let names: Vec<(String,)> = sqlx::query_as("SELECT name FROM pragma_table_info(?)")
            .bind(table)
            .fetch_all(&mut self.conn)
            .await
            .map_err(Error::replica)?;

        Ok(names.into_iter().map(|(name,)| name).collect())
    }

    async fn execute(&mut self, sql: &str) -> Result<(), Error> {
        sqlx::query(sql)
            .execute(&mut self.conn)
            .await
            .map_err(Error::replica)?;
        Ok(())
    }
}

#[async_trait]
impl ReadReplica for SqliteReplica {
    async fn table_exists(&mut self, table: &str) -> duet_engine::Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
        )
        .bind(table)
        .fetch_one(&mut self.conn)
        .await
        .map_err(Error::replica)?;

        Ok(exists)
    }

    async fn query(&mut self, query: &Query) -> duet_engine::Result<Vec<Row>> {
        let columns = self.columns(&query.table).await?;
        let Some((sql, param)) = select_sql(query, &columns) else {
            return Ok(Vec::new());
        };
        let mut statement = sqlx::query(&sql);
        if let Some(param) = param {
            statement = statement.bind(param);
        }

        let rows = statement
            .fetch_all(&mut self.conn)
            .await
            .map_err(Error::replica)?;

        rows.iter()
            .map(|row| decode_row(row).map_err(Error::replica))
            .collect()
    }
}

#[async_trait]
impl WriteReplica for SqliteReplica {
    async fn insert(&mut self, table: &str, row: &Row) -> duet_engine::Result<()> {
        let row = row.without_local_key();
        let sql = if row.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", quote_ident(table))
        } else {
            let columns: Vec<String> = row.iter().map(|(name, _)| quote_ident(name)).collect();
            let placeholders = vec!["?"; columns.len()].join(", ");
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(table),
                columns.join(", "),
                placeholders
            )
        };

        let mut statement = sqlx::query(&sql);
        for (_, value) in row.iter() {
            statement = bind_value(statement, value);
        }

        statement
            .execute(&mut self.conn)
            .await
            .map_err(Error::replica)?;
        Ok(())
    }

    async fn update(&mut self, table: &str, stable_id: &str, columns: &Row) -> duet_engine::Result<u64> {
        let assignments: Vec<(&String, &Value)> = columns
            .iter()
            .filter(|(name, _)| name.as_str() != LOCAL_KEY && name.as_str() != STABLE_ID)
            .collect();
        if assignments.is_empty() {
            return Ok(0);
        }

        let set_clause = assignments
            .iter()
            .map(|(name, _)| format!("{} = ?", quote_ident(name)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            quote_ident(table),
            set_clause,
            quote_ident(STABLE_ID)
        );

        let mut statement = sqlx::query(&sql);
        for (_, value) in &assignments {
            statement = bind_value(statement, value);
        }
        let result = statement
            .bind(stable_id.to_string())
            .execute(&mut self.conn)
            .await
            .map_err(Error::replica)?;

        Ok(result.rows_affected())
    }

    async fn begin(&mut self) -> duet_engine::Result<()> {
        self.execute("BEGIN IMMEDIATE").await
    }

    async fn commit(&mut self) -> duet_engine::Result<()> {
        self.execute("COMMIT").await
    }

    async fn rollback(&mut self) -> duet_engine::Result<()> {
        self.execute("ROLLBACK").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_engine::{read_table, DELETED_AT, LAST_MODIFIED};
    use sqlx::Connection;

    async fn memory_db() -> SqliteReplica {
        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        sqlx::query(
            r#"
            CREATE TABLE decks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT UNIQUE,
                name TEXT NOT NULL,
                score REAL,
                icon BLOB,
                last_modified TEXT,
                deleted_at TEXT
            )
            "#,
        )
        .execute(&mut conn)
        .await
        .unwrap();
        SqliteReplica::new(conn)
    }

    fn deck(uuid: &str, name: &str) -> Row {
        Row::new()
            .with(LOCAL_KEY, 77)
            .with(STABLE_ID, uuid)
            .with("name", name)
            .with("score", 0.75)
            .with("icon", vec![1u8, 2, 3])
            .with(LAST_MODIFIED, "2024-01-01T00:00:00")
            .with(DELETED_AT, Value::Null)
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("decks"), "\"decks\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    fn columns(names: &[&str]) -> HashSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn select_with_filters() {
        let all = columns(&["id", "uuid", "name", "deleted_at"]);
        let (sql, param) = select_sql(&Query::table("decks").live().order_by("uuid"), &all).unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM \"decks\" WHERE \"deleted_at\" IS NULL ORDER BY \"uuid\""
        );
        assert_eq!(param, None);

        let (sql, param) = select_sql(&Query::table("decks").stable_id("a"), &all).unwrap();
        assert_eq!(sql, "SELECT * FROM \"decks\" WHERE \"uuid\" = ?");
        assert_eq!(param.as_deref(), Some("a"));
    }

    #[test]
    fn select_never_names_a_missing_column() {
        let legacy = columns(&["id", "name"]);
        let (sql, _) = select_sql(&Query::table("decks").live().order_by("uuid"), &legacy).unwrap();
        assert_eq!(sql, "SELECT * FROM \"decks\"");
        assert!(select_sql(&Query::table("decks").tombstoned(), &legacy).is_none());
        assert!(select_sql(&Query::table("decks").stable_id("a"), &legacy).is_none());
    }

    #[tokio::test]
    async fn round_trips_every_storage_class() {
        let mut replica = memory_db().await;
        replica.insert("decks", &deck("a", "Spanish")).await.unwrap();

        let rows = replica
            .query(&Query::table("decks").stable_id("a"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.get(LOCAL_KEY), Some(&Value::from(1)));
        assert_eq!(row.get("name"), Some(&Value::from("Spanish")));
        assert_eq!(row.get("score"), Some(&Value::from(0.75)));
        assert_eq!(row.get("icon"), Some(&Value::Blob(vec![1, 2, 3])));
        assert_eq!(row.get(DELETED_AT), Some(&Value::Null));
    }

    #[tokio::test]
    async fn update_by_stable_id_reports_rows() {
        let mut replica = memory_db().await;
        replica.insert("decks", &deck("a", "Spanish")).await.unwrap();

        let changed = replica
            .update("decks", "a", &Row::new().with("name", "Español"))
            .await
            .unwrap();
        assert_eq!(changed, 1);

        let changed = replica
            .update("decks", "missing", &Row::new().with("name", "x"))
            .await
            .unwrap();
        assert_eq!(changed, 0);
    }

    #[tokio::test]
    async fn rollback_discards_writes() {
        let mut replica = memory_db().await;
        replica.begin().await.unwrap();
        replica.insert("decks", &deck("a", "Spanish")).await.unwrap();
        replica.rollback().await.unwrap();

        let snapshot = read_table(&mut replica, "decks").await.unwrap();
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn reader_splits_live_and_tombstoned() {
        let mut replica = memory_db().await;
        replica.insert("decks", &deck("a", "Live")).await.unwrap();
        replica
            .insert("decks", &deck("b", "Gone").with(DELETED_AT, "2024-02-01T00:00:00"))
            .await
            .unwrap();

        assert!(replica.table_exists("decks").await.unwrap());
        assert!(!replica.table_exists("collections").await.unwrap());

        let snapshot = read_table(&mut replica, "decks").await.unwrap();
        assert_eq!(snapshot.live.keys().collect::<Vec<_>>(), vec!["a"]);
        assert!(snapshot.tombstoned.contains("b"));
    }

    #[tokio::test]
    async fn table_without_tombstone_column_reads_all_live() {
        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        sqlx::raw_sql(
            "CREATE TABLE decks (id INTEGER PRIMARY KEY, uuid TEXT, name TEXT, last_modified TEXT);
             INSERT INTO decks (uuid, name) VALUES ('a', 'Verbs'), ('b', 'Food');",
        )
        .execute(&mut conn)
        .await
        .unwrap();
        let mut replica = SqliteReplica::new(conn);

        let snapshot = read_table(&mut replica, "decks").await.unwrap();
        assert_eq!(snapshot.live.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(snapshot.tombstoned.is_empty());
    }
}
