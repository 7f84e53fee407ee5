//! Replica handles and the per-table reader.
//!
//! A replica is any store that can answer row queries by table name. The
//! merge only ever writes to the local replica, so writing is a separate
//! trait that the remote handle never has to implement.

use crate::error::Result;
use crate::row::{Row, DELETED_AT, STABLE_ID};
use crate::{StableId, TableName};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};

/// Row filter understood by every replica handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Rows whose tombstone is NULL
    Live,
    /// Rows whose tombstone is set
    Tombstoned,
    /// The row with this stable identifier, live or not
    StableId(StableId),
}

impl Filter {
    /// Evaluate the filter against a row.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Filter::Live => !row.is_tombstoned(),
            Filter::Tombstoned => row.is_tombstoned(),
            Filter::StableId(id) => row.stable_id() == Some(id.as_str()),
        }
    }

    /// The column the filter tests.
    pub fn column(&self) -> &'static str {
        match self {
            Filter::Live | Filter::Tombstoned => DELETED_AT,
            Filter::StableId(_) => STABLE_ID,
        }
    }
}

/// A row query against one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub table: TableName,
    pub filter: Option<Filter>,
    pub order_by: Option<String>,
}

impl Query {
    /// Every row of the table, in storage order.
    pub fn table(table: impl Into<TableName>) -> Self {
        Self {
            table: table.into(),
            filter: None,
            order_by: None,
        }
    }

    pub fn live(self) -> Self {
        self.filter(Filter::Live)
    }

    pub fn tombstoned(self) -> Self {
        self.filter(Filter::Tombstoned)
    }

    pub fn stable_id(self, id: impl Into<StableId>) -> Self {
        self.filter(Filter::StableId(id.into()))
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Sort ascending by a column.
    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by = Some(column.into());
        self
    }
}

/// Read access to a replica.
#[async_trait]
pub trait ReadReplica: Send {
    /// Whether the table exists in this replica.
    async fn table_exists(&mut self, table: &str) -> Result<bool>;

    /// Fetch rows matching the query.
    async fn query(&mut self, query: &Query) -> Result<Vec<Row>>;
}

/// Write access to a replica, used only on the merge destination.
#[async_trait]
pub trait WriteReplica: ReadReplica {
    /// Insert a row; the replica assigns its own local key.
    async fn insert(&mut self, table: &str, row: &Row) -> Result<()>;

    /// Overwrite the given columns of the row with this stable identifier.
    /// Returns the number of rows changed.
    async fn update(&mut self, table: &str, stable_id: &str, columns: &Row) -> Result<u64>;

    async fn begin(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}

/// Live rows and tombstones of one table in one replica.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSnapshot {
    /// Live rows keyed by stable identifier
    pub live: BTreeMap<StableId, Row>,
    /// Stable identifiers of soft-deleted rows
    pub tombstoned: BTreeSet<StableId>,
    /// Rows left out because they carry no stable identifier
    pub skipped: usize,
}

impl TableSnapshot {
    pub fn is_empty(&self) -> bool {
        self.live.is_empty() && self.tombstoned.is_empty()
    }
}

/// Read one table from a replica.
///
/// A table missing from the replica (e.g. an older snapshot) reads as empty.
/// Rows without a stable identifier cannot be matched across replicas and
/// are skipped.
pub async fn read_table<R>(replica: &mut R, table: &str) -> Result<TableSnapshot>
where
    R: ReadReplica + ?Sized,
{
    let mut snapshot = TableSnapshot::default();

    if !replica.table_exists(table).await? {
        tracing::debug!(table, "table absent from replica, reading as empty");
        return Ok(snapshot);
    }

    for row in replica.query(&Query::table(table).live()).await? {
        match row.stable_id() {
            Some(id) => {
                let id = id.to_string();
                snapshot.live.insert(id, row);
            }
            None => snapshot.skipped += 1,
        }
    }

    for row in replica.query(&Query::table(table).tombstoned()).await? {
        match row.stable_id() {
            Some(id) => {
                snapshot.tombstoned.insert(id.to_string());
            }
            None => snapshot.skipped += 1,
        }
    }

    if snapshot.skipped > 0 {
        tracing::debug!(
            table,
            skipped = snapshot.skipped,
            "rows without a stable identifier excluded from merge"
        );
    }

    Ok(snapshot)
}
