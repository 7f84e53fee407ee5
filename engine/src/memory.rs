//! In-memory replica.
//!
//! Behaves like a small SQLite database: tables must be created before they
//! can be written, inserts receive an auto-increment local key, and a
//! transaction can be rolled back to the state at `begin`.

use crate::error::{Error, Result};
use crate::replica::{Query, ReadReplica, WriteReplica};
use crate::row::{Row, LOCAL_KEY};
use crate::TableName;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};

/// A table's rows in insertion order plus its key counter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryTable {
    rows: Vec<Row>,
    next_key: i64,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            next_key: 1,
        }
    }

    fn insert(&mut self, mut row: Row) {
        row.set(LOCAL_KEY, self.next_key);
        self.next_key += 1;
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A replica held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryReplica {
    tables: BTreeMap<TableName, MemoryTable>,
    savepoint: Option<BTreeMap<TableName, MemoryTable>>,
    poisoned: BTreeSet<TableName>,
    writes: usize,
}

impl MemoryReplica {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty table (no-op if it exists).
    pub fn create_table(&mut self, table: impl Into<TableName>) {
        self.tables.entry(table.into()).or_insert_with(MemoryTable::new);
    }

    /// Builder variant of [`create_table`](Self::create_table).
    pub fn with_table(mut self, table: impl Into<TableName>) -> Self {
        self.create_table(table);
        self
    }

    /// Insert a row directly, creating the table if needed. Not counted as a write.
    pub fn seed(&mut self, table: impl Into<TableName>, row: Row) {
        self.tables
            .entry(table.into())
            .or_insert_with(MemoryTable::new)
            .insert(row.without_local_key());
    }

    /// Make every subsequent write to `table` fail.
    pub fn poison_table(&mut self, table: impl Into<TableName>) {
        self.poisoned.insert(table.into());
    }

    pub fn table(&self, table: &str) -> Option<&MemoryTable> {
        self.tables.get(table)
    }

    /// Find a row by stable identifier, live or tombstoned.
    pub fn get(&self, table: &str, stable_id: &str) -> Option<&Row> {
        self.tables
            .get(table)?
            .rows
            .iter()
            .find(|row| row.stable_id() == Some(stable_id))
    }

    /// Number of inserts and row-matching updates since creation.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    pub fn in_transaction(&self) -> bool {
        self.savepoint.is_some()
    }

    fn writable(&mut self, table: &str) -> Result<&mut MemoryTable> {
        if self.poisoned.contains(table) {
            return Err(Error::replica(format!("table '{}' is not writable", table)));
        }
        self.tables
            .get_mut(table)
            .ok_or_else(|| Error::replica(format!("no such table: {}", table)))
    }
}

#[async_trait]
impl ReadReplica for MemoryReplica {
    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        Ok(self.tables.contains_key(table))
    }

    async fn query(&mut self, query: &Query) -> Result<Vec<Row>> {
        let table = self
            .tables
            .get(&query.table)
            .ok_or_else(|| Error::replica(format!("no such table: {}", query.table)))?;

        let mut rows: Vec<Row> = table
            .rows
            .iter()
            .filter(|row| query.filter.as_ref().map_or(true, |f| f.matches(row)))
            .cloned()
            .collect();

        if let Some(column) = &query.order_by {
            rows.sort_by(|a, b| {
                let null = crate::row::Value::Null;
                a.get(column)
                    .unwrap_or(&null)
                    .sort_cmp(b.get(column).unwrap_or(&null))
            });
        }

        Ok(rows)
    }
}

#[async_trait]
impl WriteReplica for MemoryReplica {
    async fn insert(&mut self, table: &str, row: &Row) -> Result<()> {
        let target = self.writable(table)?;
        target.insert(row.without_local_key());
        self.writes += 1;
        Ok(())
    }

    async fn update(&mut self, table: &str, stable_id: &str, columns: &Row) -> Result<u64> {
        let target = self.writable(table)?;
        let mut changed = 0;
        for row in target
            .rows
            .iter_mut()
            .filter(|row| row.stable_id() == Some(stable_id))
        {
            for (name, value) in columns.iter() {
                row.set(name.clone(), value.clone());
            }
            changed += 1;
        }
        if changed > 0 {
            self.writes += 1;
        }
        Ok(changed)
    }

    async fn begin(&mut self) -> Result<()> {
        if self.savepoint.is_some() {
            return Err(Error::replica("cannot start a transaction within a transaction"));
        }
        self.savepoint = Some(self.tables.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.savepoint
            .take()
            .map(|_| ())
            .ok_or_else(|| Error::replica("cannot commit - no transaction is active"))
    }

    async fn rollback(&mut self) -> Result<()> {
        let saved = self
            .savepoint
            .take()
            .ok_or_else(|| Error::replica("cannot rollback - no transaction is active"))?;
        self.tables = saved;
        Ok(())
    }
}
