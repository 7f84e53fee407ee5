//! Reconciliation of a remote replica into the local one.
//!
//! This is the core of the merge. For each syncable table, both replicas are
//! read, every remote row is classified against the local state and the
//! watermark, and the local replica is updated inside one transaction.
//!
//! # Algorithm
//!
//! 1. Read live rows and tombstones from both replicas
//! 2. For each remote live row (ascending stable identifier):
//!    - tombstoned locally: skip, local deletions are never resurrected
//!    - absent locally: insert
//!    - identical content: nothing to do
//!    - only remote dirty: copy remote over local
//!    - only local dirty, or neither: keep local
//!    - both dirty: conflict, settled by the table's policy or the arbiter
//! 3. For each remote tombstone still live locally: soft-delete unless the
//!    local copy is dirty
//! 4. Commit and report counts
//!
//! The remote replica is only ever read.

use crate::applier::MutationApplier;
use crate::arbitration::{Arbiter, ArbitrationSession, ConflictInfo, Side};
use crate::error::{Error, Result};
use crate::replica::{read_table, ReadReplica, TableSnapshot, WriteReplica};
use crate::row::Row;
use crate::schema::{SyncSchema, TableSpec};
use crate::watermark::{now_iso, Watermark};
use crate::TableName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::AddAssign;
use std::sync::Arc;

/// Rows affected in the local replica by merging one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStats {
    /// Rows copied in from the remote replica
    pub added: usize,
    /// Rows overwritten with the remote version
    pub updated: usize,
    /// Rows modified on both replicas, however they were settled
    pub conflicts: usize,
    /// Rows tombstoned because the remote replica deleted them
    pub deleted: usize,
}

impl TableStats {
    /// `(added, updated, conflicts)`.
    pub fn triple(&self) -> (usize, usize, usize) {
        (self.added, self.updated, self.conflicts)
    }

    pub fn is_empty(&self) -> bool {
        *self == TableStats::default()
    }
}

impl AddAssign for TableStats {
    fn add_assign(&mut self, other: Self) {
        self.added += other.added;
        self.updated += other.updated;
        self.conflicts += other.conflicts;
        self.deleted += other.deleted;
    }
}

/// Outcome of a whole pass over the syncable tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    /// Counts per table; failed tables are present with zero counts
    pub tables: BTreeMap<TableName, TableStats>,
    /// Tables whose merge failed and was rolled back, with the reason
    pub failures: BTreeMap<TableName, String>,
}

impl PassReport {
    fn record(&mut self, table: TableName, stats: TableStats) {
        self.tables.insert(table, stats);
    }

    fn record_failure(&mut self, table: TableName, err: &Error) {
        self.tables.insert(table.clone(), TableStats::default());
        self.failures.insert(table, err.to_string());
    }

    pub fn get(&self, table: &str) -> Option<&TableStats> {
        self.tables.get(table)
    }

    /// Sum over all tables.
    pub fn totals(&self) -> TableStats {
        let mut totals = TableStats::default();
        for stats in self.tables.values() {
            totals += *stats;
        }
        totals
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Where a remote live row stands relative to the local replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowState {
    /// The local replica deleted this row
    LocallyDeleted,
    /// The local replica has never seen this row
    New,
    /// The local row already holds every remote value
    InSync,
    /// Neither side changed since the watermark
    Unchanged,
    /// Only the remote side changed
    RemoteChanged,
    /// Only the local side changed
    LocalChanged,
    /// Both sides changed
    Conflict,
}

/// Classify a remote live row against its local counterpart.
pub fn classify(
    local: Option<&Row>,
    remote: &Row,
    locally_deleted: bool,
    watermark: &Watermark,
) -> RowState {
    if locally_deleted {
        return RowState::LocallyDeleted;
    }
    let Some(local) = local else {
        return RowState::New;
    };
    // Columns the remote lacks cannot be reconciled and are left out
    if local.contains_content(remote) {
        return RowState::InSync;
    }

    match (watermark.is_dirty(local), watermark.is_dirty(remote)) {
        (false, false) => RowState::Unchanged,
        (false, true) => RowState::RemoteChanged,
        (true, false) => RowState::LocalChanged,
        (true, true) => RowState::Conflict,
    }
}

type Clock = Arc<dyn Fn() -> String + Send + Sync>;

/// Merges a remote replica into a local one, table by table.
///
/// Holds the pass-scoped state: the watermark, the schema, the arbitration
/// session with its sticky choice, and the clock used to stamp tombstones.
pub struct Reconciler<'a, L, R>
where
    L: WriteReplica + ?Sized,
    R: ReadReplica + ?Sized,
{
    local: &'a mut L,
    remote: &'a mut R,
    watermark: Watermark,
    schema: SyncSchema,
    session: ArbitrationSession,
    clock: Clock,
}

impl<'a, L, R> Reconciler<'a, L, R>
where
    L: WriteReplica + ?Sized,
    R: ReadReplica + ?Sized,
{
    /// Create a reconciler over the standard schema with no arbiter.
    pub fn new(local: &'a mut L, remote: &'a mut R, watermark: Watermark) -> Self {
        Self {
            local,
            remote,
            watermark,
            schema: SyncSchema::standard(),
            session: ArbitrationSession::default(),
            clock: Arc::new(now_iso),
        }
    }

    pub fn with_schema(mut self, schema: SyncSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Install the arbiter consulted for conflicts without an automatic policy.
    pub fn with_arbiter(mut self, arbiter: Arc<dyn Arbiter>) -> Self {
        self.session = ArbitrationSession::new(Some(arbiter));
        self
    }

    /// Replace the clock used to stamp soft-deletes.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn watermark(&self) -> &Watermark {
        &self.watermark
    }

    pub fn schema(&self) -> &SyncSchema {
        &self.schema
    }

    pub fn session(&self) -> &ArbitrationSession {
        &self.session
    }

    /// Merge every syncable table in schema order.
    ///
    /// The sticky arbitration choice is reset first. A table that fails is
    /// rolled back and reported with zero counts while the pass continues;
    /// a cancellation stops the pass and is returned as the error, leaving
    /// tables merged before it committed.
    pub async fn reconcile_all(&mut self) -> Result<PassReport> {
        self.session.reset();
        let mut report = PassReport::default();

        for table in self.schema.table_names() {
            match self.reconcile(&table).await {
                Ok(stats) => report.record(table, stats),
                Err(err) if err.is_cancellation() => {
                    tracing::warn!(table = %table, "sync cancelled, remaining tables skipped");
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(table = %table, error = %err, "table merge failed, continuing");
                    report.record_failure(table, &err);
                }
            }
        }

        let totals = report.totals();
        tracing::info!(
            added = totals.added,
            updated = totals.updated,
            conflicts = totals.conflicts,
            deleted = totals.deleted,
            failed = report.failures.len(),
            "sync pass finished"
        );
        Ok(report)
    }

    /// Merge one syncable table into the local replica.
    ///
    /// All writes for the table happen in one local transaction; any error,
    /// including cancellation, rolls the table back.
    pub async fn reconcile(&mut self, table: &str) -> Result<TableStats> {
        let spec = self.schema.table(table)?.clone();

        let local = read_table(&mut *self.local, table).await?;
        let remote = read_table(&mut *self.remote, table).await?;

        if remote.is_empty() {
            tracing::debug!(table, "nothing to merge from remote");
            return Ok(TableStats::default());
        }

        self.local.begin().await?;
        match self.merge_table(&spec, &local, &remote).await {
            Ok(stats) => {
                self.local.commit().await?;
                tracing::info!(
                    table,
                    added = stats.added,
                    updated = stats.updated,
                    conflicts = stats.conflicts,
                    deleted = stats.deleted,
                    "table merged"
                );
                Ok(stats)
            }
            Err(err) => {
                if let Err(rollback_err) = self.local.rollback().await {
                    tracing::error!(table, error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn merge_table(
        &mut self,
        spec: &TableSpec,
        local: &TableSnapshot,
        remote: &TableSnapshot,
    ) -> Result<TableStats> {
        let table = spec.name.as_str();
        let now = (self.clock)();
        let mut applier = MutationApplier::new(&mut *self.local);
        let mut stats = TableStats::default();

        for (stable_id, remote_row) in &remote.live {
            let local_row = local.live.get(stable_id);
            let state = classify(
                local_row,
                remote_row,
                local.tombstoned.contains(stable_id),
                &self.watermark,
            );
            tracing::debug!(table, stable_id = %stable_id, ?state, "row classified");

            match state {
                RowState::LocallyDeleted
                | RowState::InSync
                | RowState::Unchanged
                | RowState::LocalChanged => {}
                RowState::New => {
                    if applier.insert(table, remote_row).await? {
                        stats.added += 1;
                    }
                }
                RowState::RemoteChanged => {
                    if applier.update(table, remote_row).await? {
                        stats.updated += 1;
                    }
                }
                RowState::Conflict => {
                    stats.conflicts += 1;
                    let Some(local_row) = local_row else {
                        continue;
                    };

                    let side = match spec.policy.auto_resolve(local_row, remote_row) {
                        Some(side) => side,
                        None => {
                            self.session
                                .decide(table, || ConflictInfo {
                                    table: table.to_string(),
                                    stable_id: stable_id.clone(),
                                    local_modified: local_row
                                        .last_modified()
                                        .unwrap_or_default()
                                        .to_string(),
                                    remote_modified: remote_row
                                        .last_modified()
                                        .unwrap_or_default()
                                        .to_string(),
                                    local: local_row.clone(),
                                    remote: remote_row.clone(),
                                    description: spec.describe(local_row),
                                })
                                .await?
                        }
                    };

                    if side == Side::Remote && applier.update(table, remote_row).await? {
                        stats.updated += 1;
                    }
                }
            }
        }

        for stable_id in &remote.tombstoned {
            let Some(local_row) = local.live.get(stable_id) else {
                continue;
            };
            if self.watermark.is_dirty(local_row) {
                tracing::debug!(
                    table,
                    stable_id = %stable_id,
                    "remote deletion not applied, local copy changed since last sync"
                );
                continue;
            }
            if applier.soft_delete(table, stable_id, &now).await? {
                stats.deleted += 1;
            }
        }

        Ok(stats)
    }
}
