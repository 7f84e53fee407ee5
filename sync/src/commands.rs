//! The merge and status commands.
//!
//! A merge copies the local database aside, opens the downloaded snapshot
//! read-only, reconciles every syncable table into the local database and
//! finally records the sync time there.

use crate::config::ConflictMode;
use crate::db::{self, metadata, SqliteReplica};
use crate::error::{AppError, Result};
use crate::prompt::TerminalArbiter;
use duet_engine::{
    now_iso, read_table, Arbiter, ConflictInfo, PassReport, ReadReplica, Reconciler, Resolution,
    SyncSchema, Watermark,
};
use serde::Serialize;
use sqlx::Connection;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything a merge needs, after config and flags are combined.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub local: PathBuf,
    pub remote: PathBuf,
    /// Overrides the recorded last sync time
    pub since: Option<String>,
    pub backup: bool,
}

/// What a merge did.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    /// Watermark the pass ran against
    pub watermark: Watermark,
    pub report: PassReport,
    /// Backup file written before merging
    pub backup: Option<PathBuf>,
    /// New last sync time, unless a table failed
    pub recorded_sync: Option<String>,
}

/// `<local>.backup` next to the local database.
pub fn backup_path(local: &Path) -> PathBuf {
    let mut name = local.as_os_str().to_owned();
    name.push(".backup");
    PathBuf::from(name)
}

/// Parse a `--since` value into the stored watermark format.
///
/// A space separator or a bare date is accepted and rewritten with the `T`
/// separator, since the watermark is compared lexically against markers.
pub fn parse_since(since: &str) -> Result<Watermark> {
    let parsed = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| chrono::NaiveDateTime::parse_from_str(since, format).ok())
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(since, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| AppError::InvalidTimestamp(since.to_string()))?;

    Ok(Watermark::new(parsed.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
}

/// The arbiter for a conflict mode; `None` keeps local.
pub fn arbiter_for(mode: ConflictMode) -> Option<Arc<dyn Arbiter>> {
    match mode {
        ConflictMode::Ask => Some(Arc::new(TerminalArbiter::stdio()) as Arc<dyn Arbiter>),
        ConflictMode::Local => None,
        ConflictMode::Remote => {
            Some(Arc::new(|_: &ConflictInfo| Resolution::AlwaysRemote) as Arc<dyn Arbiter>)
        }
    }
}

/// Merge the remote snapshot into the local database.
///
/// A cancelled pass returns the cancellation error and leaves the recorded
/// sync time untouched; tables merged before the cancel stay committed.
pub async fn merge(options: &MergeOptions, arbiter: Option<Arc<dyn Arbiter>>) -> Result<MergeOutcome> {
    let since = options.since.as_deref().map(parse_since).transpose()?;
    let local_conn = db::open_writable(&options.local).await?;
    let remote_conn = db::open_read_only(&options.remote).await?;

    let backup = if options.backup {
        let path = backup_path(&options.local);
        tokio::fs::copy(&options.local, &path).await?;
        tracing::info!(path = %path.display(), "local database backed up");
        Some(path)
    } else {
        None
    };

    let mut local = SqliteReplica::new(local_conn);
    let mut remote = SqliteReplica::new(remote_conn);

    let watermark = match since {
        Some(since) => since,
        None => Watermark::or_epoch(metadata::last_sync(local.connection_mut()).await?),
    };
    tracing::info!(
        local = %options.local.display(),
        remote = %options.remote.display(),
        watermark = %watermark,
        "merging"
    );

    let mut reconciler = Reconciler::new(&mut local, &mut remote, watermark.clone());
    if let Some(arbiter) = arbiter {
        reconciler = reconciler.with_arbiter(arbiter);
    }
    let result = reconciler.reconcile_all().await;
    drop(reconciler);

    remote.into_inner().close().await?;
    let report = result?;

    let recorded_sync = if report.has_failures() {
        tracing::warn!(
            failed = report.failures.len(),
            "some tables failed, last sync time not advanced"
        );
        None
    } else {
        let now = now_iso();
        metadata::record_sync(local.connection_mut(), &now).await?;
        Some(now)
    };
    local.into_inner().close().await?;

    Ok(MergeOutcome {
        watermark,
        report,
        backup,
        recorded_sync,
    })
}

/// Human-readable merge summary, one line per table that changed.
pub fn summary(outcome: &MergeOutcome) -> String {
    let mut out = String::new();
    for (table, stats) in &outcome.report.tables {
        if let Some(reason) = outcome.report.failures.get(table) {
            let _ = writeln!(out, "{:<24} FAILED: {}", table, reason);
        } else if !stats.is_empty() {
            let _ = writeln!(
                out,
                "{:<24} Added: {}, Updated: {}, Conflicts: {}, Deleted: {}",
                table, stats.added, stats.updated, stats.conflicts, stats.deleted
            );
        }
    }

    let totals = outcome.report.totals();
    let _ = writeln!(
        out,
        "Merge complete! Added: {}, Updated: {}, Conflicts: {}, Deleted: {}",
        totals.added, totals.updated, totals.conflicts, totals.deleted
    );
    out
}

/// Row counts for one table of a database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub live: usize,
    pub tombstoned: usize,
    /// Rows without a stable identifier
    pub skipped: usize,
}

/// Sync state of a local database.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub last_sync: Option<String>,
    /// Tables present in the database, by name
    pub tables: BTreeMap<String, TableCounts>,
}

/// Inspect a database without modifying it.
pub async fn status(path: &Path) -> Result<StatusReport> {
    let mut replica = SqliteReplica::new(db::open_read_only(path).await?);
    let last_sync = metadata::last_sync(replica.connection_mut()).await?;

    let mut tables = BTreeMap::new();
    for table in SyncSchema::standard().table_names() {
        if !replica.table_exists(&table).await? {
            continue;
        }
        let snapshot = read_table(&mut replica, &table).await?;
        tables.insert(
            table,
            TableCounts {
                live: snapshot.live.len(),
                tombstoned: snapshot.tombstoned.len(),
                skipped: snapshot.skipped,
            },
        );
    }
    replica.into_inner().close().await?;

    Ok(StatusReport { last_sync, tables })
}

impl std::fmt::Display for StatusReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Last sync: {}",
            self.last_sync.as_deref().unwrap_or("never")
        )?;
        for (table, counts) in &self.tables {
            writeln!(
                f,
                "{:<24} live: {}, deleted: {}, without uuid: {}",
                table, counts.live, counts.tombstoned, counts.skipped
            )?;
        }
        Ok(())
    }
}
