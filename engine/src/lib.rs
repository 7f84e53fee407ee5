//! # Duet Engine
//!
//! Pairwise reconciliation for two diverging copies of the same tabular
//! dataset: a local replica that may hold unsynchronized work, and a remote
//! snapshot (typically the cloud-held canonical copy).
//!
//! A pass compares the replicas table by table, classifies every record as
//! new, locally changed, remotely changed, conflicting or tombstoned, and
//! writes the merged result into the local replica only. The merge is
//! deterministic and idempotent: running it again over the result changes
//! nothing.
//!
//! ## Design Principles
//!
//! - **Storage-agnostic**: replicas are reached through the [`ReadReplica`]
//!   and [`WriteReplica`] traits; the engine owns no files or connections
//! - **Stable identity**: rows are matched by their `uuid`, never by the
//!   replica-local `id`
//! - **Never lose local work**: local deletions and local-only edits win by
//!   default, deletes are soft
//! - **Atomic per table**: each table merges in one local transaction
//!
//! ## Core Concepts
//!
//! ### Rows and markers
//!
//! A [`Row`] maps column names to scalar [`Value`]s. Every syncable row has:
//! - `uuid`: stable identifier shared by all replicas
//! - `last_modified`: ISO-8601 timestamp refreshed on each local mutation
//! - `deleted_at`: tombstone timestamp, NULL while live
//!
//! ### Watermark
//!
//! The [`Watermark`] is the time of the last successful sync. A row is dirty
//! when its `last_modified` sorts strictly after it.
//!
//! ### Conflicts
//!
//! A row dirty on both sides is a conflict. Each table in the [`SyncSchema`]
//! names its [`ConflictPolicy`]:
//! - [`ConflictPolicy::MostProgress`] - larger counter wins, ties keep local
//!   (flashcards compare `total_reviews`)
//! - [`ConflictPolicy::Arbitrate`] - ask the installed [`Arbiter`] (default);
//!   without one, local wins
//!
//! ## Quick Start
//!
//! ```rust
//! use duet_engine::{MemoryReplica, Reconciler, Row, Value, Watermark};
//!
//! # tokio_test_block_on(async {
//! let mut local = MemoryReplica::new().with_table("flashcards");
//! let mut remote = MemoryReplica::new();
//! remote.seed(
//!     "flashcards",
//!     Row::new()
//!         .with("uuid", "123")
//!         .with("question", "Hola")
//!         .with("last_modified", "2024-01-15T10:00:00")
//!         .with("deleted_at", Value::Null),
//! );
//!
//! let mut reconciler = Reconciler::new(&mut local, &mut remote, Watermark::epoch());
//! let stats = reconciler.reconcile("flashcards").await.unwrap();
//! assert_eq!(stats.triple(), (1, 0, 0));
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

pub mod applier;
pub mod arbitration;
pub mod error;
pub mod memory;
pub mod reconcile;
pub mod replica;
pub mod row;
pub mod schema;
pub mod watermark;

// Re-export main types at crate root
pub use applier::MutationApplier;
pub use arbitration::{Arbiter, ArbitrationSession, ConflictInfo, Resolution, Side};
pub use error::{Error, Result};
pub use memory::{MemoryReplica, MemoryTable};
pub use reconcile::{classify, PassReport, Reconciler, RowState, TableStats};
pub use replica::{read_table, Filter, Query, ReadReplica, TableSnapshot, WriteReplica};
pub use row::{Row, Value, DELETED_AT, LAST_MODIFIED, LOCAL_KEY, STABLE_ID};
pub use schema::{ConflictPolicy, LabelSpec, SyncSchema, TableSpec};
pub use watermark::{now_iso, Watermark};

/// Type aliases for clarity
pub type TableName = String;
pub type StableId = String;
