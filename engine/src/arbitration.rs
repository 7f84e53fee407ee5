//! Interactive conflict arbitration.
//!
//! When a row was modified on both replicas and its table has no automatic
//! policy, the merge suspends and asks an [`Arbiter`] which side to keep.
//! An "always" answer sticks for the rest of the pass, across tables.

use crate::error::{Error, Result};
use crate::row::Row;
use crate::{StableId, TableName};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which replica's version of a row survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Local,
    Remote,
}

/// An arbiter's answer to one conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    KeepLocal,
    KeepRemote,
    /// Keep local for this and every later conflict in the pass
    AlwaysLocal,
    /// Keep remote for this and every later conflict in the pass
    AlwaysRemote,
    /// Abort the whole pass
    Cancel,
}

impl Resolution {
    /// The side this answer keeps, or `None` for cancel.
    pub fn side(self) -> Option<Side> {
        match self {
            Resolution::KeepLocal | Resolution::AlwaysLocal => Some(Side::Local),
            Resolution::KeepRemote | Resolution::AlwaysRemote => Some(Side::Remote),
            Resolution::Cancel => None,
        }
    }

    pub fn is_sticky(self) -> bool {
        matches!(self, Resolution::AlwaysLocal | Resolution::AlwaysRemote)
    }
}

/// Everything an arbiter needs to present one conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInfo {
    pub table: TableName,
    pub stable_id: StableId,
    pub local_modified: String,
    pub remote_modified: String,
    pub local: Row,
    pub remote: Row,
    /// Human-readable item label, e.g. "Flashcard: Hola"
    pub description: String,
}

impl ConflictInfo {
    /// Columns whose values differ between the two versions.
    pub fn changed_columns(&self) -> Vec<String> {
        self.local.changed_columns(&self.remote)
    }
}

/// Decides conflicts that no table policy settles.
#[async_trait]
pub trait Arbiter: Send + Sync {
    async fn resolve(&self, conflict: &ConflictInfo) -> Resolution;
}

#[async_trait]
impl<F> Arbiter for F
where
    F: Fn(&ConflictInfo) -> Resolution + Send + Sync,
{
    async fn resolve(&self, conflict: &ConflictInfo) -> Resolution {
        self(conflict)
    }
}

/// Pass-scoped arbitration state: the installed arbiter and any sticky choice.
#[derive(Clone, Default)]
pub struct ArbitrationSession {
    arbiter: Option<Arc<dyn Arbiter>>,
    sticky: Option<Side>,
}

impl ArbitrationSession {
    pub fn new(arbiter: Option<Arc<dyn Arbiter>>) -> Self {
        Self {
            arbiter,
            sticky: None,
        }
    }

    pub fn has_arbiter(&self) -> bool {
        self.arbiter.is_some()
    }

    /// The side chosen with an "always" answer earlier in this pass.
    pub fn sticky(&self) -> Option<Side> {
        self.sticky
    }

    /// Forget the sticky choice; called at the start of each pass.
    pub fn reset(&mut self) {
        self.sticky = None;
    }

    /// Settle one conflict.
    ///
    /// The descriptor is only built when the arbiter is actually consulted.
    /// Without an arbiter the local side wins. A cancel answer becomes
    /// [`Error::Cancelled`].
    pub async fn decide<F>(&mut self, table: &str, describe: F) -> Result<Side>
    where
        F: FnOnce() -> ConflictInfo,
    {
        if let Some(side) = self.sticky {
            return Ok(side);
        }

        let Some(arbiter) = self.arbiter.clone() else {
            return Ok(Side::Local);
        };

        let conflict = describe();
        let resolution = arbiter.resolve(&conflict).await;
        tracing::debug!(
            table,
            stable_id = %conflict.stable_id,
            ?resolution,
            "conflict arbitrated"
        );

        let side = resolution.side().ok_or_else(|| Error::Cancelled {
            table: table.to_string(),
        })?;
        if resolution.is_sticky() {
            self.sticky = Some(side);
        }
        Ok(side)
    }
}

impl std::fmt::Debug for ArbitrationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArbitrationSession")
            .field("has_arbiter", &self.arbiter.is_some())
            .field("sticky", &self.sticky)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn conflict() -> ConflictInfo {
        ConflictInfo {
            table: "decks".into(),
            stable_id: "d-1".into(),
            local_modified: "2024-02-01T00:00:00".into(),
            remote_modified: "2024-02-02T00:00:00".into(),
            local: Row::new().with("name", "Mine"),
            remote: Row::new().with("name", "Theirs"),
            description: "Deck: Mine".into(),
        }
    }

    fn counting(answer: Resolution, calls: Arc<AtomicUsize>) -> Arc<dyn Arbiter> {
        Arc::new(move |_: &ConflictInfo| {
            calls.fetch_add(1, Ordering::SeqCst);
            answer
        })
    }

    #[test]
    fn resolution_sides() {
        assert_eq!(Resolution::KeepLocal.side(), Some(Side::Local));
        assert_eq!(Resolution::AlwaysRemote.side(), Some(Side::Remote));
        assert_eq!(Resolution::Cancel.side(), None);
        assert!(Resolution::AlwaysLocal.is_sticky());
        assert!(!Resolution::KeepRemote.is_sticky());
    }

    #[test]
    fn changed_columns_lists_differences() {
        assert_eq!(conflict().changed_columns(), vec!["name".to_string()]);
    }

    #[tokio::test]
    async fn no_arbiter_keeps_local() {
        let mut session = ArbitrationSession::default();
        let side = session
            .decide("decks", || panic!("descriptor must not be built"))
            .await
            .unwrap();
        assert_eq!(side, Side::Local);
    }

    #[tokio::test]
    async fn keep_answers_are_not_sticky() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut session = ArbitrationSession::new(Some(counting(Resolution::KeepRemote, calls.clone())));

        assert_eq!(session.decide("decks", conflict).await.unwrap(), Side::Remote);
        assert_eq!(session.decide("decks", conflict).await.unwrap(), Side::Remote);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(session.sticky(), None);
    }

    #[tokio::test]
    async fn always_answers_stick_until_reset() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut session =
            ArbitrationSession::new(Some(counting(Resolution::AlwaysRemote, calls.clone())));

        assert_eq!(session.decide("decks", conflict).await.unwrap(), Side::Remote);
        assert_eq!(session.decide("collections", conflict).await.unwrap(), Side::Remote);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.sticky(), Some(Side::Remote));

        session.reset();
        session.decide("decks", conflict).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancel_becomes_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut session = ArbitrationSession::new(Some(counting(Resolution::Cancel, calls)));

        let err = session.decide("decks", conflict).await.unwrap_err();
        assert_eq!(
            err,
            Error::Cancelled {
                table: "decks".into()
            }
        );
    }
}
