//! Writes merge decisions into the destination replica.
//!
//! Every operation addresses rows by stable identifier, never by local key,
//! and reports whether it actually wrote. Re-applying an outcome the replica
//! already holds is a no-op.

use crate::error::{Error, Result};
use crate::replica::{Query, WriteReplica};
use crate::row::{Row, Value, DELETED_AT, LAST_MODIFIED, LOCAL_KEY, STABLE_ID};

/// Insert, update and soft-delete against one replica.
pub struct MutationApplier<'a, W: WriteReplica + ?Sized> {
    replica: &'a mut W,
}

impl<'a, W: WriteReplica + ?Sized> MutationApplier<'a, W> {
    pub fn new(replica: &'a mut W) -> Self {
        Self { replica }
    }

    async fn find(&mut self, table: &str, stable_id: &str) -> Result<Option<Row>> {
        let mut rows = self
            .replica
            .query(&Query::table(table).stable_id(stable_id))
            .await?;
        Ok(rows.pop())
    }

    /// Copy a row from the other replica under a fresh local key.
    ///
    /// Returns `false` when a row with the same stable identifier is already
    /// present, live or tombstoned.
    pub async fn insert(&mut self, table: &str, row: &Row) -> Result<bool> {
        let stable_id = row.stable_id().ok_or_else(|| Error::MissingStableId {
            table: table.to_string(),
        })?;

        if self.find(table, stable_id).await?.is_some() {
            return Ok(false);
        }

        self.replica.insert(table, &row.without_local_key()).await?;
        Ok(true)
    }

    /// Overwrite the row sharing `row`'s stable identifier with its values.
    ///
    /// The local key and the stable identifier are never written, and a NULL
    /// tombstone never clears an existing one. Returns `false` when the
    /// stored row already has identical content.
    pub async fn update(&mut self, table: &str, row: &Row) -> Result<bool> {
        let stable_id = row.stable_id().ok_or_else(|| Error::MissingStableId {
            table: table.to_string(),
        })?;

        let existing = self
            .find(table, stable_id)
            .await?
            .ok_or_else(|| Error::RowNotFound {
                table: table.to_string(),
                stable_id: stable_id.to_string(),
            })?;

        let mut columns = row.clone();
        columns.remove(LOCAL_KEY);
        columns.remove(STABLE_ID);
        if columns.get(DELETED_AT).is_some_and(Value::is_null) {
            columns.remove(DELETED_AT);
        }

        let unchanged = columns
            .iter()
            .all(|(name, value)| existing.get(name).unwrap_or(&Value::Null) == value);
        if unchanged {
            return Ok(false);
        }

        let changed = self.replica.update(table, stable_id, &columns).await?;
        if changed == 0 {
            return Err(Error::RowNotFound {
                table: table.to_string(),
                stable_id: stable_id.to_string(),
            });
        }
        Ok(true)
    }

    /// Tombstone a row at `now` and refresh its last-modified marker.
    ///
    /// Returns `false` when the row is already tombstoned.
    pub async fn soft_delete(&mut self, table: &str, stable_id: &str, now: &str) -> Result<bool> {
        let existing = self
            .find(table, stable_id)
            .await?
            .ok_or_else(|| Error::RowNotFound {
                table: table.to_string(),
                stable_id: stable_id.to_string(),
            })?;

        if existing.is_tombstoned() {
            return Ok(false);
        }

        let columns = Row::new().with(DELETED_AT, now).with(LAST_MODIFIED, now);
        self.replica.update(table, stable_id, &columns).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryReplica;

    fn card(uuid: &str, question: &str) -> Row {
        Row::new()
            .with(LOCAL_KEY, 99)
            .with(STABLE_ID, uuid)
            .with("question", question)
            .with(LAST_MODIFIED, "2024-01-01T00:00:00")
            .with(DELETED_AT, Value::Null)
    }

    #[tokio::test]
    async fn insert_preserves_identity_and_skips_duplicates() {
        let mut replica = MemoryReplica::new().with_table("flashcards");
        let mut applier = MutationApplier::new(&mut replica);

        assert!(applier.insert("flashcards", &card("c-1", "Hola")).await.unwrap());
        assert!(!applier.insert("flashcards", &card("c-1", "Hola")).await.unwrap());

        let stored = replica.get("flashcards", "c-1").unwrap();
        assert_eq!(stored.get(LOCAL_KEY), Some(&Value::from(1)));
        assert_eq!(stored.get("question"), Some(&Value::from("Hola")));
        assert_eq!(replica.write_count(), 1);
    }

    #[tokio::test]
    async fn insert_requires_stable_id() {
        let mut replica = MemoryReplica::new().with_table("flashcards");
        let mut applier = MutationApplier::new(&mut replica);

        let err = applier
            .insert("flashcards", &Row::new().with("question", "x"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            Error::MissingStableId {
                table: "flashcards".into()
            }
        );
    }

    #[tokio::test]
    async fn update_overwrites_everything_but_keys() {
        let mut replica = MemoryReplica::new();
        replica.seed("flashcards", card("c-1", "Hola"));
        let mut applier = MutationApplier::new(&mut replica);

        let incoming = card("c-1", "Hello").with(LAST_MODIFIED, "2024-03-01T00:00:00");
        assert!(applier.update("flashcards", &incoming).await.unwrap());
        assert!(!applier.update("flashcards", &incoming).await.unwrap());

        let stored = replica.get("flashcards", "c-1").unwrap();
        assert_eq!(stored.get(LOCAL_KEY), Some(&Value::from(1)));
        assert_eq!(stored.get("question"), Some(&Value::from("Hello")));
        assert_eq!(
            stored.get(LAST_MODIFIED),
            Some(&Value::from("2024-03-01T00:00:00"))
        );
    }

    #[tokio::test]
    async fn update_never_clears_tombstone() {
        let mut replica = MemoryReplica::new();
        replica.seed(
            "flashcards",
            card("c-1", "Hola").with(DELETED_AT, "2024-02-01T00:00:00"),
        );
        let mut applier = MutationApplier::new(&mut replica);

        applier
            .update("flashcards", &card("c-1", "Hello"))
            .await
            .unwrap();

        let stored = replica.get("flashcards", "c-1").unwrap();
        assert!(stored.is_tombstoned());
        assert_eq!(stored.get("question"), Some(&Value::from("Hello")));
    }

    #[tokio::test]
    async fn update_missing_row_fails() {
        let mut replica = MemoryReplica::new().with_table("flashcards");
        let mut applier = MutationApplier::new(&mut replica);

        let err = applier
            .update("flashcards", &card("nope", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RowNotFound { .. }));
    }

    #[tokio::test]
    async fn soft_delete_is_monotonic() {
        let mut replica = MemoryReplica::new();
        replica.seed("flashcards", card("c-1", "Hola"));
        let mut applier = MutationApplier::new(&mut replica);

        assert!(applier
            .soft_delete("flashcards", "c-1", "2024-05-01T00:00:00")
            .await
            .unwrap());
        assert!(!applier
            .soft_delete("flashcards", "c-1", "2024-06-01T00:00:00")
            .await
            .unwrap());

        let stored = replica.get("flashcards", "c-1").unwrap();
        assert_eq!(stored.deleted_at(), Some("2024-05-01T00:00:00"));
        assert_eq!(stored.last_modified(), Some("2024-05-01T00:00:00"));
        assert_eq!(stored.get("question"), Some(&Value::from("Hola")));
    }
}
