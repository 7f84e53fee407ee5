//! The fixed set of syncable tables and their per-table merge settings.
//!
//! Tables outside the schema are invisible to the engine. Each table carries
//! the column used to label its rows in conflict prompts and the policy that
//! settles rows modified on both replicas.

use crate::arbitration::Side;
use crate::error::{Error, Result};
use crate::row::{Row, Value};
use crate::TableName;
use serde::{Deserialize, Serialize};

/// Table whose conflicts are settled by review progress.
pub const FLASHCARDS: &str = "flashcards";
/// Cumulative review counter compared for flashcard conflicts.
pub const TOTAL_REVIEWS: &str = "total_reviews";

/// How a conflict (row dirty on both replicas) is settled for a table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ConflictPolicy {
    /// Ask the installed arbiter; keep local when there is none (default).
    #[default]
    Arbitrate,
    /// The side with the larger integer in `column` wins, ties keep local.
    MostProgress { column: String },
}

impl ConflictPolicy {
    pub fn most_progress(column: impl Into<String>) -> Self {
        ConflictPolicy::MostProgress {
            column: column.into(),
        }
    }

    /// Decide without user input, or `None` if the arbiter must be asked.
    pub fn auto_resolve(&self, local: &Row, remote: &Row) -> Option<Side> {
        match self {
            ConflictPolicy::Arbitrate => None,
            ConflictPolicy::MostProgress { column } => {
                let count = |row: &Row| row.get(column).and_then(Value::as_i64).unwrap_or(0);
                if count(local) >= count(remote) {
                    Some(Side::Local)
                } else {
                    Some(Side::Remote)
                }
            }
        }
    }
}

/// Where a table's human-readable row label comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSpec {
    /// Kind of item, shown before the value ("Flashcard", "Deck", ...)
    pub prefix: String,
    /// Primary text column
    pub column: String,
    /// Truncate the value to this many characters
    pub max_chars: Option<usize>,
}

impl LabelSpec {
    pub fn new(prefix: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            column: column.into(),
            max_chars: None,
        }
    }

    pub fn truncated(mut self, max_chars: usize) -> Self {
        self.max_chars = Some(max_chars);
        self
    }
}

/// Merge settings for one syncable table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSpec {
    pub name: TableName,
    pub label: Option<LabelSpec>,
    pub policy: ConflictPolicy,
}

impl TableSpec {
    pub fn new(name: impl Into<TableName>) -> Self {
        Self {
            name: name.into(),
            label: None,
            policy: ConflictPolicy::default(),
        }
    }

    pub fn with_label(mut self, label: LabelSpec) -> Self {
        self.label = Some(label);
        self
    }

    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Short description of a row for conflict prompts.
    pub fn describe(&self, row: &Row) -> String {
        match &self.label {
            Some(label) => {
                let text = match row.get(&label.column) {
                    None | Some(Value::Null) => "Unknown".to_string(),
                    Some(value) => value.to_string(),
                };
                let text = match label.max_chars {
                    Some(max) => text.chars().take(max).collect(),
                    None => text,
                };
                format!("{}: {}", label.prefix, text)
            }
            None => {
                let id: String = row.stable_id().unwrap_or("Unknown").chars().take(8).collect();
                format!("{}: {}", self.name, id)
            }
        }
    }
}

/// Ordered list of syncable tables.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSchema {
    tables: Vec<TableSpec>,
}

impl SyncSchema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// The language-study dataset: tables in merge order.
    pub fn standard() -> Self {
        Self::new()
            .with_table(TableSpec::new("decks").with_label(LabelSpec::new("Deck", "name")))
            .with_table(
                TableSpec::new(FLASHCARDS)
                    .with_label(LabelSpec::new("Flashcard", "question").truncated(50))
                    .with_policy(ConflictPolicy::most_progress(TOTAL_REVIEWS)),
            )
            .with_table(
                TableSpec::new("imported_content")
                    .with_label(LabelSpec::new("Import", "content").truncated(50)),
            )
            .with_table(
                TableSpec::new("word_definitions").with_label(LabelSpec::new("Word", "word")),
            )
            .with_table(
                TableSpec::new("sentence_explanations")
                    .with_label(LabelSpec::new("Sentence", "sentence").truncated(50)),
            )
            .with_table(
                TableSpec::new("writing_sessions")
                    .with_label(LabelSpec::new("Essay", "topic").truncated(50)),
            )
            .with_table(
                TableSpec::new("chat_sessions")
                    .with_label(LabelSpec::new("Chat", "cur_topic").truncated(50)),
            )
            .with_table(
                TableSpec::new("grammar_book_entries")
                    .with_label(LabelSpec::new("Grammar", "title")),
            )
            .with_table(TableSpec::new("collections"))
    }

    /// Append a table, replacing any existing entry with the same name in place.
    pub fn add_table(&mut self, spec: TableSpec) {
        match self.tables.iter_mut().find(|t| t.name == spec.name) {
            Some(existing) => *existing = spec,
            None => self.tables.push(spec),
        }
    }

    /// Builder method to add a table.
    pub fn with_table(mut self, spec: TableSpec) -> Self {
        self.add_table(spec);
        self
    }

    /// Look up a syncable table.
    pub fn table(&self, name: &str) -> Result<&TableSpec> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| Error::UnknownTable(name.to_string()))
    }

    /// Tables in merge order.
    pub fn tables(&self) -> impl Iterator<Item = &TableSpec> {
        self.tables.iter()
    }

    pub fn table_names(&self) -> Vec<TableName> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
