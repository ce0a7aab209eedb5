//! Manifest model: changelog entries, execution batches and ledger rows.

use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// The body of a changelog entry, discriminated by its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSet {
    /// Raw SQL scripts.
    Sql {
        /// Script applied on `up`.
        up: String,
        /// Script applied on rollback. `None` when the manifest declares no down file.
        down: Option<String>,
    },
}

impl ChangeSet {
    /// The kind string recorded in the ledger.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sql { .. } => "sql",
        }
    }

    /// The up script.
    pub fn up_script(&self) -> &str {
        match self {
            Self::Sql { up, .. } => up,
        }
    }

    /// The down script, if one was declared with a non-blank body.
    pub fn down_script(&self) -> Option<&str> {
        match self {
            Self::Sql { down, .. } => down.as_deref().filter(|s| !s.trim().is_empty()),
        }
    }
}

/// One versioned schema-change unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangelogEntry {
    /// Manifest-unique identifier with a numeric ordering prefix.
    pub id: String,
    /// Author attribute.
    pub author: String,
    /// Free-form labels attribute.
    pub labels: String,
    /// Whether each script runs inside its own transaction.
    pub transactional: bool,
    /// Scripts.
    pub change: ChangeSet,
}

impl ChangelogEntry {
    /// Create a SQL entry with default attributes.
    pub fn sql(id: impl Into<String>, up: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            author: "unknown".to_string(),
            labels: "unknown".to_string(),
            transactional: true,
            change: ChangeSet::Sql {
                up: up.into(),
                down: None,
            },
        }
    }

    /// Set the down script.
    pub fn with_down(mut self, script: impl Into<String>) -> Self {
        match &mut self.change {
            ChangeSet::Sql { down, .. } => *down = Some(script.into()),
        }
        self
    }

    /// Set the author.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    /// Set the labels.
    pub fn with_labels(mut self, labels: impl Into<String>) -> Self {
        self.labels = labels.into();
        self
    }

    /// Mark the entry as non-transactional.
    pub fn non_transactional(mut self) -> Self {
        self.transactional = false;
        self
    }

    /// The kind string recorded in the ledger.
    pub fn kind(&self) -> &'static str {
        self.change.kind()
    }

    /// Ledger metadata for this entry.
    pub fn meta(&self) -> Meta {
        Meta {
            author: self.author.clone(),
            labels: self.labels.clone(),
            kind: self.kind().to_string(),
            transactional: self.transactional,
        }
    }

    /// The batch this entry routes to.
    pub fn batch_kind(&self) -> BatchKind {
        BatchKind::from_transactional(self.transactional)
    }
}

/// Metadata columns synchronised onto a ledger row after a batch runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub author: String,
    pub labels: String,
    pub kind: String,
    pub transactional: bool,
}

/// Which of the two per-run batches an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchKind {
    /// Each entry runs inside its own transaction.
    Transactional,
    /// Entries run without a transaction.
    NonTransactional,
}

impl BatchKind {
    /// Route by the resolved `transactional` flag.
    pub fn from_transactional(transactional: bool) -> Self {
        if transactional {
            Self::Transactional
        } else {
            Self::NonTransactional
        }
    }

    /// Short name used in lock names and messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transactional => "tx",
            Self::NonTransactional => "notx",
        }
    }

    /// Whether scripts of this batch are wrapped in a transaction.
    pub fn is_transactional(&self) -> bool {
        matches!(self, Self::Transactional)
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => f.write_str("up"),
            Self::Down => f.write_str("down"),
        }
    }
}

/// An ordered sequence of entries sharing one `transactional` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionBatch {
    kind: BatchKind,
    entries: Vec<ChangelogEntry>,
    metas: IndexMap<String, Meta>,
}

impl ExecutionBatch {
    /// Create an empty batch.
    pub fn new(kind: BatchKind) -> Self {
        Self {
            kind,
            entries: Vec::new(),
            metas: IndexMap::new(),
        }
    }

    /// Append an entry, recording its metadata.
    ///
    /// Callers route entries by [`ChangelogEntry::batch_kind`]; the order of
    /// pushes is the execution order.
    pub fn push(&mut self, entry: ChangelogEntry) {
        debug_assert_eq!(entry.batch_kind(), self.kind);
        self.metas.insert(entry.id.clone(), entry.meta());
        self.entries.push(entry);
    }

    /// Batch kind.
    pub fn kind(&self) -> BatchKind {
        self.kind
    }

    /// Entries in execution order.
    pub fn entries(&self) -> &[ChangelogEntry] {
        &self.entries
    }

    /// Entry ID to metadata, in execution order.
    pub fn metas(&self) -> &IndexMap<String, Meta> {
        &self.metas
    }

    /// Position of an entry in the batch.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    /// Whether the batch contains an entry with this ID.
    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A loaded manifest, partitioned into its two batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub transactional: ExecutionBatch,
    pub non_transactional: ExecutionBatch,
}

impl Manifest {
    /// Build a manifest from already-ordered entries.
    pub fn from_entries(entries: impl IntoIterator<Item = ChangelogEntry>) -> Self {
        let mut manifest = Self {
            transactional: ExecutionBatch::new(BatchKind::Transactional),
            non_transactional: ExecutionBatch::new(BatchKind::NonTransactional),
        };
        for entry in entries {
            manifest.batch_mut(entry.batch_kind()).push(entry);
        }
        manifest
    }

    /// Batches in execution order: transactional first.
    pub fn batches(&self) -> [&ExecutionBatch; 2] {
        [&self.transactional, &self.non_transactional]
    }

    fn batch_mut(&mut self, kind: BatchKind) -> &mut ExecutionBatch {
        match kind {
            BatchKind::Transactional => &mut self.transactional,
            BatchKind::NonTransactional => &mut self.non_transactional,
        }
    }

    /// All entries, transactional batch first.
    pub fn entries(&self) -> impl Iterator<Item = &ChangelogEntry> {
        self.transactional
            .entries()
            .iter()
            .chain(self.non_transactional.entries())
    }

    /// Whether any batch contains this ID.
    pub fn contains(&self, id: &str) -> bool {
        self.transactional.contains(id) || self.non_transactional.contains(id)
    }

    /// Total number of entries.
    pub fn len(&self) -> usize {
        self.transactional.len() + self.non_transactional.len()
    }

    /// Whether the manifest has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A ledger row. Present iff the entry is applied and not rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Entry ID (primary key).
    pub id: String,
    /// When the entry was applied.
    pub applied_at: DateTime<Utc>,
    pub author: String,
    pub labels: String,
    pub kind: Option<String>,
    pub transactional: bool,
}

impl MigrationRecord {
    /// A freshly inserted row: only the ID is known, the rest are column defaults.
    pub fn new(id: impl Into<String>, applied_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            applied_at,
            author: "unknown".to_string(),
            labels: "unknown".to_string(),
            kind: None,
            transactional: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_kind_routing() {
        assert_eq!(BatchKind::from_transactional(true), BatchKind::Transactional);
        assert_eq!(BatchKind::from_transactional(false), BatchKind::NonTransactional);
        assert_eq!(BatchKind::Transactional.to_string(), "tx");
        assert_eq!(BatchKind::NonTransactional.to_string(), "notx");
    }

    #[test]
    fn test_manifest_partitions_by_flag() {
        let manifest = Manifest::from_entries(vec![
            ChangelogEntry::sql("001_init", "CREATE TABLE a();"),
            ChangelogEntry::sql("002_index", "CREATE INDEX CONCURRENTLY i ON a(x);").non_transactional(),
            ChangelogEntry::sql("003_more", "ALTER TABLE a ADD b int;"),
        ]);

        let tx: Vec<_> = manifest.transactional.entries().iter().map(|e| e.id.as_str()).collect();
        let notx: Vec<_> = manifest.non_transactional.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(tx, vec!["001_init", "003_more"]);
        assert_eq!(notx, vec!["002_index"]);
        assert_eq!(manifest.len(), 3);
        assert!(manifest.contains("002_index"));
        assert!(!manifest.contains("004"));
    }

    #[test]
    fn test_blank_down_script_counts_as_missing() {
        assert_eq!(ChangelogEntry::sql("001", "SELECT 1").with_down("").change.down_script(), None);
        assert_eq!(
            ChangelogEntry::sql("001", "SELECT 1").with_down(" \n\t").change.down_script(),
            None
        );
        assert_eq!(
            ChangelogEntry::sql("001", "SELECT 1").with_down("DROP TABLE a;").change.down_script(),
            Some("DROP TABLE a;")
        );
    }

    #[test]
    fn test_batch_metas_parallel_entries() {
        let mut batch = ExecutionBatch::new(BatchKind::Transactional);
        batch.push(ChangelogEntry::sql("001", "SELECT 1").with_author("a").with_labels("l"));

        let meta = &batch.metas()["001"];
        assert_eq!(meta.author, "a");
        assert_eq!(meta.labels, "l");
        assert_eq!(meta.kind, "sql");
        assert!(meta.transactional);
        assert_eq!(batch.position("001"), Some(0));
    }

    #[test]
    fn test_change_set_scripts() {
        let entry = ChangelogEntry::sql("001", "up").with_down("down");
        assert_eq!(entry.change.up_script(), "up");
        assert_eq!(entry.change.down_script(), Some("down"));
        assert_eq!(ChangelogEntry::sql("002", "up").change.down_script(), None);
    }
}
