//! Migration engine: drives up/down/to/redo over the two batches of a manifest.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use tracing::{info, warn};

use crate::error::{MigrateResult, MigrationError};
use crate::lock::LockCoordinator;
use crate::model::{BatchKind, ChangelogEntry, ExecutionBatch, Manifest, Meta, MigrationRecord};
use crate::report::{self, StatusReport};
use crate::store::{TrackingStore, sync_metadata};

/// What a run should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Apply every pending entry.
    Up,
    /// Roll back the last applied entry, or every applied entry above `target`.
    Down { target: Option<String> },
    /// Move the applied frontier to exactly `target`.
    To { target: String },
    /// Roll back the last applied entry, then apply everything pending.
    Redo,
    /// Report applied, pending and drifted entries.
    Status,
    /// List ledger rows chronologically.
    History,
}

impl Action {
    /// Build an action from a command name and optional target ID.
    pub fn from_parts(name: &str, target: Option<String>) -> MigrateResult<Self> {
        let target = target.filter(|t| !t.is_empty());
        match name {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down { target }),
            "to" => target
                .map(|target| Self::To { target })
                .ok_or(MigrationError::TargetRequired),
            "redo" => Ok(Self::Redo),
            "status" => Ok(Self::Status),
            "history" => Ok(Self::History),
            other => Err(MigrationError::config(format!("unknown action '{}'", other))),
        }
    }

    /// Command name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down { .. } => "down",
            Self::To { .. } => "to",
            Self::Redo => "redo",
            Self::Status => "status",
            Self::History => "history",
        }
    }

    /// Target ID, if the action has one.
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Down { target } => target.as_deref(),
            Self::To { target } => Some(target),
            _ => None,
        }
    }

    /// Whether the action leaves the ledger untouched.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::Status | Self::History)
    }
}

impl FromStr for Action {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_parts(s, None)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target() {
            Some(target) => write!(f, "{} {}", self.name(), target),
            None => f.write_str(self.name()),
        }
    }
}

/// What happened to one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Batch kind.
    pub kind: BatchKind,
    /// Entries applied, in order.
    pub applied: Vec<String>,
    /// Entries rolled back, in order.
    pub rolled_back: Vec<String>,
    /// Whether the batch was skipped without taking its lock.
    pub skipped: bool,
}

impl BatchOutcome {
    fn new(kind: BatchKind) -> Self {
        Self {
            kind,
            applied: Vec::new(),
            rolled_back: Vec::new(),
            skipped: false,
        }
    }

    fn skipped(kind: BatchKind) -> Self {
        Self {
            skipped: true,
            ..Self::new(kind)
        }
    }
}

/// Result of a mutating run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutcome {
    /// Per-batch outcomes, transactional first.
    pub batches: Vec<BatchOutcome>,
    /// Total duration in milliseconds.
    pub duration_ms: i64,
}

impl RunOutcome {
    /// IDs applied across both batches.
    pub fn applied(&self) -> Vec<&str> {
        self.batches
            .iter()
            .flat_map(|b| b.applied.iter().map(String::as_str))
            .collect()
    }

    /// IDs rolled back across both batches.
    pub fn rolled_back(&self) -> Vec<&str> {
        self.batches
            .iter()
            .flat_map(|b| b.rolled_back.iter().map(String::as_str))
            .collect()
    }

    /// Check if the run changed the ledger.
    pub fn has_changes(&self) -> bool {
        self.batches
            .iter()
            .any(|b| !b.applied.is_empty() || !b.rolled_back.is_empty())
    }

    /// Get a summary of the result.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        let applied = self.applied().len();
        let rolled_back = self.rolled_back().len();

        if rolled_back > 0 {
            parts.push(format!("{} rolled back", rolled_back));
        }
        if applied > 0 {
            parts.push(format!("{} applied", applied));
        }

        if parts.is_empty() {
            "Nothing to do".to_string()
        } else {
            format!("{} in {}ms", parts.join(", "), self.duration_ms)
        }
    }
}

/// Migration engine over a tracking store.
pub struct MigrationEngine<S> {
    store: S,
    manifest: Manifest,
    locks: LockCoordinator,
}

impl<S: TrackingStore> MigrationEngine<S> {
    /// Create a new engine.
    pub fn new(store: S, manifest: Manifest, locks: LockCoordinator) -> Self {
        Self {
            store,
            manifest,
            locks,
        }
    }

    /// The tracking store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The loaded manifest.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Ensure the ledger table exists with every column.
    pub async fn initialize(&self) -> MigrateResult<()> {
        self.store.ensure_table().await?;
        info!("Ledger table ready");
        Ok(())
    }

    /// Apply every pending entry.
    pub async fn up(&self) -> MigrateResult<RunOutcome> {
        self.run(&Action::Up).await
    }

    /// Roll back the last applied entry, or every applied entry above `target`.
    pub async fn down(&self, target: Option<&str>) -> MigrateResult<RunOutcome> {
        self.run(&Action::Down {
            target: target.map(str::to_string),
        })
        .await
    }

    /// Move the applied frontier to exactly `target`.
    pub async fn to(&self, target: &str) -> MigrateResult<RunOutcome> {
        self.run(&Action::To {
            target: target.to_string(),
        })
        .await
    }

    /// Roll back the last applied entry, then apply everything pending.
    pub async fn redo(&self) -> MigrateResult<RunOutcome> {
        self.run(&Action::Redo).await
    }

    /// Report applied, pending and drifted entries.
    pub async fn status(&self) -> MigrateResult<StatusReport> {
        report::status(&self.store, &self.manifest).await
    }

    /// Ledger rows, oldest first.
    pub async fn history(&self) -> MigrateResult<Vec<MigrationRecord>> {
        report::history(&self.store).await
    }

    /// Run a mutating action over the transactional batch, then the
    /// non-transactional one. Read-only actions return an empty outcome.
    pub async fn run(&self, action: &Action) -> MigrateResult<RunOutcome> {
        let start = Instant::now();
        let mut outcome = RunOutcome::default();

        if action.is_read_only() {
            return Ok(outcome);
        }

        if let Some(target) = action.target() {
            if !self.manifest.contains(target) {
                return Err(MigrationError::TargetNotFound(target.to_string()));
            }
        }

        for batch in self.manifest.batches() {
            outcome.batches.push(self.run_batch(batch, action).await?);
        }

        outcome.duration_ms = start.elapsed().as_millis() as i64;
        Ok(outcome)
    }

    async fn run_batch(&self, batch: &ExecutionBatch, action: &Action) -> MigrateResult<BatchOutcome> {
        let kind = batch.kind();
        if batch.is_empty() {
            return Ok(BatchOutcome::skipped(kind));
        }
        if action.target().is_some_and(|target| !batch.contains(target)) {
            return Ok(BatchOutcome::skipped(kind));
        }

        info!(batch = %kind, action = %action, entries = batch.len(), "Running batch");
        self.locks
            .guarded(&self.store, kind, self.execute_batch(batch, action))
            .await
    }

    /// Action then metadata sync; runs under the batch lock.
    async fn execute_batch(&self, batch: &ExecutionBatch, action: &Action) -> MigrateResult<BatchOutcome> {
        let mut outcome = BatchOutcome::new(batch.kind());

        match action {
            Action::Up => self.migrate(batch, None, &mut outcome).await?,
            Action::Down { target: None } => self.rollback_last(batch, &mut outcome).await?,
            Action::Down {
                target: Some(target),
            } => self.rollback_above(batch, target, &mut outcome).await?,
            Action::To { target } => {
                self.rollback_above(batch, target, &mut outcome).await?;
                self.migrate(batch, Some(target), &mut outcome).await?;
            }
            Action::Redo => {
                self.rollback_last(batch, &mut outcome).await?;
                self.migrate(batch, None, &mut outcome).await?;
            }
            Action::Status | Action::History => {}
        }

        let applied = self.applied_ids().await?;
        let metas: Vec<(&str, &Meta)> = batch
            .metas()
            .iter()
            .filter(|(id, _)| applied.contains(id.as_str()))
            .map(|(id, meta)| (id.as_str(), meta))
            .collect();
        sync_metadata(&self.store, batch.kind(), metas).await?;

        Ok(outcome)
    }

    async fn applied_ids(&self) -> MigrateResult<HashSet<String>> {
        Ok(self
            .store
            .applied()
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect())
    }

    /// Apply pending entries in batch order, up to and including `until`.
    async fn migrate(
        &self,
        batch: &ExecutionBatch,
        until: Option<&str>,
        outcome: &mut BatchOutcome,
    ) -> MigrateResult<()> {
        let applied = self.applied_ids().await?;
        let end = match until {
            Some(target) => batch.position(target).map_or(0, |p| p + 1),
            None => batch.len(),
        };

        for entry in &batch.entries()[..end] {
            if applied.contains(&entry.id) {
                continue;
            }
            self.apply_entry(batch.kind(), entry).await?;
            outcome.applied.push(entry.id.clone());
        }
        Ok(())
    }

    /// Roll back the last applied entry in batch order.
    async fn rollback_last(&self, batch: &ExecutionBatch, outcome: &mut BatchOutcome) -> MigrateResult<()> {
        let applied = self.applied_ids().await?;
        let last = batch.entries().iter().rev().find(|e| applied.contains(&e.id));
        match last {
            Some(entry) => {
                self.revert_entry(batch.kind(), entry).await?;
                outcome.rolled_back.push(entry.id.clone());
            }
            None => info!(batch = %batch.kind(), "Nothing to roll back"),
        }
        Ok(())
    }

    /// Roll back, newest first, every applied entry after `target`. `target` stays applied.
    async fn rollback_above(
        &self,
        batch: &ExecutionBatch,
        target: &str,
        outcome: &mut BatchOutcome,
    ) -> MigrateResult<()> {
        let Some(position) = batch.position(target) else {
            return Ok(());
        };
        let applied = self.applied_ids().await?;

        for entry in batch.entries()[position + 1..].iter().rev() {
            if !applied.contains(&entry.id) {
                continue;
            }
            self.revert_entry(batch.kind(), entry).await?;
            outcome.rolled_back.push(entry.id.clone());
        }
        Ok(())
    }

    async fn apply_entry(&self, kind: BatchKind, entry: &ChangelogEntry) -> MigrateResult<()> {
        let start = Instant::now();
        self.store
            .apply(&entry.id, entry.change.up_script(), kind.is_transactional())
            .await
            .map_err(|e| {
                if !kind.is_transactional() {
                    warn!(id = %entry.id, "Non-transactional entry failed; partial effects may remain");
                }
                MigrationError::ApplyFailed {
                    id: entry.id.clone(),
                    batch: kind,
                    reason: e.to_string(),
                }
            })?;
        info!(id = %entry.id, batch = %kind, duration_ms = start.elapsed().as_millis() as u64, "Applied");
        Ok(())
    }

    async fn revert_entry(&self, kind: BatchKind, entry: &ChangelogEntry) -> MigrateResult<()> {
        let script = entry
            .change
            .down_script()
            .ok_or_else(|| MigrationError::NoDownScript {
                id: entry.id.clone(),
            })?;
        self.store
            .revert(&entry.id, script, kind.is_transactional())
            .await
            .map_err(|e| MigrationError::RollbackFailed {
                id: entry.id.clone(),
                batch: kind,
                reason: e.to_string(),
            })?;
        info!(id = %entry.id, batch = %kind, "Rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::memory::{MemoryDatabase, MemoryStore};

    fn entry(id: &str) -> ChangelogEntry {
        ChangelogEntry::sql(id, format!("up {}", id))
            .with_down(format!("down {}", id))
            .with_author("a")
            .with_labels("l")
    }

    fn two_entries() -> Manifest {
        Manifest::from_entries(vec![entry("001_init"), entry("002_add_col")])
    }

    fn engine(db: &MemoryDatabase, manifest: Manifest) -> MigrationEngine<MemoryStore> {
        MigrationEngine::new(db.session(), manifest, LockCoordinator::new("cairn", "public"))
    }

    #[test]
    fn test_action_from_parts() {
        assert_eq!(Action::from_parts("up", None).unwrap(), Action::Up);
        assert_eq!(
            Action::from_parts("down", Some("001".into())).unwrap(),
            Action::Down {
                target: Some("001".into())
            }
        );
        assert!(matches!(
            Action::from_parts("to", None),
            Err(MigrationError::TargetRequired)
        ));
        assert!(matches!(
            Action::from_parts("to", Some(String::new())),
            Err(MigrationError::TargetRequired)
        ));
        assert!(Action::from_parts("sideways", None).is_err());
        assert!(Action::Status.is_read_only());
        assert_eq!(Action::To { target: "7".into() }.to_string(), "to 7");
    }

    #[tokio::test]
    async fn test_up_applies_all_pending_in_order() {
        let db = MemoryDatabase::new();
        let engine = engine(&db, two_entries());

        let outcome = engine.up().await.unwrap();
        assert_eq!(outcome.applied(), vec!["001_init", "002_add_col"]);
        assert_eq!(db.applied_ids(), vec!["001_init", "002_add_col"]);
        assert_eq!(db.executed(), vec!["up 001_init", "up 002_add_col"]);

        let again = engine.up().await.unwrap();
        assert!(!again.has_changes());
        assert_eq!(again.summary(), "Nothing to do");
    }

    #[tokio::test]
    async fn test_up_syncs_metadata() {
        let db = MemoryDatabase::new();
        let manifest = Manifest::from_entries(vec![
            entry("001_init").with_author("alice").with_labels("bootstrap"),
            entry("002_idx").non_transactional(),
        ]);
        engine(&db, manifest).up().await.unwrap();

        let rows = db.rows();
        assert_eq!(rows[0].author, "alice");
        assert_eq!(rows[0].labels, "bootstrap");
        assert_eq!(rows[0].kind.as_deref(), Some("sql"));
        assert!(rows[0].transactional);
        assert!(!rows[1].transactional);
    }

    #[tokio::test]
    async fn test_down_without_target_rolls_back_one() {
        let db = MemoryDatabase::new();
        let engine = engine(&db, two_entries());
        engine.up().await.unwrap();

        let outcome = engine.down(None).await.unwrap();
        assert_eq!(outcome.rolled_back(), vec!["002_add_col"]);
        assert_eq!(db.applied_ids(), vec!["001_init"]);
    }

    #[tokio::test]
    async fn test_down_with_nothing_applied_is_noop() {
        let db = MemoryDatabase::new();
        let outcome = engine(&db, two_entries()).down(None).await.unwrap();
        assert!(!outcome.has_changes());
        assert!(db.executed().is_empty());
    }

    #[tokio::test]
    async fn test_down_to_target_keeps_target() {
        let db = MemoryDatabase::new();
        let manifest = Manifest::from_entries(vec![
            entry("001_a"),
            entry("002_b"),
            entry("003_c"),
            entry("004_d"),
        ]);
        let engine = engine(&db, manifest);
        engine.up().await.unwrap();

        let outcome = engine.down(Some("002_b")).await.unwrap();
        assert_eq!(outcome.rolled_back(), vec!["004_d", "003_c"]);
        assert_eq!(db.applied_ids(), vec!["001_a", "002_b"]);
    }

    #[tokio::test]
    async fn test_to_rolls_back_or_forward() {
        let db = MemoryDatabase::new();
        let manifest = Manifest::from_entries(vec![entry("001_a"), entry("002_b"), entry("003_c")]);
        let engine = engine(&db, manifest);

        let outcome = engine.to("002_b").await.unwrap();
        assert_eq!(outcome.applied(), vec!["001_a", "002_b"]);
        assert_eq!(db.applied_ids(), vec!["001_a", "002_b"]);

        engine.up().await.unwrap();
        let outcome = engine.to("001_a").await.unwrap();
        assert_eq!(outcome.rolled_back(), vec!["003_c", "002_b"]);
        assert_eq!(db.applied_ids(), vec!["001_a"]);
    }

    #[tokio::test]
    async fn test_to_matches_down_example() {
        let db = MemoryDatabase::new();
        let engine = engine(&db, two_entries());
        engine.up().await.unwrap();

        engine.to("001_init").await.unwrap();
        assert_eq!(db.applied_ids(), vec!["001_init"]);
    }

    #[tokio::test]
    async fn test_unknown_target_fails_before_sql() {
        let db = MemoryDatabase::new();
        let err = engine(&db, two_entries()).to("999_missing").await.unwrap_err();
        assert!(matches!(err, MigrationError::TargetNotFound(ref id) if id == "999_missing"));
        assert!(db.executed().is_empty());
        assert_eq!(db.max_concurrent_holders("cairn:public:tx"), 0);
    }

    #[tokio::test]
    async fn test_redo_reapplies_last() {
        let db = MemoryDatabase::new();
        let engine = engine(&db, two_entries());
        engine.up().await.unwrap();

        let outcome = engine.redo().await.unwrap();
        assert_eq!(outcome.rolled_back(), vec!["002_add_col"]);
        assert_eq!(outcome.applied(), vec!["002_add_col"]);
        assert_eq!(db.applied_ids(), vec!["001_init", "002_add_col"]);
        assert_eq!(
            db.executed(),
            vec!["up 001_init", "up 002_add_col", "down 002_add_col", "up 002_add_col"]
        );
    }

    #[tokio::test]
    async fn test_up_stops_at_first_failure() {
        let db = MemoryDatabase::new();
        db.fail_script("up 002_b");
        let manifest = Manifest::from_entries(vec![entry("001_a"), entry("002_b"), entry("003_c")]);

        let err = engine(&db, manifest).up().await.unwrap_err();
        match err {
            MigrationError::ApplyFailed { id, batch, .. } => {
                assert_eq!(id, "002_b");
                assert_eq!(batch, BatchKind::Transactional);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(db.applied_ids(), vec!["001_a"]);
        assert!(db.held_locks().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_without_down_script() {
        let db = MemoryDatabase::new();
        let manifest = Manifest::from_entries(vec![ChangelogEntry::sql("001_a", "up 001_a")]);
        let engine = engine(&db, manifest);
        engine.up().await.unwrap();

        let err = engine.down(None).await.unwrap_err();
        assert!(matches!(err, MigrationError::NoDownScript { ref id } if id == "001_a"));
        assert_eq!(db.applied_ids(), vec!["001_a"]);
    }

    #[tokio::test]
    async fn test_rollback_with_blank_down_script() {
        let db = MemoryDatabase::new();
        let manifest = Manifest::from_entries(vec![
            ChangelogEntry::sql("001_a", "up 001_a").with_down(""),
            ChangelogEntry::sql("002_b", "up 002_b").with_down("  \n"),
        ]);
        let engine = engine(&db, manifest);
        engine.up().await.unwrap();

        let err = engine.down(None).await.unwrap_err();
        assert!(matches!(err, MigrationError::NoDownScript { ref id } if id == "002_b"));
        assert_eq!(db.applied_ids(), vec!["001_a", "002_b"]);
        assert!(db.held_locks().is_empty());
    }

    #[tokio::test]
    async fn test_non_transactional_failure_keeps_earlier_work() {
        let db = MemoryDatabase::new();
        db.fail_script("up 004_idx");
        let manifest = Manifest::from_entries(vec![
            entry("001_table"),
            entry("002_col"),
            entry("003_idx").non_transactional(),
            entry("004_idx").non_transactional(),
            entry("005_idx").non_transactional(),
        ]);

        let err = engine(&db, manifest).up().await.unwrap_err();
        match err {
            MigrationError::ApplyFailed { id, batch, .. } => {
                assert_eq!(id, "004_idx");
                assert_eq!(batch, BatchKind::NonTransactional);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert_eq!(db.applied_ids(), vec!["001_table", "002_col", "003_idx"]);
        assert_eq!(db.executed(), vec!["up 001_table", "up 002_col", "up 003_idx"]);
        assert!(db.rows()[..2].iter().all(|r| r.author == "a"));
        assert!(db.held_locks().is_empty());
        assert_eq!(db.max_concurrent_holders("cairn:public:notx"), 1);
    }

    #[tokio::test]
    async fn test_rollback_failure_is_attributed() {
        let db = MemoryDatabase::new();
        db.fail_script("down 002_add_col");
        let engine = engine(&db, two_entries());
        engine.up().await.unwrap();

        let err = engine.down(None).await.unwrap_err();
        assert!(matches!(err, MigrationError::RollbackFailed { ref id, .. } if id == "002_add_col"));
        assert!(db.held_locks().is_empty());
    }

    #[tokio::test]
    async fn test_transactional_batch_runs_first() {
        let db = MemoryDatabase::new();
        let manifest = Manifest::from_entries(vec![
            entry("001_idx").non_transactional(),
            entry("002_table"),
        ]);
        let outcome = engine(&db, manifest).up().await.unwrap();

        assert_eq!(outcome.batches[0].kind, BatchKind::Transactional);
        assert_eq!(db.executed(), vec!["up 002_table", "up 001_idx"]);
    }

    #[tokio::test]
    async fn test_empty_batch_takes_no_lock() {
        let db = MemoryDatabase::new();
        let outcome = engine(&db, two_entries()).up().await.unwrap();

        assert!(outcome.batches[1].skipped);
        assert_eq!(db.max_concurrent_holders("cairn:public:tx"), 1);
        assert_eq!(db.max_concurrent_holders("cairn:public:notx"), 0);
    }

    #[tokio::test]
    async fn test_target_outside_batch_leaves_batch_untouched() {
        let db = MemoryDatabase::new();
        let manifest = Manifest::from_entries(vec![
            entry("001_a"),
            entry("002_idx").non_transactional(),
            entry("003_b"),
        ]);
        let engine = engine(&db, manifest);
        engine.up().await.unwrap();

        let outcome = engine.down(Some("001_a")).await.unwrap();
        assert_eq!(outcome.rolled_back(), vec!["003_b"]);
        assert!(outcome.batches[1].skipped);
        assert_eq!(db.applied_ids(), vec!["001_a", "002_idx"]);
    }

    #[tokio::test]
    async fn test_metadata_sync_requires_ledger_row() {
        let db = MemoryDatabase::new();
        // Every metadata update matches zero rows.
        struct LosingStore(MemoryStore);

        #[async_trait::async_trait]
        impl TrackingStore for LosingStore {
            async fn ensure_table(&self) -> MigrateResult<()> {
                self.0.ensure_table().await
            }
            async fn applied(&self) -> MigrateResult<Vec<MigrationRecord>> {
                self.0.applied().await
            }
            async fn apply(&self, id: &str, script: &str, tx: bool) -> MigrateResult<()> {
                self.0.apply(id, script, tx).await
            }
            async fn revert(&self, id: &str, script: &str, tx: bool) -> MigrateResult<()> {
                self.0.revert(id, script, tx).await
            }
            async fn update_metadata(&self, _id: &str, _meta: &crate::model::Meta) -> MigrateResult<u64> {
                Ok(0)
            }
            async fn acquire_lock(&self, name: &str) -> MigrateResult<()> {
                self.0.acquire_lock(name).await
            }
            async fn release_lock(&self, name: &str) -> MigrateResult<()> {
                self.0.release_lock(name).await
            }
        }

        let engine = MigrationEngine::new(
            LosingStore(db.session()),
            two_entries(),
            LockCoordinator::new("cairn", "public"),
        );
        let err = engine.up().await.unwrap_err();
        assert!(matches!(err, MigrationError::MetadataSync { ref id, .. } if id == "001_init"));
        assert!(db.held_locks().is_empty());
    }

    #[tokio::test]
    async fn test_status_and_history_do_not_mutate() {
        let db = MemoryDatabase::new();
        db.seed("000_gone");
        let engine = engine(&db, two_entries());

        let report = engine.status().await.unwrap();
        assert_eq!(report.pending_count(), 2);
        assert!(report.has_drift());
        assert_eq!(engine.history().await.unwrap().len(), 1);
        assert!(!engine.run(&Action::Status).await.unwrap().has_changes());
        assert_eq!(db.applied_ids(), vec!["000_gone"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_runs_are_serialised_per_batch() {
        let db = MemoryDatabase::new();
        let manifest = Manifest::from_entries((1..=5).map(|i| entry(&format!("{:03}_e", i))));
        let first = Arc::new(engine(&db, manifest.clone()));
        let second = Arc::new(engine(&db, manifest));

        let a = tokio::spawn({
            let engine = first.clone();
            async move { engine.up().await }
        });
        let b = tokio::spawn({
            let engine = second.clone();
            async move { engine.up().await }
        });

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();

        assert_eq!(a.applied().len() + b.applied().len(), 5);
        assert_eq!(db.applied_ids().len(), 5);
        assert_eq!(db.max_concurrent_holders("cairn:public:tx"), 1);
    }
}
