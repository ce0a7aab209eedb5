//! In-memory tracking store for tests.
//!
//! A [`MemoryDatabase`] plays the server: it owns the ledger rows, the named
//! locks and a log of executed scripts. Each [`MemoryStore`] is one session on
//! it, so two stores over the same database contend for locks the way two
//! processes would.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::OwnedMutexGuard;

use crate::error::{MigrateResult, MigrationError};
use crate::model::{Meta, MigrationRecord};
use crate::store::TrackingStore;

#[derive(Default)]
struct State {
    table_ready: bool,
    rows: Vec<MigrationRecord>,
    ticks: i64,
    executed: Vec<String>,
    failing: HashSet<String>,
    failing_release: HashSet<String>,
    locks: HashMap<String, Arc<tokio::sync::Mutex<()>>>,
    holders: HashMap<String, usize>,
    max_holders: HashMap<String, usize>,
}

/// Shared in-memory "server".
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<State>>,
}

impl MemoryDatabase {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new session.
    pub fn session(&self) -> MemoryStore {
        MemoryStore {
            db: self.clone(),
            held: Mutex::new(HashMap::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every future run of `script` fail.
    pub fn fail_script(&self, script: impl Into<String>) {
        self.state().failing.insert(script.into());
    }

    /// Make releasing the named lock fail.
    pub fn fail_release(&self, name: impl Into<String>) {
        self.state().failing_release.insert(name.into());
    }

    /// Insert a ledger row directly, as if applied by an earlier run.
    pub fn seed(&self, id: impl Into<String>) {
        let mut state = self.state();
        let at = state.next_timestamp();
        state.rows.push(MigrationRecord::new(id, at));
    }

    /// Ledger rows in insertion order.
    pub fn rows(&self) -> Vec<MigrationRecord> {
        self.state().rows.clone()
    }

    /// IDs of the ledger rows in insertion order.
    pub fn applied_ids(&self) -> Vec<String> {
        self.state().rows.iter().map(|r| r.id.clone()).collect()
    }

    /// Scripts that ran successfully, in order.
    pub fn executed(&self) -> Vec<String> {
        self.state().executed.clone()
    }

    /// Whether `ensure_table` has run.
    pub fn table_ready(&self) -> bool {
        self.state().table_ready
    }

    /// The most sessions that ever held the named lock at once.
    pub fn max_concurrent_holders(&self, name: &str) -> usize {
        self.state().max_holders.get(name).copied().unwrap_or(0)
    }

    /// Names of locks currently held by any session.
    pub fn held_locks(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state()
            .holders
            .iter()
            .filter(|(_, n)| **n > 0)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

impl State {
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        self.ticks += 1;
        let epoch = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default();
        epoch + Duration::seconds(self.ticks)
    }

    fn run(&mut self, script: &str) -> MigrateResult<()> {
        if self.failing.contains(script) {
            return Err(MigrationError::database(format!("script failed: {}", script)));
        }
        self.executed.push(script.to_string());
        Ok(())
    }
}

/// One session on a [`MemoryDatabase`].
pub struct MemoryStore {
    db: MemoryDatabase,
    held: Mutex<HashMap<String, OwnedMutexGuard<()>>>,
}

impl MemoryStore {
    /// The database this session is connected to.
    pub fn database(&self) -> &MemoryDatabase {
        &self.db
    }

    fn held(&self) -> MutexGuard<'_, HashMap<String, OwnedMutexGuard<()>>> {
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl TrackingStore for MemoryStore {
    async fn ensure_table(&self) -> MigrateResult<()> {
        self.db.state().table_ready = true;
        Ok(())
    }

    async fn applied(&self) -> MigrateResult<Vec<MigrationRecord>> {
        let mut rows = self.db.rows();
        rows.sort_by(|a, b| a.applied_at.cmp(&b.applied_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn apply(&self, id: &str, script: &str, _transactional: bool) -> MigrateResult<()> {
        let mut state = self.db.state();
        if state.rows.iter().any(|r| r.id == id) {
            return Err(MigrationError::database(format!(
                "duplicate key value violates unique constraint: {}",
                id
            )));
        }
        state.run(script)?;
        let at = state.next_timestamp();
        state.rows.push(MigrationRecord::new(id, at));
        Ok(())
    }

    async fn revert(&self, id: &str, script: &str, _transactional: bool) -> MigrateResult<()> {
        let mut state = self.db.state();
        state.run(script)?;
        state.rows.retain(|r| r.id != id);
        Ok(())
    }

    async fn update_metadata(&self, id: &str, meta: &Meta) -> MigrateResult<u64> {
        let mut state = self.db.state();
        let mut matched = 0;
        for row in state.rows.iter_mut().filter(|r| r.id == id) {
            row.author = meta.author.clone();
            row.labels = meta.labels.clone();
            row.kind = Some(meta.kind.clone());
            row.transactional = meta.transactional;
            matched += 1;
        }
        Ok(matched)
    }

    async fn acquire_lock(&self, name: &str) -> MigrateResult<()> {
        let mutex = self
            .db
            .state()
            .locks
            .entry(name.to_string())
            .or_default()
            .clone();
        let guard = mutex.lock_owned().await;

        {
            let mut state = self.db.state();
            let holders = state.holders.entry(name.to_string()).or_default();
            *holders += 1;
            let now = *holders;
            let max = state.max_holders.entry(name.to_string()).or_default();
            *max = (*max).max(now);
        }
        self.held().insert(name.to_string(), guard);
        Ok(())
    }

    async fn release_lock(&self, name: &str) -> MigrateResult<()> {
        if self.db.state().failing_release.contains(name) {
            return Err(MigrationError::lock_failed(name, "release rejected"));
        }
        let guard = self.held().remove(name);
        match guard {
            Some(guard) => {
                if let Some(n) = self.db.state().holders.get_mut(name) {
                    *n = n.saturating_sub(1);
                }
                drop(guard);
                Ok(())
            }
            None => Err(MigrationError::lock_failed(name, "lock not held by this session")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_apply_revert_round() {
        let db = MemoryDatabase::new();
        let store = db.session();

        store.apply("001", "CREATE TABLE a", true).await.unwrap();
        store.apply("002", "CREATE TABLE b", true).await.unwrap();
        assert_eq!(db.applied_ids(), vec!["001", "002"]);

        store.revert("002", "DROP TABLE b", true).await.unwrap();
        assert_eq!(db.applied_ids(), vec!["001"]);
        assert_eq!(db.executed(), vec!["CREATE TABLE a", "CREATE TABLE b", "DROP TABLE b"]);
    }

    #[tokio::test]
    async fn test_failing_script_leaves_no_row() {
        let db = MemoryDatabase::new();
        db.fail_script("BROKEN");
        let store = db.session();

        assert!(store.apply("001", "BROKEN", true).await.is_err());
        assert!(db.applied_ids().is_empty());
    }

    #[tokio::test]
    async fn test_applied_is_time_ordered() {
        let db = MemoryDatabase::new();
        db.seed("b");
        db.seed("a");
        let rows = db.session().applied().await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert!(rows[0].applied_at < rows[1].applied_at);
    }

    #[tokio::test]
    async fn test_release_without_hold_fails() {
        let db = MemoryDatabase::new();
        let err = db.session().release_lock("x").await.unwrap_err();
        assert!(matches!(err, MigrationError::LockFailed { .. }));
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_across_sessions() {
        let db = MemoryDatabase::new();
        let a = db.session();
        let b = db.session();

        a.acquire_lock("l").await.unwrap();
        let pending = tokio::time::timeout(std::time::Duration::from_millis(50), b.acquire_lock("l")).await;
        assert!(pending.is_err());

        a.release_lock("l").await.unwrap();
        b.acquire_lock("l").await.unwrap();
        assert_eq!(db.max_concurrent_holders("l"), 1);
        assert_eq!(db.held_locks(), vec!["l"]);
    }
}
