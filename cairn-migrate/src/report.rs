//! Status and history reporting.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::MigrateResult;
use crate::model::{BatchKind, Manifest, MigrationRecord};
use crate::store::TrackingStore;

/// Whether a manifest entry has a ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Applied at the given time.
    Applied(DateTime<Utc>),
    /// Not yet applied.
    Pending,
}

impl EntryState {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// One manifest entry in a status report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub id: String,
    pub batch: BatchKind,
    pub state: EntryState,
}

/// Manifest entries against the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    /// Manifest entries, transactional batch first.
    pub entries: Vec<StatusEntry>,
    /// Ledger rows whose ID is not in the manifest.
    pub drift: Vec<MigrationRecord>,
}

impl StatusReport {
    /// Number of applied manifest entries.
    pub fn applied_count(&self) -> usize {
        self.entries.iter().filter(|e| e.state.is_applied()).count()
    }

    /// Number of pending manifest entries.
    pub fn pending_count(&self) -> usize {
        self.entries.len() - self.applied_count()
    }

    /// Whether any ledger row is missing from the manifest.
    pub fn has_drift(&self) -> bool {
        !self.drift.is_empty()
    }

    /// Get a summary of the report.
    pub fn summary(&self) -> String {
        let mut parts = vec![
            format!("{} applied", self.applied_count()),
            format!("{} pending", self.pending_count()),
        ];
        if self.has_drift() {
            parts.push(format!("{} drifted", self.drift.len()));
        }
        parts.join(", ")
    }
}

/// Compare the manifest with the ledger. Read-only.
pub async fn status<S: TrackingStore + ?Sized>(
    store: &S,
    manifest: &Manifest,
) -> MigrateResult<StatusReport> {
    let rows = store.applied().await?;
    let applied: HashMap<&str, DateTime<Utc>> =
        rows.iter().map(|r| (r.id.as_str(), r.applied_at)).collect();

    let entries = manifest
        .entries()
        .map(|entry| StatusEntry {
            id: entry.id.clone(),
            batch: entry.batch_kind(),
            state: match applied.get(entry.id.as_str()) {
                Some(at) => EntryState::Applied(*at),
                None => EntryState::Pending,
            },
        })
        .collect();

    let drift: Vec<MigrationRecord> = rows
        .iter()
        .filter(|r| !manifest.contains(&r.id))
        .cloned()
        .collect();
    for row in &drift {
        warn!(id = %row.id, applied_at = %row.applied_at, "Ledger row has no manifest entry");
    }

    Ok(StatusReport { entries, drift })
}

/// Ledger rows, oldest first. Read-only.
pub async fn history<S: TrackingStore + ?Sized>(store: &S) -> MigrateResult<Vec<MigrationRecord>> {
    store.applied().await
}
