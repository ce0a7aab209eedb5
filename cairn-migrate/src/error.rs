//! Error types for the migration engine.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::{BatchKind, Direction};

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur while loading, applying or reporting migrations.
///
/// Every variant aborts the current run. Nothing in the engine retries.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database operation error.
    #[error("Database error: {0}")]
    Database(String),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The manifest document could not be read or parsed.
    #[error("Invalid manifest: {0}")]
    Manifest(String),

    /// A mandatory changelog attribute is empty or absent.
    #[error("{id}: missing <{field}>")]
    MissingField {
        /// Entry ID (empty when the ID itself is missing).
        id: String,
        /// Name of the missing attribute.
        field: &'static str,
    },

    /// The changelog kind is not one the engine can execute.
    #[error("{id}: unsupported kind={kind}")]
    UnsupportedKind {
        /// Entry ID.
        id: String,
        /// The offending kind string.
        kind: String,
    },

    /// A `sql` entry without an up script reference.
    #[error("{id}: missing <include> up file")]
    MissingScript {
        /// Entry ID.
        id: String,
    },

    /// A referenced script file could not be read.
    #[error("{id} {direction}: failed to read {}: {source}", .path.display())]
    ScriptRead {
        /// Entry ID.
        id: String,
        /// Whether the up or the down script failed.
        direction: Direction,
        /// Resolved path of the script.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The requested target ID is not part of the manifest.
    #[error("Target migration '{0}' not found in manifest")]
    TargetNotFound(String),

    /// The configured driver has no dialect.
    #[error("Unsupported driver: {0}")]
    UnsupportedDriver(String),

    /// Lock acquisition or release failed.
    #[error("Migration lock '{name}' failed: {reason}")]
    LockFailed {
        /// Lock name.
        name: String,
        /// Backend message.
        reason: String,
    },

    /// An up script failed.
    #[error("Failed to apply '{id}' ({batch} batch): {reason}")]
    ApplyFailed {
        /// Entry ID.
        id: String,
        /// Batch the entry belongs to.
        batch: BatchKind,
        /// Backend message.
        reason: String,
    },

    /// A down script failed.
    #[error("Failed to roll back '{id}' ({batch} batch): {reason}")]
    RollbackFailed {
        /// Entry ID.
        id: String,
        /// Batch the entry belongs to.
        batch: BatchKind,
        /// Backend message.
        reason: String,
    },

    /// Metadata could not be attached to a ledger row.
    #[error("Failed to sync metadata for '{id}' ({batch} batch): {reason}")]
    MetadataSync {
        /// Entry ID.
        id: String,
        /// Batch the entry belongs to.
        batch: BatchKind,
        /// What went wrong.
        reason: String,
    },

    /// `to` was requested without a target ID.
    #[error("A target migration ID is required for 'to'")]
    TargetRequired,

    /// Rollback was attempted on an entry with no down script.
    #[error("No down script for '{id}'")]
    NoDownScript {
        /// Entry ID.
        id: String,
    },
}

impl MigrationError {
    /// Create a database error.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a manifest error.
    pub fn manifest(msg: impl Into<String>) -> Self {
        Self::Manifest(msg.into())
    }

    /// Create a lock failed error.
    pub fn lock_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LockFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error was raised while loading the manifest, before any SQL ran.
    pub fn is_load_error(&self) -> bool {
        matches!(
            self,
            Self::Manifest(_)
                | Self::MissingField { .. }
                | Self::UnsupportedKind { .. }
                | Self::MissingScript { .. }
                | Self::ScriptRead { .. }
                | Self::TargetNotFound(_)
        )
    }

    /// The changelog entry this error is attributed to, if any.
    pub fn entry_id(&self) -> Option<&str> {
        match self {
            Self::MissingField { id, .. }
            | Self::UnsupportedKind { id, .. }
            | Self::MissingScript { id }
            | Self::ScriptRead { id, .. }
            | Self::ApplyFailed { id, .. }
            | Self::RollbackFailed { id, .. }
            | Self::MetadataSync { id, .. }
            | Self::NoDownScript { id }
            | Self::TargetNotFound(id) => Some(id.as_str()),
            _ => None,
        }
    }
}
