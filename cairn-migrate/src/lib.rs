//! # cairn-migrate
//!
//! Changelog-driven migration engine.
//!
//! This crate provides functionality for:
//! - Loading an ordered changelog manifest and resolving its SQL scripts
//! - Partitioning entries into a transactional and a non-transactional batch
//! - Tracking applied entries in a ledger table that upgrades itself in place
//! - Serialising concurrent runs with backend advisory locks, one per batch
//! - Moving the applied frontier with `up`, `down`, `to` and `redo`
//! - Reporting status (including drift) and history
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────────┐     ┌──────────────────┐
//! │ changelog    │────▶│ ManifestLoader │────▶│ Manifest         │
//! │ .toml + .sql │     └────────────────┘     │ (tx, notx)       │
//! └──────────────┘                            └──────────────────┘
//!                                                      │
//!                                                      ▼
//! ┌──────────────┐     ┌────────────────┐     ┌──────────────────┐
//! │ Dialect      │────▶│ TrackingStore  │◀────│ MigrationEngine  │
//! │ (pg, mysql)  │     │ + Connection   │     │ + LockCoordinator│
//! └──────────────┘     └────────────────┘     └──────────────────┘
//! ```
//!
//! Each batch runs as lock → action → metadata sync → unlock, the
//! transactional batch first. An empty batch takes no lock.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cairn_migrate::{DatabaseConfig, ManifestLoader, MigrationEngine, driver};
//!
//! async fn run() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DatabaseConfig::builder()
//!         .driver("postgres")
//!         .host("localhost")
//!         .database("app")
//!         .username("app")
//!         .build()?;
//!
//!     let manifest = ManifestLoader::load_file("migrations/changelog.toml").await?;
//!     let store = driver::open_store(&config).await?;
//!
//!     let engine = MigrationEngine::new(store, manifest, config.lock_coordinator());
//!     engine.initialize().await?;
//!
//!     let outcome = engine.up().await?;
//!     println!("{}", outcome.summary());
//!     Ok(())
//! }
//! ```
//!
//! ## Manifest
//!
//! ```toml
//! [[changelog]]
//! id = "001_init"
//! kind = "sql"
//! author = "alice"
//! labels = "bootstrap"
//! include = { file = "sql/001_up.sql", relative_to_changelog_file = true }
//! include_down = { file = "sql/001_down.sql", relative_to_changelog_file = true }
//! ```
//!
//! Entries are ordered by the number before the first `_` in their ID.

pub mod config;
pub mod connection;
pub mod dialect;
pub mod driver;
pub mod engine;
pub mod error;
pub mod lock;
pub mod manifest;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod model;
pub mod report;
pub mod store;

pub use config::{DatabaseConfig, DatabaseConfigBuilder};
pub use connection::{Connection, SqlValue, Statement};
pub use dialect::{Dialect, Driver, LedgerColumn, MySqlDialect, PostgresDialect, TableRef};
pub use engine::{Action, BatchOutcome, MigrationEngine, RunOutcome};
pub use error::{MigrateResult, MigrationError};
pub use lock::{LockCoordinator, LockToken};
pub use manifest::{ChangelogDocument, ChangelogNode, ManifestLoader, ScriptRef};
pub use model::{
    BatchKind, ChangeSet, ChangelogEntry, Direction, ExecutionBatch, Manifest, Meta,
    MigrationRecord,
};
pub use report::{EntryState, StatusEntry, StatusReport};
pub use store::{SqlTrackingStore, TrackingStore};
