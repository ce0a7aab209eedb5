//! Ledger tracking: table bootstrap, applied-set queries, bookkeeping and locks.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::connection::{Connection, Statement};
use crate::dialect::{Dialect, LedgerColumn, TableRef};
use crate::error::{MigrateResult, MigrationError};
use crate::model::{BatchKind, Meta, MigrationRecord};

/// Persistent record of which entries are applied, plus the named locks guarding it.
#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// Create the ledger table if absent and add any missing columns.
    async fn ensure_table(&self) -> MigrateResult<()>;

    /// Ledger rows ordered by application time, oldest first.
    async fn applied(&self) -> MigrateResult<Vec<MigrationRecord>>;

    /// Run an up script and insert its ledger row.
    async fn apply(&self, id: &str, script: &str, transactional: bool) -> MigrateResult<()>;

    /// Run a down script and delete its ledger row.
    async fn revert(&self, id: &str, script: &str, transactional: bool) -> MigrateResult<()>;

    /// Overwrite the metadata columns of one row. Returns the number of rows matched.
    async fn update_metadata(&self, id: &str, meta: &Meta) -> MigrateResult<u64>;

    /// Block until the named lock is held by this session.
    async fn acquire_lock(&self, name: &str) -> MigrateResult<()>;

    /// Release a named lock held by this session.
    async fn release_lock(&self, name: &str) -> MigrateResult<()>;
}

/// [`TrackingStore`] over a live SQL session.
pub struct SqlTrackingStore {
    conn: Box<dyn Connection>,
    dialect: Box<dyn Dialect>,
    table: TableRef,
}

impl SqlTrackingStore {
    /// Create a store for `table` on `conn`.
    pub fn new(conn: Box<dyn Connection>, dialect: Box<dyn Dialect>, table: TableRef) -> Self {
        Self {
            conn,
            dialect,
            table,
        }
    }

    /// The dialect in use.
    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    /// The ledger table.
    pub fn table(&self) -> &TableRef {
        &self.table
    }
}

#[async_trait]
impl TrackingStore for SqlTrackingStore {
    async fn ensure_table(&self) -> MigrateResult<()> {
        let ddl = self.dialect.table_ddl(&self.table);
        self.conn.execute(&Statement::raw(ddl)).await?;

        let existing: Vec<String> = self
            .conn
            .query_column(&self.dialect.columns_query(&self.table))
            .await?
            .into_iter()
            .map(|c| c.to_ascii_lowercase())
            .collect();

        for column in LedgerColumn::ALL {
            if existing.iter().any(|c| c == column.name()) {
                continue;
            }
            info!(table = %self.table.name, column = column.name(), "Adding missing ledger column");
            let sql = self.dialect.add_column(&self.table, column);
            self.conn.execute(&Statement::raw(sql)).await?;
        }

        Ok(())
    }

    async fn applied(&self) -> MigrateResult<Vec<MigrationRecord>> {
        self.conn
            .query_records(&self.dialect.history_query(&self.table))
            .await
    }

    async fn apply(&self, id: &str, script: &str, transactional: bool) -> MigrateResult<()> {
        let insert = self.dialect.insert_record(&self.table, id);
        self.conn.run_script(script, &insert, transactional).await
    }

    async fn revert(&self, id: &str, script: &str, transactional: bool) -> MigrateResult<()> {
        let delete = self.dialect.delete_record(&self.table, id);
        self.conn.run_script(script, &delete, transactional).await
    }

    async fn update_metadata(&self, id: &str, meta: &Meta) -> MigrateResult<u64> {
        self.conn
            .execute(&self.dialect.update_metadata(&self.table, id, meta))
            .await
    }

    async fn acquire_lock(&self, name: &str) -> MigrateResult<()> {
        let result = self
            .conn
            .query_scalar(&self.dialect.lock_acquire(name))
            .await
            .map_err(|e| MigrationError::lock_failed(name, e.to_string()))?;
        match result {
            Some(1) => Ok(()),
            other => Err(MigrationError::lock_failed(
                name,
                format!("lock not granted (result {:?})", other),
            )),
        }
    }

    async fn release_lock(&self, name: &str) -> MigrateResult<()> {
        let result = self
            .conn
            .query_scalar(&self.dialect.lock_release(name))
            .await
            .map_err(|e| MigrationError::lock_failed(name, e.to_string()))?;
        match result {
            Some(1) => Ok(()),
            other => Err(MigrationError::lock_failed(
                name,
                format!("lock not held by this session (result {:?})", other),
            )),
        }
    }
}

/// Attach metadata to one ledger row. A row that does not exist is an error.
pub async fn upsert_metadata<S: TrackingStore + ?Sized>(
    store: &S,
    batch: BatchKind,
    id: &str,
    meta: &Meta,
) -> MigrateResult<()> {
    let rows = store
        .update_metadata(id, meta)
        .await
        .map_err(|e| MigrationError::MetadataSync {
            id: id.to_string(),
            batch,
            reason: e.to_string(),
        })?;
    if rows == 0 {
        return Err(MigrationError::MetadataSync {
            id: id.to_string(),
            batch,
            reason: "no ledger row".to_string(),
        });
    }
    debug!(id, %batch, "Synced ledger metadata");
    Ok(())
}

/// Attach metadata to each listed row in order, stopping at the first failure.
pub async fn sync_metadata<'a, S, I>(store: &S, batch: BatchKind, metas: I) -> MigrateResult<()>
where
    S: TrackingStore + ?Sized,
    I: IntoIterator<Item = (&'a str, &'a Meta)>,
{
    for (id, meta) in metas {
        upsert_metadata(store, batch, id, meta).await?;
    }
    Ok(())
}
