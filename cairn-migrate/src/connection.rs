//! The SQL execution seam between the engine and a concrete database driver.

use async_trait::async_trait;

use crate::error::MigrateResult;
use crate::model::MigrationRecord;

/// A bound parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Text(String),
    Bool(bool),
    Int(i64),
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// SQL text plus positional parameters, already in the dialect's placeholder style.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    /// A statement without parameters.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// A statement with parameters.
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// One database session.
///
/// Advisory locks are session scoped, so every call on a `Connection` must run on
/// the same underlying session.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a statement and return the number of affected rows.
    async fn execute(&self, stmt: &Statement) -> MigrateResult<u64>;

    /// Run a query returning a single integer cell. `None` for SQL NULL or no row.
    async fn query_scalar(&self, stmt: &Statement) -> MigrateResult<Option<i64>>;

    /// Run a query and collect its first column as strings.
    async fn query_column(&self, stmt: &Statement) -> MigrateResult<Vec<String>>;

    /// Run a ledger query selecting
    /// `id, applied_at, author, labels, kind, transactional` in that order.
    async fn query_records(&self, stmt: &Statement) -> MigrateResult<Vec<MigrationRecord>>;

    /// Run a schema-change script followed by its ledger bookkeeping statement.
    ///
    /// With `transactional` both run inside one transaction that is rolled back if
    /// either fails. Without it they run as-is and a failure mid-script leaves
    /// whatever the script already did.
    async fn run_script(
        &self,
        script: &str,
        bookkeeping: &Statement,
        transactional: bool,
    ) -> MigrateResult<()>;
}

#[async_trait]
impl<C: Connection + ?Sized> Connection for Box<C> {
    async fn execute(&self, stmt: &Statement) -> MigrateResult<u64> {
        (**self).execute(stmt).await
    }

    async fn query_scalar(&self, stmt: &Statement) -> MigrateResult<Option<i64>> {
        (**self).query_scalar(stmt).await
    }

    async fn query_column(&self, stmt: &Statement) -> MigrateResult<Vec<String>> {
        (**self).query_column(stmt).await
    }

    async fn query_records(&self, stmt: &Statement) -> MigrateResult<Vec<MigrationRecord>> {
        (**self).query_records(stmt).await
    }

    async fn run_script(
        &self,
        script: &str,
        bookkeeping: &Statement,
        transactional: bool,
    ) -> MigrateResult<()> {
        (**self).run_script(script, bookkeeping, transactional).await
    }
}
