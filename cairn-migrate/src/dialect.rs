//! SQL dialects for the ledger table, advisory locks and history queries.
//!
//! Each backend family implements [`Dialect`] once; the tracking store and the
//! lock coordinator only ever talk to the trait.

use std::fmt;
use std::str::FromStr;

use crate::connection::{SqlValue, Statement};
use crate::error::MigrationError;
use crate::model::Meta;

/// Default ledger table name.
pub const DEFAULT_TABLE_NAME: &str = "schema_migrations";

/// Supported database drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Driver {
    Postgres,
    MySql,
}

impl Driver {
    /// Canonical driver name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
        }
    }

    /// Whether the backend qualifies tables with a schema.
    pub fn supports_schemas(&self) -> bool {
        matches!(self, Self::Postgres)
    }

    /// Build the dialect for this driver.
    pub fn dialect(&self, lock_wait_secs: i64) -> Box<dyn Dialect> {
        match self {
            Self::Postgres => Box::new(PostgresDialect),
            Self::MySql => Box::new(MySqlDialect { lock_wait_secs }),
        }
    }
}

impl FromStr for Driver {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" => Ok(Self::MySql),
            _ => Err(MigrationError::UnsupportedDriver(s.to_string())),
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger table location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

/// Columns of the ledger table, in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerColumn {
    Id,
    AppliedAt,
    Author,
    Labels,
    Kind,
    Transactional,
}

impl LedgerColumn {
    /// All columns in table order.
    pub const ALL: [LedgerColumn; 6] = [
        Self::Id,
        Self::AppliedAt,
        Self::Author,
        Self::Labels,
        Self::Kind,
        Self::Transactional,
    ];

    /// Column name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::AppliedAt => "applied_at",
            Self::Author => "author",
            Self::Labels => "labels",
            Self::Kind => "kind",
            Self::Transactional => "transactional",
        }
    }
}

/// Backend-specific SQL.
pub trait Dialect: Send + Sync {
    /// Driver this dialect belongs to.
    fn driver(&self) -> Driver;

    /// Fully qualified, quoted table reference.
    fn qualified_table(&self, table: &TableRef) -> String;

    /// Column type and default clause, without the column name.
    fn column_definition(&self, column: LedgerColumn) -> &'static str;

    /// Positional placeholder for the `n`th parameter (1-based).
    fn placeholder(&self, n: usize) -> String;

    /// Quote an identifier.
    fn quote_ident(&self, ident: &str) -> String;

    /// Query listing the ledger's existing column names.
    fn columns_query(&self, table: &TableRef) -> Statement;

    /// Statement acquiring a named advisory lock; yields `1` on success.
    fn lock_acquire(&self, name: &str) -> Statement;

    /// Statement releasing a named advisory lock; yields `1` on success.
    fn lock_release(&self, name: &str) -> Statement;

    /// `CREATE TABLE IF NOT EXISTS` for the ledger.
    fn table_ddl(&self, table: &TableRef) -> String {
        let columns: Vec<String> = LedgerColumn::ALL
            .iter()
            .map(|c| format!("    {} {}", self.quote_ident(c.name()), self.column_definition(*c)))
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
            self.qualified_table(table),
            columns.join(",\n")
        )
    }

    /// Additive `ALTER TABLE` for one missing column.
    fn add_column(&self, table: &TableRef, column: LedgerColumn) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            self.qualified_table(table),
            self.quote_ident(column.name()),
            self.column_definition(column)
        )
    }

    /// Ledger rows ordered by application time, oldest first.
    fn history_query(&self, table: &TableRef) -> Statement {
        Statement::raw(format!(
            "SELECT {}, {}, {}, {}, {}, {} FROM {} ORDER BY {} ASC, {} ASC",
            self.quote_ident("id"),
            self.applied_at_select(),
            self.quote_ident("author"),
            self.quote_ident("labels"),
            self.quote_ident("kind"),
            self.quote_ident("transactional"),
            self.qualified_table(table),
            self.quote_ident("applied_at"),
            self.quote_ident("id"),
        ))
    }

    /// Select expression for `applied_at` as the driver decodes it.
    fn applied_at_select(&self) -> String {
        self.quote_ident("applied_at")
    }

    /// Insert the bare ledger row for a freshly applied entry.
    fn insert_record(&self, table: &TableRef, id: &str) -> Statement {
        Statement::new(
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.qualified_table(table),
                self.quote_ident("id"),
                self.placeholder(1)
            ),
            vec![id.into()],
        )
    }

    /// Delete the ledger row of a rolled back entry.
    fn delete_record(&self, table: &TableRef, id: &str) -> Statement {
        Statement::new(
            format!(
                "DELETE FROM {} WHERE {} = {}",
                self.qualified_table(table),
                self.quote_ident("id"),
                self.placeholder(1)
            ),
            vec![id.into()],
        )
    }

    /// Update the metadata columns of one row.
    fn update_metadata(&self, table: &TableRef, id: &str, meta: &Meta) -> Statement {
        Statement::new(
            format!(
                "UPDATE {} SET {} = {}, {} = {}, {} = {}, {} = {} WHERE {} = {}",
                self.qualified_table(table),
                self.quote_ident("author"),
                self.placeholder(1),
                self.quote_ident("labels"),
                self.placeholder(2),
                self.quote_ident("kind"),
                self.placeholder(3),
                self.quote_ident("transactional"),
                self.placeholder(4),
                self.quote_ident("id"),
                self.placeholder(5),
            ),
            vec![
                SqlValue::Text(meta.author.clone()),
                SqlValue::Text(meta.labels.clone()),
                SqlValue::Text(meta.kind.clone()),
                SqlValue::Bool(meta.transactional),
                SqlValue::Text(id.to_string()),
            ],
        )
    }
}

/// PostgreSQL and compatible servers.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn driver(&self) -> Driver {
        Driver::Postgres
    }

    fn qualified_table(&self, table: &TableRef) -> String {
        format!("{}.{}", self.quote_ident(&table.schema), self.quote_ident(&table.name))
    }

    fn column_definition(&self, column: LedgerColumn) -> &'static str {
        match column {
            LedgerColumn::Id => "VARCHAR(255) PRIMARY KEY",
            LedgerColumn::AppliedAt => "TIMESTAMPTZ NOT NULL DEFAULT now()",
            LedgerColumn::Author => "VARCHAR(128) NOT NULL DEFAULT 'unknown'",
            LedgerColumn::Labels => "VARCHAR(255) NOT NULL DEFAULT 'unknown'",
            LedgerColumn::Kind => "VARCHAR(32)",
            LedgerColumn::Transactional => "BOOLEAN NOT NULL DEFAULT TRUE",
        }
    }

    fn placeholder(&self, n: usize) -> String {
        format!("${}", n)
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn columns_query(&self, table: &TableRef) -> Statement {
        Statement::new(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema::text = $1 AND table_name::text = $2",
            vec![table.schema.as_str().into(), table.name.as_str().into()],
        )
    }

    fn lock_acquire(&self, name: &str) -> Statement {
        Statement::new(
            "SELECT 1::BIGINT FROM (SELECT pg_advisory_lock(hashtext($1))) AS acquired",
            vec![name.into()],
        )
    }

    fn lock_release(&self, name: &str) -> Statement {
        Statement::new(
            "SELECT pg_advisory_unlock(hashtext($1))::INT::BIGINT",
            vec![name.into()],
        )
    }
}

/// MySQL and MariaDB. Tables are not schema qualified.
#[derive(Debug, Clone, Copy)]
pub struct MySqlDialect {
    /// Seconds `GET_LOCK` waits before giving up.
    pub lock_wait_secs: i64,
}

impl Default for MySqlDialect {
    fn default() -> Self {
        Self { lock_wait_secs: 10 }
    }
}

impl Dialect for MySqlDialect {
    fn driver(&self) -> Driver {
        Driver::MySql
    }

    fn qualified_table(&self, table: &TableRef) -> String {
        self.quote_ident(&table.name)
    }

    fn column_definition(&self, column: LedgerColumn) -> &'static str {
        match column {
            LedgerColumn::Id => "VARCHAR(255) PRIMARY KEY",
            LedgerColumn::AppliedAt => "DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP",
            LedgerColumn::Author => "VARCHAR(128) NOT NULL DEFAULT 'unknown'",
            LedgerColumn::Labels => "VARCHAR(255) NOT NULL DEFAULT 'unknown'",
            LedgerColumn::Kind => "VARCHAR(32)",
            LedgerColumn::Transactional => "BOOLEAN NOT NULL DEFAULT TRUE",
        }
    }

    fn placeholder(&self, _n: usize) -> String {
        "?".to_string()
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn columns_query(&self, table: &TableRef) -> Statement {
        Statement::new(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_schema = DATABASE() AND table_name = ?",
            vec![table.name.as_str().into()],
        )
    }

    fn lock_acquire(&self, name: &str) -> Statement {
        Statement::new(
            "SELECT GET_LOCK(?, ?)",
            vec![name.into(), SqlValue::Int(self.lock_wait_secs)],
        )
    }

    fn lock_release(&self, name: &str) -> Statement {
        Statement::new("SELECT RELEASE_LOCK(?)", vec![name.into()])
    }

    fn applied_at_select(&self) -> String {
        "CAST(UNIX_TIMESTAMP(`applied_at`) AS SIGNED)".to_string()
    }
}
