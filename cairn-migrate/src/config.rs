//! Database configuration, built once at startup and passed to every component.

use std::collections::BTreeMap;

use url::Url;

use crate::dialect::{DEFAULT_TABLE_NAME, Dialect, Driver, TableRef};
use crate::error::{MigrateResult, MigrationError};
use crate::lock::{DEFAULT_LOCK_PREFIX, LockCoordinator};

/// Default schema.
pub const DEFAULT_SCHEMA: &str = "public";

/// Default `GET_LOCK` wait in seconds.
pub const DEFAULT_LOCK_WAIT_SECS: i64 = 10;

/// Connection and ledger settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub driver: Driver,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: Option<String>,
    /// Schema holding the ledger table. Ignored by backends without schemas.
    pub schema: String,
    pub ssl_mode: Option<String>,
    /// Extra driver parameters appended to the connection string.
    pub params: BTreeMap<String, String>,
    pub table_name: String,
    pub lock_wait_secs: i64,
    pub lock_prefix: String,
}

impl DatabaseConfig {
    /// Start building a configuration.
    pub fn builder() -> DatabaseConfigBuilder {
        DatabaseConfigBuilder::default()
    }

    /// The ledger table.
    pub fn table(&self) -> TableRef {
        TableRef::new(&self.schema, &self.table_name)
    }

    /// The dialect for the configured driver.
    pub fn dialect(&self) -> Box<dyn Dialect> {
        self.driver.dialect(self.lock_wait_secs)
    }

    /// Lock coordinator scoped to the configured schema.
    pub fn lock_coordinator(&self) -> LockCoordinator {
        LockCoordinator::new(&self.lock_prefix, &self.schema)
    }

    /// libpq key/value connection string.
    pub fn postgres_dsn(&self) -> String {
        let mut parts = vec![
            format!("host={}", quote_dsn_value(&self.host)),
            format!("port={}", self.port),
            format!("dbname={}", quote_dsn_value(&self.database)),
        ];
        if !self.username.is_empty() {
            parts.push(format!("user={}", quote_dsn_value(&self.username)));
        }
        if let Some(password) = &self.password {
            parts.push(format!("password={}", quote_dsn_value(password)));
        }
        if let Some(ssl_mode) = &self.ssl_mode {
            parts.push(format!("sslmode={}", quote_dsn_value(ssl_mode)));
        }
        for (key, value) in &self.params {
            parts.push(format!("{}={}", key, quote_dsn_value(value)));
        }
        parts.join(" ")
    }

    /// `mysql://` URL with percent-encoded credentials.
    pub fn mysql_url(&self) -> MigrateResult<String> {
        let mut url = Url::parse(&format!("mysql://{}", self.host))
            .map_err(|e| MigrationError::config(format!("invalid host '{}': {}", self.host, e)))?;
        url.set_port(Some(self.port))
            .map_err(|_| MigrationError::config("cannot set port on MySQL URL"))?;
        if !self.username.is_empty() {
            url.set_username(&self.username)
                .map_err(|_| MigrationError::config("cannot set username on MySQL URL"))?;
        }
        if let Some(password) = &self.password {
            url.set_password(Some(password))
                .map_err(|_| MigrationError::config("cannot set password on MySQL URL"))?;
        }
        url.set_path(&format!("/{}", self.database));
        if !self.params.is_empty() {
            url.query_pairs_mut().extend_pairs(self.params.iter());
        }
        Ok(url.into())
    }
}

fn quote_dsn_value(value: &str) -> String {
    if !value.is_empty() && !value.contains([' ', '\'', '\\']) {
        return value.to_string();
    }
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Builder for [`DatabaseConfig`].
#[derive(Debug, Clone, Default)]
pub struct DatabaseConfigBuilder {
    driver: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    database: Option<String>,
    username: Option<String>,
    password: Option<String>,
    schema: Option<String>,
    ssl_mode: Option<String>,
    params: BTreeMap<String, String>,
    table_name: Option<String>,
    lock_wait_secs: Option<i64>,
    lock_prefix: Option<String>,
}

impl DatabaseConfigBuilder {
    /// Set the driver name (`postgres`, `postgresql` or `mysql`).
    pub fn driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = Some(driver.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the ledger schema. Empty means the default.
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn ssl_mode(mut self, ssl_mode: impl Into<String>) -> Self {
        self.ssl_mode = Some(ssl_mode.into());
        self
    }

    /// Add a driver parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Set the ledger table name.
    pub fn table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    /// Set how long MySQL waits for a lock.
    pub fn lock_wait_secs(mut self, secs: i64) -> Self {
        self.lock_wait_secs = Some(secs);
        self
    }

    /// Set the lock name prefix.
    pub fn lock_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.lock_prefix = Some(prefix.into());
        self
    }

    /// Validate and build. Checks the driver, then host, port and database.
    pub fn build(self) -> MigrateResult<DatabaseConfig> {
        let driver: Driver = self.driver.as_deref().unwrap_or("postgres").parse()?;

        let host = self.host.unwrap_or_default();
        if host.trim().is_empty() {
            return Err(MigrationError::config("host is required"));
        }
        let port = self.port.unwrap_or_else(|| default_port(driver));
        if port == 0 {
            return Err(MigrationError::config("port must be non-zero"));
        }
        let database = self.database.unwrap_or_default();
        if database.trim().is_empty() {
            return Err(MigrationError::config("database name is required"));
        }

        let lock_wait_secs = self.lock_wait_secs.unwrap_or(DEFAULT_LOCK_WAIT_SECS);
        if lock_wait_secs < 0 {
            return Err(MigrationError::config("lock wait must not be negative"));
        }

        Ok(DatabaseConfig {
            driver,
            host,
            port,
            database,
            username: self.username.unwrap_or_default(),
            password: self.password.filter(|p| !p.is_empty()),
            schema: non_empty_or(self.schema, DEFAULT_SCHEMA),
            ssl_mode: self.ssl_mode.filter(|s| !s.is_empty()),
            params: self.params,
            table_name: non_empty_or(self.table_name, DEFAULT_TABLE_NAME),
            lock_wait_secs,
            lock_prefix: non_empty_or(self.lock_prefix, DEFAULT_LOCK_PREFIX),
        })
    }
}

/// Default port for a driver.
pub fn default_port(driver: Driver) -> u16 {
    match driver {
        Driver::Postgres => 5432,
        Driver::MySql => 3306,
    }
}

fn non_empty_or(value: Option<String>, default: &str) -> String {
    value
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}
