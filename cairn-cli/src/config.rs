//! CLI configuration handling.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use cairn_migrate::DatabaseConfig;
use cairn_migrate::manifest::MANIFEST_FILE_NAME;

use crate::cli::GlobalArgs;
use crate::error::{CliError, CliResult};

/// Default config file name (lives in project root)
pub const CONFIG_FILE_NAME: &str = "cairn.toml";

/// Default migrations folder (relative to project root)
pub const MIGRATIONS_DIR: &str = "migrations";

/// Cairn CLI configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseSection,

    /// Migration configuration
    pub migrations: MigrationsSection,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load the explicit file, else `cairn.toml` in `cwd` if present, else defaults.
    pub fn discover(cwd: &Path, explicit: Option<&Path>) -> CliResult<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let config_path = cwd.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply command-line and environment overrides.
    pub fn apply_overrides(&mut self, args: &GlobalArgs) {
        let db = &mut self.database;
        if let Some(driver) = &args.driver {
            db.driver = driver.clone();
        }
        if let Some(host) = &args.host {
            db.host = host.clone();
        }
        if let Some(port) = args.port {
            db.port = Some(port);
        }
        if let Some(dbname) = &args.dbname {
            db.dbname = dbname.clone();
        }
        if let Some(user) = &args.user {
            db.user = user.clone();
        }
        if let Some(password) = &args.password {
            db.password = Some(password.clone());
        }
        if let Some(schema) = &args.schema {
            db.schema = schema.clone();
        }
        if let Some(folder) = &args.folder {
            self.migrations.folder = folder.clone();
        }
        if let Some(manifest) = &args.manifest {
            self.migrations.manifest = manifest.clone();
        }
    }

    /// Build the validated database configuration.
    pub fn database_config(&self) -> CliResult<DatabaseConfig> {
        let db = &self.database;
        let mut builder = DatabaseConfig::builder()
            .driver(&db.driver)
            .host(&db.host)
            .database(&db.dbname)
            .username(&db.user)
            .schema(&db.schema)
            .table_name(&self.migrations.table)
            .lock_wait_secs(self.migrations.lock_wait_secs)
            .lock_prefix(&self.migrations.lock_prefix);
        if let Some(port) = db.port {
            builder = builder.port(port);
        }
        if let Some(password) = &db.password {
            builder = builder.password(password);
        }
        if let Some(ssl_mode) = &db.sslmode {
            builder = builder.ssl_mode(ssl_mode);
        }
        for (key, value) in &db.params {
            builder = builder.param(key, value);
        }
        Ok(builder.build()?)
    }

    /// Manifest path, resolved against `cwd` when the folder is relative.
    pub fn manifest_path(&self, cwd: &Path) -> PathBuf {
        let folder = if self.migrations.folder.is_absolute() {
            self.migrations.folder.clone()
        } else {
            cwd.join(&self.migrations.folder)
        };
        folder.join(&self.migrations.manifest)
    }
}

/// `[database]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    /// Driver (postgres, postgresql, mysql)
    pub driver: String,
    pub host: String,
    /// Port; the driver's default when unset
    pub port: Option<u16>,
    pub dbname: String,
    pub user: String,
    pub password: Option<String>,
    /// Schema for the ledger table (PostgreSQL only)
    pub schema: String,
    pub sslmode: Option<String>,
    /// Extra connection parameters
    pub params: BTreeMap<String, String>,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            driver: "postgres".to_string(),
            host: "localhost".to_string(),
            port: None,
            dbname: String::new(),
            user: String::new(),
            password: None,
            schema: "public".to_string(),
            sslmode: None,
            params: BTreeMap::new(),
        }
    }
}

/// `[migrations]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationsSection {
    /// Folder containing the manifest
    pub folder: PathBuf,
    /// Manifest file name
    pub manifest: String,
    /// Ledger table name
    pub table: String,
    /// Seconds MySQL waits for a migration lock
    pub lock_wait_secs: i64,
    /// Prefix of the migration lock names
    pub lock_prefix: String,
}

impl Default for MigrationsSection {
    fn default() -> Self {
        Self {
            folder: PathBuf::from(MIGRATIONS_DIR),
            manifest: MANIFEST_FILE_NAME.to_string(),
            table: "schema_migrations".to_string(),
            lock_wait_secs: 10,
            lock_prefix: "cairn".to_string(),
        }
    }
}
