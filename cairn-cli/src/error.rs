//! CLI error types and result alias.

use miette::Diagnostic;
use thiserror::Error;

use cairn_migrate::MigrationError;

/// Result type alias for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// CLI error types
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// IO error
    #[error("IO error: {0}")]
    #[diagnostic(code(cairn::io))]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    #[diagnostic(code(cairn::config))]
    Config(String),

    /// Manifest could not be loaded
    #[error("Manifest error: {0}")]
    #[diagnostic(
        code(cairn::manifest),
        help("no SQL was executed; fix the manifest and run again")
    )]
    Manifest(String),

    /// Lock acquisition or release failed
    #[error("Lock error: {0}")]
    #[diagnostic(code(cairn::lock))]
    Lock(String),

    /// Migration error
    #[error("Migration error: {0}")]
    #[diagnostic(code(cairn::migration))]
    Migration(String),

    /// Database error
    #[error("Database error: {0}")]
    #[diagnostic(code(cairn::database))]
    Database(String),

    /// Command error
    #[error("Command error: {0}")]
    #[diagnostic(code(cairn::command))]
    Command(String),
}

impl From<MigrationError> for CliError {
    fn from(err: MigrationError) -> Self {
        match err {
            MigrationError::Io(e) => CliError::Io(e),
            MigrationError::Config(msg) => CliError::Config(msg),
            e @ MigrationError::UnsupportedDriver(_) => CliError::Config(e.to_string()),
            MigrationError::Database(msg) => CliError::Database(msg),
            e @ MigrationError::LockFailed { .. } => CliError::Lock(e.to_string()),
            e @ MigrationError::TargetRequired => CliError::Command(e.to_string()),
            e if e.is_load_error() => CliError::Manifest(e.to_string()),
            e => CliError::Migration(e.to_string()),
        }
    }
}

impl From<toml::de::Error> for CliError {
    fn from(err: toml::de::Error) -> Self {
        CliError::Config(format!("Failed to parse TOML: {}", err))
    }
}
