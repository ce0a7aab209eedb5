//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use cairn_migrate::Action;

use crate::error::{CliError, CliResult};

/// Cairn - changelog-driven database migrations
#[derive(Parser, Debug)]
#[command(name = "cairn")]
#[command(author = "Pegasus Heavy Industries LLC")]
#[command(version)]
#[command(about = "Cairn - changelog-driven database migrations", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Connection and manifest settings
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Settings shared by every command. Each overrides `cairn.toml`.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Path to the configuration file (defaults to ./cairn.toml)
    #[arg(long, global = true, env = "CAIRN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database driver: postgres, postgresql or mysql
    #[arg(long, global = true, env = "CAIRN_DRIVER")]
    pub driver: Option<String>,

    /// Database host
    #[arg(long, global = true, env = "CAIRN_HOST")]
    pub host: Option<String>,

    /// Database port
    #[arg(long, global = true, env = "CAIRN_PORT")]
    pub port: Option<u16>,

    /// Database name
    #[arg(long, global = true, env = "CAIRN_DBNAME")]
    pub dbname: Option<String>,

    /// Database user
    #[arg(long, global = true, env = "CAIRN_USER")]
    pub user: Option<String>,

    /// Database password
    #[arg(long, global = true, env = "CAIRN_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Schema holding the ledger table
    #[arg(long, global = true, env = "CAIRN_SCHEMA")]
    pub schema: Option<String>,

    /// Folder containing the manifest
    #[arg(long, global = true, env = "CAIRN_FOLDER")]
    pub folder: Option<PathBuf>,

    /// Manifest file name inside the folder
    #[arg(long, global = true, env = "CAIRN_MANIFEST")]
    pub manifest: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Apply every pending migration
    Up,

    /// Roll back the last migration, or everything above --to
    Down(DownArgs),

    /// Move the applied frontier to exactly the target migration
    To(ToArgs),

    /// Roll back the last migration, then apply everything pending
    Redo,

    /// Show applied, pending and drifted migrations
    Status,

    /// List applied migrations chronologically
    History,

    /// Display version information
    Version,
}

/// Arguments for the `down` command
#[derive(Args, Debug)]
pub struct DownArgs {
    /// Keep this migration applied and roll back everything after it
    #[arg(long)]
    pub to: Option<String>,
}

/// Arguments for the `to` command
#[derive(Args, Debug)]
pub struct ToArgs {
    /// Target migration ID
    pub target: Option<String>,
}

impl Command {
    /// The migration action this command runs.
    pub fn action(&self) -> CliResult<Action> {
        let action = match self {
            Command::Up => Action::from_parts("up", None),
            Command::Down(args) => Action::from_parts("down", args.to.clone()),
            Command::To(args) => Action::from_parts("to", args.target.clone()),
            Command::Redo => Action::from_parts("redo", None),
            Command::Status => Action::from_parts("status", None),
            Command::History => Action::from_parts("history", None),
            Command::Version => {
                return Err(CliError::Command(
                    "version is not a migration action".to_string(),
                ));
            }
        };
        action.map_err(CliError::from)
    }
}
