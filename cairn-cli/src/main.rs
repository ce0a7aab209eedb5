//! Cairn CLI - Changelog-driven database migrations.

use clap::Parser;

use cairn_cli::cli::{Cli, Command};
use cairn_cli::commands;
use cairn_cli::error::CliResult;
use cairn_cli::logging;
use cairn_cli::output;

#[tokio::main]
async fn main() {
    // Run the CLI and handle errors
    if let Err(e) = run().await {
        output::newline();
        output::error(&e.to_string());
        std::process::exit(1);
    }
}

async fn run() -> CliResult<()> {
    // Parse CLI arguments
    let cli = Cli::parse();
    logging::init(cli.global.verbose);

    match &cli.command {
        Command::Version => commands::version::run().await,
        command => {
            let action = command.action()?;
            commands::migrate::run(&cli.global, action).await
        }
    }
}
