//! `cairn up|down|to|redo|status|history` - Run a migration action.

use std::path::Path;

use cairn_migrate::{
    Action, EntryState, Manifest, ManifestLoader, MigrationEngine, MigrationError,
    MigrationRecord, RunOutcome, StatusReport, driver,
};
use tracing::info;

use crate::cli::GlobalArgs;
use crate::config::Config;
use crate::error::CliResult;
use crate::output::{self, success, warn};

/// Run a migration action against the configured database.
pub async fn run(args: &GlobalArgs, action: Action) -> CliResult<()> {
    let cwd = std::env::current_dir()?;
    let config = load_config(&cwd, args)?;

    // Fail on configuration and manifest problems before connecting.
    let db_config = config.database_config()?;
    let manifest_path = config.manifest_path(&cwd);
    let manifest = ManifestLoader::load_file(&manifest_path).await?;
    check_target(&manifest, &action)?;

    info!(
        action = action.name(),
        driver = db_config.driver.as_str(),
        host = %db_config.host,
        database = %db_config.database,
        manifest = %manifest_path.display(),
        "Starting migration action"
    );

    let store = driver::open_store(&db_config).await?;
    let engine = MigrationEngine::new(store, manifest, db_config.lock_coordinator());
    engine.initialize().await?;

    match &action {
        Action::Status => {
            output::header("Migration Status");
            print_status(&engine.status().await?);
        }
        Action::History => {
            output::header("Migration History");
            print_history(&engine.history().await?);
        }
        _ => {
            output::header(&format!("Migrate {}", action));
            let outcome = engine.run(&action).await?;
            print_outcome(&outcome);
        }
    }

    Ok(())
}

/// Load `cairn.toml` and apply flag and environment overrides.
fn load_config(cwd: &Path, args: &GlobalArgs) -> CliResult<Config> {
    let mut config = Config::discover(cwd, args.config.as_deref())?;
    config.apply_overrides(args);
    Ok(config)
}

/// Reject a target that is not in the manifest before anything touches the database.
fn check_target(manifest: &Manifest, action: &Action) -> CliResult<()> {
    match action.target() {
        Some(target) if !manifest.contains(target) => {
            Err(MigrationError::TargetNotFound(target.to_string()).into())
        }
        _ => Ok(()),
    }
}

fn print_status(report: &StatusReport) {
    if report.entries.is_empty() {
        output::info("Manifest has no entries.");
    }

    for entry in &report.entries {
        let (state, applied_at) = match entry.state {
            EntryState::Applied(at) => (output::style_success("applied "), at.to_rfc3339()),
            EntryState::Pending => (output::style_pending("pending "), String::new()),
        };
        println!(
            "  {} {:<5} {:<40} {}",
            state,
            entry.batch.as_str(),
            entry.id,
            applied_at
        );
    }

    if report.has_drift() {
        output::newline();
        warn("Applied migrations missing from the manifest:");
        for record in &report.drift {
            output::list_item(&output::style_error(&record.id));
        }
    }

    output::newline();
    output::dim(&report.summary());
}

fn print_history(records: &[MigrationRecord]) {
    if records.is_empty() {
        output::info("No migrations have been applied.");
        return;
    }

    for record in records {
        println!(
            "  {}  {}",
            record.applied_at.format("%Y-%m-%d %H:%M:%S"),
            record.id
        );
        output::kv("author", &record.author);
        output::kv("labels", &record.labels);
    }

    output::newline();
    output::dim(&format!("{} applied", records.len()));
}

fn print_outcome(outcome: &RunOutcome) {
    let rolled_back = outcome.rolled_back();
    if !rolled_back.is_empty() {
        output::section("Rolled back");
        for id in rolled_back {
            output::list_item(id);
        }
        output::newline();
    }

    let applied = outcome.applied();
    if !applied.is_empty() {
        output::section("Applied");
        for id in applied {
            output::list_item(id);
        }
        output::newline();
    }

    if outcome.has_changes() {
        success(&outcome.summary());
    } else {
        output::info(&outcome.summary());
    }
}


#[cfg(test)]
mod tests {
    use cairn_migrate::ChangelogEntry;

    use super::*;
    use crate::error::CliError;

    #[test]
    fn test_check_target() {
        let manifest = Manifest::from_entries(vec![ChangelogEntry::sql("001_init", "SELECT 1")]);

        assert!(check_target(&manifest, &Action::Up).is_ok());
        assert!(
            check_target(
                &manifest,
                &Action::To {
                    target: "001_init".into()
                }
            )
            .is_ok()
        );

        let err = check_target(
            &manifest,
            &Action::Down {
                target: Some("999_nope".into()),
            },
        )
        .unwrap_err();
        assert!(matches!(err, CliError::Manifest(ref m) if m.contains("999_nope")));
    }
}
