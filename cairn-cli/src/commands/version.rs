//! `cairn version` command - Display version information.

use crate::error::CliResult;
use crate::output::{self, kv};

/// Package version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name
const NAME: &str = env!("CARGO_PKG_NAME");

/// Run the version command
pub async fn run() -> CliResult<()> {
    output::header("Cairn");

    kv("Version", VERSION);
    kv("Binary", NAME);

    #[cfg(debug_assertions)]
    let build_mode = "debug";
    #[cfg(not(debug_assertions))]
    let build_mode = "release";

    kv("Build", build_mode);

    // Drivers compiled in
    let mut features = Vec::new();

    #[cfg(feature = "postgres")]
    features.push("postgres");

    #[cfg(feature = "mysql")]
    features.push("mysql");

    if features.is_empty() {
        features.push("none");
    }

    kv("Drivers", &features.join(", "));

    output::newline();
    output::dim("https://github.com/pegasusheavy/cairn");

    Ok(())
}
