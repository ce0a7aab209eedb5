//! Structured logging for the `cairn` binary.
//!
//! # Environment Variables
//!
//! - `CAIRN_DEBUG=true|1|yes` - Enable debug logging
//! - `CAIRN_LOG_LEVEL=trace|debug|info|warn|error` - Set a specific log level
//! - `CAIRN_LOG_FORMAT=json|pretty|compact` - Set output format (default: json)
//!
//! `--verbose` behaves like `CAIRN_DEBUG=true`. Logs go to stderr so that
//! command output on stdout stays clean.

use std::env;
use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static INIT: Once = Once::new();

/// Check if debug logging is enabled via `CAIRN_DEBUG`.
pub fn is_debug_enabled() -> bool {
    debug_flag(env::var("CAIRN_DEBUG").ok().as_deref())
}

/// Resolve the log level from `CAIRN_LOG_LEVEL`, `CAIRN_DEBUG` and `--verbose`.
pub fn get_log_level(verbose: bool) -> &'static str {
    resolve_level(
        env::var("CAIRN_LOG_LEVEL").ok().as_deref(),
        verbose || is_debug_enabled(),
    )
}

/// Resolve the log format from `CAIRN_LOG_FORMAT`.
pub fn get_log_format() -> &'static str {
    resolve_format(env::var("CAIRN_LOG_FORMAT").ok().as_deref())
}

fn debug_flag(value: Option<&str>) -> bool {
    value.is_some_and(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
}

fn resolve_level(level: Option<&str>, debug: bool) -> &'static str {
    let fallback = if debug { "debug" } else { "warn" };
    match level.map(str::to_lowercase).as_deref() {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("info") => "info",
        Some("warn") => "warn",
        Some("error") => "error",
        _ => fallback,
    }
}

fn resolve_format(format: Option<&str>) -> &'static str {
    match format.map(str::to_lowercase).as_deref() {
        Some("pretty") => "pretty",
        Some("compact") => "compact",
        _ => "json",
    }
}

/// Initialize logging. Subsequent calls are no-ops.
///
/// Nothing is installed unless `--verbose`, `CAIRN_DEBUG` or `CAIRN_LOG_LEVEL`
/// asks for it.
pub fn init(verbose: bool) {
    INIT.call_once(|| {
        if !verbose && !is_debug_enabled() && env::var("CAIRN_LOG_LEVEL").is_err() {
            return;
        }

        let level = get_log_level(verbose);
        let filter = EnvFilter::try_new(format!(
            "cairn={},cairn_migrate={},cairn_cli={}",
            level, level, level
        ))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

        let registry = tracing_subscriber::registry().with(filter);
        match get_log_format() {
            "json" => registry
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init(),
            "compact" => registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init(),
            _ => registry
                .with(fmt::layer().pretty().with_writer(std::io::stderr))
                .init(),
        }

        tracing::debug!(
            level = level,
            format = get_log_format(),
            "Cairn logging initialized"
        );
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_flag() {
        assert!(debug_flag(Some("TRUE")));
        assert!(debug_flag(Some("1")));
        assert!(!debug_flag(Some("no")));
        assert!(!debug_flag(None));
    }

    #[test]
    fn test_log_level_resolution() {
        assert_eq!(resolve_level(None, false), "warn");
        assert_eq!(resolve_level(None, true), "debug");
        assert_eq!(resolve_level(Some("INFO"), true), "info");
        assert_eq!(resolve_level(Some("loud"), false), "warn");
    }

    #[test]
    fn test_log_format_resolution() {
        assert_eq!(resolve_format(None), "json");
        assert_eq!(resolve_format(Some("Pretty")), "pretty");
        assert_eq!(resolve_format(Some("compact")), "compact");
        assert_eq!(resolve_format(Some("xml")), "json");
    }
}
