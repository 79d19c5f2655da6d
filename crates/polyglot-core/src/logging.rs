//! Shared logging initialization for Polyglot binaries.

use std::sync::OnceLock;

static INIT: OnceLock<()> = OnceLock::new();

fn parse_level() -> tracing::Level {
    match std::env::var("POLYGLOT_LOG")
        .unwrap_or_else(|_| "info".to_string())
        .to_ascii_lowercase()
        .as_str()
    {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

/// Initialize process-level tracing output from `POLYGLOT_LOG`.
///
/// Safe to call multiple times; only the first call installs the
/// subscriber. `verbose` forces `DEBUG` regardless of the environment.
pub fn init(verbose: bool) {
    if INIT.get().is_some() {
        return;
    }
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        parse_level()
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
    let _ = INIT.set(());
}

/// Classify a child stderr line's `**LEVEL:` prefix into a tracing level.
///
/// Per the resolved Open Question: unrecognized or missing prefixes are
/// treated as error-level rather than assumed safe to ignore.
pub fn classify_stderr_prefix(line: &str) -> tracing::Level {
    let trimmed = line.trim_start();
    if trimmed.starts_with("**INFO:") {
        tracing::Level::INFO
    } else if trimmed.starts_with("**DEBUG:") {
        tracing::Level::DEBUG
    } else if trimmed.starts_with("**WARNING:") {
        tracing::Level::WARN
    } else if trimmed.starts_with("**ERROR:") {
        tracing::Level::ERROR
    } else {
        tracing::Level::ERROR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognized_prefixes_map_to_their_level() {
        assert_eq!(classify_stderr_prefix("**INFO: starting up"), tracing::Level::INFO);
        assert_eq!(classify_stderr_prefix("**DEBUG: tick"), tracing::Level::DEBUG);
        assert_eq!(classify_stderr_prefix("**WARNING: slow"), tracing::Level::WARN);
        assert_eq!(classify_stderr_prefix("**ERROR: boom"), tracing::Level::ERROR);
    }

    #[test]
    fn unrecognized_prefix_is_error_level() {
        assert_eq!(classify_stderr_prefix("Traceback (most recent call last):"), tracing::Level::ERROR);
        assert_eq!(classify_stderr_prefix(""), tracing::Level::ERROR);
    }
}
