//! Canonical home-directory resolution for Polyglot.
//!
//! # Precedence
//!
//! 1. `POLYGLOT_HOME` environment variable (if set and non-empty)
//! 2. `dirs::home_dir()` platform default, joined with `.polyglot`
//!
//! Tests that touch the filesystem MUST set `POLYGLOT_HOME` to a
//! [`tempfile::TempDir`] rather than relying on the platform default.

use std::path::PathBuf;

/// Resolve the Polyglot home directory.
pub fn get_home_dir() -> std::io::Result<PathBuf> {
    if let Ok(custom) = std::env::var("POLYGLOT_HOME") {
        if !custom.is_empty() {
            return Ok(PathBuf::from(custom));
        }
    }
    dirs::home_dir()
        .map(|h| h.join(".polyglot"))
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not determine platform home directory",
            )
        })
}

/// Resolve the config directory (`<home>/config`), creating it if absent.
pub fn get_config_dir() -> std::io::Result<PathBuf> {
    let dir = get_home_dir()?.join("config");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Resolve the install directory for a node-server platform
/// (`<home>/node_servers/<platform>`), where `server.json`, the executable,
/// `instructions.txt` and `profile.zip` live. Mirrors the original's
/// `SERVER_LIB`/`nodeserver_helpers.get_path`.
pub fn get_platform_dir(platform: &str) -> std::io::Result<PathBuf> {
    Ok(get_home_dir()?.join("node_servers").join(platform))
}

/// Resolve (and create) the sandbox directory for one running node-server
/// *instance*, keyed by `base_key` rather than platform so two instances of
/// the same platform never collide — `<config_dir>/<base_key>`, matching
/// the original `ConfigManager.nodeserver_sandbox`.
pub fn get_sandbox_dir(base_key: &str) -> std::io::Result<PathBuf> {
    let dir = get_config_dir()?.join(base_key);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
