use std::path::PathBuf;

use serde_json::Value;

/// Everything needed to spawn (or respawn) one node server process.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub base_key: String,
    pub platform: String,
    pub profile_number: u32,
    pub name: String,
    pub config: Value,
    pub sandbox_path: PathBuf,
    /// The interpreter/executable to run (e.g. `python3`, or the
    /// node server's own binary for a compiled platform).
    pub command: String,
    pub args: Vec<String>,
    /// Polyglot's own install root, put on the child's `PYTHONPATH` so a
    /// `python` platform can `import` its authoring library. Irrelevant to
    /// (but harmless for) `native`/`binary` platforms.
    pub install_root: PathBuf,
}
