//! Reads a node-server platform's install directory: `server.json` (the
//! executable, its language runtime, and optional transport override),
//! `instructions.txt`, and `profile.zip`. Grounded in the original's
//! `nodeserver_helpers.get_path` + `NodeServerManager.start_server`
//! (`examples/original_source/polyglot/nodeserver_manager.py`).

use std::path::Path;

use polyglot_core::TransportKind;
use serde::Deserialize;

use crate::error::ManagerError;

/// The `server.json` schema for one node-server platform.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformDefinition {
    pub name: String,
    /// Language runtime hint (e.g. `"python"`); selects the interpreter
    /// `resolve_command` launches `executable` with. The original's
    /// `SERVER_TYPES` table only knows `"python"`; this core additionally
    /// recognizes `"native"` for a platform that ships its own binary.
    #[serde(rename = "type")]
    pub runtime: String,
    /// Path to the executable/script, relative to the platform directory.
    pub executable: String,
    #[serde(default)]
    pub config_filename: Option<String>,
    #[serde(default)]
    pub transport: Option<TransportKind>,
    #[serde(default)]
    pub broker_address: Option<String>,
}

impl PlatformDefinition {
    /// Read and parse `<platform_dir>/server.json`.
    pub fn load(platform: &str, platform_dir: &Path) -> Result<Self, ManagerError> {
        let path = platform_dir.join("server.json");
        let text = std::fs::read_to_string(&path).map_err(|source| ManagerError::Definition {
            platform: platform.to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ManagerError::BadDefinition {
            platform: platform.to_string(),
            source,
        })
    }

    /// Map the runtime hint to a `(command, args)` pair `tokio::process::Command`
    /// can spawn directly, mirroring the original's `SERVER_TYPES` lookup.
    pub fn resolve_command(&self, platform_dir: &Path) -> Result<(String, Vec<String>), ManagerError> {
        let exe_path = platform_dir.join(&self.executable);
        match self.runtime.as_str() {
            "python" => Ok(("python3".to_string(), vec![exe_path.display().to_string()])),
            "native" | "binary" => Ok((exe_path.display().to_string(), Vec::new())),
            other => Err(ManagerError::UnrecognizedServerType(other.to_string())),
        }
    }
}

/// `<platform_dir>/instructions.txt` plus `server.json`, with `running`
/// filled in by the caller — the original's `NodeServer.definition`
/// property, used by the (out-of-scope) management UI.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ServerDefinitionView {
    #[serde(flatten)]
    pub definition: PlatformDefinitionJson,
    pub instructions: String,
    pub running: bool,
}

/// `server.json`'s raw JSON, kept as a [`serde_json::Value`] so fields this
/// core doesn't model (e.g. UI hints) still round-trip to the management UI
/// verbatim, matching the original's `json.loads(...)` passthrough.
pub type PlatformDefinitionJson = serde_json::Value;

/// Read `<platform_dir>/server.json` (as raw JSON) and `instructions.txt`,
/// and fold in the live `running` flag.
pub fn read_definition_view(
    platform: &str,
    platform_dir: &Path,
    running: bool,
) -> Result<ServerDefinitionView, ManagerError> {
    let def_path = platform_dir.join("server.json");
    let raw = std::fs::read_to_string(&def_path).map_err(|source| ManagerError::Definition {
        platform: platform.to_string(),
        source,
    })?;
    let definition: PlatformDefinitionJson =
        serde_json::from_str(&raw).map_err(|source| ManagerError::BadDefinition {
            platform: platform.to_string(),
            source,
        })?;

    let instructions_path = platform_dir.join("instructions.txt");
    let instructions = std::fs::read_to_string(&instructions_path).map_err(|source| ManagerError::Instructions {
        platform: platform.to_string(),
        source,
    })?;

    Ok(ServerDefinitionView {
        definition,
        instructions,
        running,
    })
}

/// Read `<platform_dir>/profile.zip` verbatim for the management UI.
pub fn read_profile_zip(platform: &str, platform_dir: &Path) -> Result<Vec<u8>, ManagerError> {
    let path = platform_dir.join("profile.zip");
    std::fs::read(&path).map_err(|source| ManagerError::Profile {
        platform: platform.to_string(),
        source,
    })
}

/// Generate a random 5-character alphanumeric `base_key`, matching the
/// original's `random_string(5)` (upper+lower+digits).
pub fn random_base_key() -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..5)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}
