//! Load and atomically persist `configuration.json`.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use serde_json::Value;

use crate::error::ConfigError;

use super::types::{ConfigTree, OBFUSCATED_ELEMENTS};

fn b64() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::STANDARD
}

/// Read `configuration.json` from `config_dir`, returning a default empty
/// tree if the file does not exist yet. Obfuscated password leaves are
/// base64-decoded into clear strings in memory.
pub fn load(config_dir: &Path) -> Result<ConfigTree, ConfigError> {
    let path = config_dir.join("configuration.json");
    if !path.exists() {
        return Ok(ConfigTree::default());
    }
    let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let mut tree: ConfigTree = serde_json::from_str(&text).map_err(|source| ConfigError::Json {
        path: path.clone(),
        source,
    })?;
    decode_passwords(&mut tree)?;
    Ok(tree)
}

fn decode_passwords(tree: &mut ConfigTree) -> Result<(), ConfigError> {
    for name in OBFUSCATED_ELEMENTS {
        let Some(el) = tree.elements.get_mut(name) else {
            continue;
        };
        let Some(Value::Object(map)) = Some(el) else {
            continue;
        };
        if let Some(Value::String(encoded)) = map.get("password").cloned() {
            let decoded = b64().decode(encoded.as_bytes()).map_err(|source| ConfigError::BadPassword {
                field: static_field_name(name),
                source,
            })?;
            let clear = String::from_utf8_lossy(&decoded).into_owned();
            map.insert("password".to_string(), Value::String(clear));
        }
    }
    Ok(())
}

fn static_field_name(name: &str) -> &'static str {
    match name {
        "http" => "elements.http.password",
        "isy" => "elements.isy.password",
        _ => "elements.<unknown>.password",
    }
}

fn encode_passwords(tree: &ConfigTree) -> ConfigTree {
    let mut copy = tree.clone();
    for name in OBFUSCATED_ELEMENTS {
        let Some(Value::Object(map)) = copy.elements.get_mut(name) else {
            continue;
        };
        if let Some(Value::String(clear)) = map.get("password").cloned() {
            let encoded = b64().encode(clear.as_bytes());
            map.insert("password".to_string(), Value::String(encoded));
        }
    }
    copy
}

/// Serialize `tree` with obfuscated passwords, 4-space indent and stable key
/// ordering (guaranteed by `ConfigTree`'s `BTreeMap`), then atomically
/// replace `configuration.json` and chmod it to 0600.
pub fn save(config_dir: &Path, tree: &ConfigTree) -> Result<(), ConfigError> {
    let path = config_dir.join("configuration.json");
    let encoded = encode_passwords(tree);

    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(
        &mut buf,
        serde_json::ser::PrettyFormatter::with_indent(b"    "),
    );
    serde::Serialize::serialize(&encoded, &mut serializer).map_err(|source| ConfigError::Json {
        path: path.clone(),
        source,
    })?;

    let tmp_path = tmp_path_for(&path);
    {
        let mut f = std::fs::File::create(&tmp_path).map_err(|source| ConfigError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        f.write_all(&buf).map_err(|source| ConfigError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        f.sync_all().map_err(|source| ConfigError::Io {
            path: tmp_path.clone(),
            source,
        })?;
    }
    std::fs::rename(&tmp_path, &path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;

    chmod_owner_rw(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    path.with_extension("json.tmp")
}

#[cfg(unix)]
fn chmod_owner_rw(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o600);
    std::fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn chmod_owner_rw(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::NodeServerEntry;
    use tempfile::TempDir;

    #[test]
    fn password_round_trips_and_is_not_cleartext_on_disk() {
        let dir = TempDir::new().unwrap();
        let mut tree = ConfigTree::default();
        tree.set_element_password("isy", "s3cr3t");

        save(dir.path(), &tree).unwrap();

        let on_disk = std::fs::read_to_string(dir.path().join("configuration.json")).unwrap();
        assert!(!on_disk.contains("s3cr3t"));
        assert!(on_disk.contains(&b64().encode("s3cr3t")));

        let reloaded = load(dir.path()).unwrap();
        assert_eq!(reloaded.isy_password(), Some("s3cr3t"));
    }

    #[test]
    fn file_is_owner_only_on_unix() {
        let dir = TempDir::new().unwrap();
        let tree = ConfigTree::default();
        save(dir.path(), &tree).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let meta = std::fs::metadata(dir.path().join("configuration.json")).unwrap();
            assert_eq!(meta.permissions().mode() & 0o777, 0o600);
        }
    }

    #[test]
    fn missing_file_yields_default_tree() {
        let dir = TempDir::new().unwrap();
        let tree = load(dir.path()).unwrap();
        assert_eq!(tree, ConfigTree::default());
    }

    #[test]
    fn nodeserver_upsert_and_remove_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut tree = ConfigTree::default();
        tree.upsert_nodeserver(NodeServerEntry {
            base_key: "abc12".into(),
            platform: "hue".into(),
            profile_number: 1,
            name: "Hue".into(),
            config: serde_json::json!({}),
        });
        save(dir.path(), &tree).unwrap();
        let reloaded = load(dir.path()).unwrap();
        assert_eq!(reloaded.nodeservers.len(), 1);

        tree.remove_nodeserver("abc12");
        save(dir.path(), &tree).unwrap();
        let reloaded = load(dir.path()).unwrap();
        assert!(reloaded.nodeservers.is_empty());
    }
}
