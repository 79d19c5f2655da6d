//! The persisted configuration tree.
//!
//! `http` and `isy` are themselves named elements, not siblings of
//! `elements` — the obfuscated fields are `elements.http.password` /
//! `elements.isy.password`. This mirrors the original `ConfigManager`
//! (`examples/original_source/polyglot/config_manager.py`), whose top-level
//! dict has exactly one `elements` key holding per-name sub-dicts. `http` and
//! `isy` convenience accessors below read/write `elements["http"]` /
//! `elements["isy"]` so callers don't need to know the nesting.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The two element names whose `password` leaf is base64-obfuscated on disk.
pub const OBFUSCATED_ELEMENTS: [&str; 2] = ["http", "isy"];

/// A single node server's persisted record, as written to `nodeservers`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeServerEntry {
    pub base_key: String,
    pub platform: String,
    pub profile_number: u32,
    pub name: String,
    #[serde(default)]
    pub config: Value,
}

/// The full persisted configuration tree.
///
/// Kept ordered (`BTreeMap`) so serialization is key-stable, matching the
/// original's `sort_keys=True`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigTree {
    #[serde(default)]
    pub nodeservers: Vec<NodeServerEntry>,
    #[serde(default)]
    pub elements: BTreeMap<String, Value>,
}

impl ConfigTree {
    /// Read-only view of `elements.<name>`, if present.
    pub fn element(&self, name: &str) -> Option<&Value> {
        self.elements.get(name)
    }

    /// Mutable view of `elements.<name>`, creating an empty object if absent.
    pub fn element_mut(&mut self, name: &str) -> &mut Value {
        self.elements
            .entry(name.to_string())
            .or_insert_with(|| Value::Object(Default::default()))
    }

    pub fn http_password(&self) -> Option<&str> {
        self.elements.get("http")?.get("password")?.as_str()
    }

    pub fn isy_password(&self) -> Option<&str> {
        self.elements.get("isy")?.get("password")?.as_str()
    }

    pub fn set_element_password(&mut self, name: &str, password: &str) {
        let el = self.element_mut(name);
        if let Value::Object(map) = el {
            map.insert("password".to_string(), Value::String(password.to_string()));
        }
    }

    pub fn upsert_nodeserver(&mut self, entry: NodeServerEntry) {
        if let Some(existing) = self.nodeservers.iter_mut().find(|n| n.base_key == entry.base_key) {
            *existing = entry;
        } else {
            self.nodeservers.push(entry);
        }
    }

    pub fn remove_nodeserver(&mut self, base_key: &str) {
        self.nodeservers.retain(|n| n.base_key != base_key);
    }
}
