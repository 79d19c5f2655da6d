//! Bootstrap config reads: pulling a [`ControllerConfig`] and the HTTP
//! listener's bind address out of the persisted `ConfigTree` before the
//! [`polyglot_manager::Manager`] (which owns the tree from then on) exists.

use anyhow::{Context, Result};
use polyglot_core::config::ConfigTree;
use polyglot_rest::ControllerConfig;

pub fn controller_config(tree: &ConfigTree) -> Result<ControllerConfig> {
    let isy = tree
        .element("isy")
        .context("configuration is missing an 'isy' element describing the controller")?;
    let host = isy
        .get("host")
        .and_then(|v| v.as_str())
        .context("isy.host is required")?
        .to_string();
    let port = isy.get("port").and_then(|v| v.as_u64()).unwrap_or(443) as u16;
    let scheme = isy
        .get("scheme")
        .and_then(|v| v.as_str())
        .unwrap_or("https")
        .to_string();
    let username = isy
        .get("username")
        .and_then(|v| v.as_str())
        .context("isy.username is required")?
        .to_string();
    let password = tree
        .isy_password()
        .context("isy.password is required")?
        .to_string();

    Ok(ControllerConfig {
        scheme,
        host,
        port,
        username,
        password,
    })
}

pub fn http_bind(tree: &ConfigTree) -> (String, u16) {
    let http = tree.element("http");
    let bind_address = http
        .and_then(|v| v.get("bind_address"))
        .and_then(|v| v.as_str())
        .unwrap_or("0.0.0.0")
        .to_string();
    let port = http
        .and_then(|v| v.get("port"))
        .and_then(|v| v.as_u64())
        .unwrap_or(3000) as u16;
    (bind_address, port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree_with_isy(isy: serde_json::Value) -> ConfigTree {
        let mut tree = ConfigTree::default();
        tree.elements.insert("isy".to_string(), isy);
        tree
    }

    #[test]
    fn controller_config_fills_default_scheme_and_port() {
        let tree = tree_with_isy(json!({"host": "10.0.0.5", "username": "admin", "password": "hunter2"}));
        let cfg = controller_config(&tree).unwrap();
        assert_eq!(cfg.scheme, "https");
        assert_eq!(cfg.port, 443);
        assert_eq!(cfg.host, "10.0.0.5");
    }

    #[test]
    fn controller_config_requires_isy_element() {
        let tree = ConfigTree::default();
        assert!(controller_config(&tree).is_err());
    }

    #[test]
    fn http_bind_defaults_when_element_absent() {
        let tree = ConfigTree::default();
        assert_eq!(http_bind(&tree), ("0.0.0.0".to_string(), 3000));
    }

    #[test]
    fn http_bind_reads_configured_values() {
        let mut tree = ConfigTree::default();
        tree.elements
            .insert("http".to_string(), json!({"bind_address": "127.0.0.1", "port": 8080}));
        assert_eq!(http_bind(&tree), ("127.0.0.1".to_string(), 8080));
    }
}
