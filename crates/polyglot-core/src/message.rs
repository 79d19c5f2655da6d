//! Wire protocol: the single-key JSON envelope exchanged with node servers,
//! and the typed command enums the router dispatches on.
//!
//! Dispatch is an exhaustive Rust `match` over a tagged union, not a
//! string-keyed handler table: an unrecognized top-level key deserializes
//! into `InboundCommand::Unknown` instead of being reflectively routed to an
//! arbitrary handler.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One line of child traffic: a JSON object with exactly one top-level key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Message(pub Value);

impl Message {
    pub fn encode_line(&self) -> String {
        let mut s = serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string());
        s.push('\n');
        s
    }
}

/// `manager` message sub-operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ManagerOp {
    IAmManager,
    ClearStatistics,
    IsyHasRestarted,
}

/// Commands a node server sends to Polyglot.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundCommand {
    Pong,
    Config { config: Value },
    Manager { op: ManagerOp },
    Statistics { filters: Option<Value> },
    Status { node_address: String, driver_control: String, value: f64, uom: Option<i32>, seq: Option<u64> },
    Command { node_address: String, command: String, value: Option<f64>, uom: Option<i32>, seq: Option<u64> },
    Add { node_address: String, node_def_id: String, primary: Option<String>, name: Option<String>, seq: Option<u64> },
    Change { node_address: String, seq: Option<u64> },
    Remove { node_address: String, seq: Option<u64> },
    RestCall { url: String, seq: Option<u64> },
    Request { profile_number: Option<u32>, segments: Vec<String>, seq: Option<u64> },
    Exit,
    Connected,
    Disconnected,
    /// An unrecognized top-level key. Logged at error and dropped by the
    /// router; never reflectively dispatched.
    Unknown { code: String, raw: Value },
}

impl InboundCommand {
    /// Parse a decoded [`Message`] into a typed command.
    pub fn from_message(msg: &Message) -> Self {
        let obj = match msg.0.as_object() {
            Some(o) if o.len() == 1 => o,
            _ => {
                return InboundCommand::Unknown {
                    code: String::new(),
                    raw: msg.0.clone(),
                }
            }
        };
        let (code, params) = obj.iter().next().expect("len checked above");
        parse_by_code(code, params)
    }

    pub fn seq(&self) -> Option<u64> {
        match self {
            InboundCommand::Status { seq, .. }
            | InboundCommand::Command { seq, .. }
            | InboundCommand::Add { seq, .. }
            | InboundCommand::Change { seq, .. }
            | InboundCommand::Remove { seq, .. }
            | InboundCommand::RestCall { seq, .. }
            | InboundCommand::Request { seq, .. } => *seq,
            _ => None,
        }
    }
}

fn parse_by_code(code: &str, params: &Value) -> InboundCommand {
    let get_str = |k: &str| params.get(k).and_then(Value::as_str).map(str::to_string);
    let get_f64 = |k: &str| params.get(k).and_then(Value::as_f64);
    let get_u64 = |k: &str| params.get(k).and_then(Value::as_u64);
    let get_i32 = |k: &str| params.get(k).and_then(Value::as_i64).map(|v| v as i32);

    match code {
        "pong" => InboundCommand::Pong,
        "config" => InboundCommand::Config { config: params.clone() },
        "manager" => match get_str("op").as_deref() {
            Some("IAmManager") => InboundCommand::Manager { op: ManagerOp::IAmManager },
            Some("ClearStatistics") => InboundCommand::Manager { op: ManagerOp::ClearStatistics },
            Some("IsyHasRestarted") => InboundCommand::Manager { op: ManagerOp::IsyHasRestarted },
            _ => InboundCommand::Unknown { code: code.to_string(), raw: params.clone() },
        },
        "statistics" => InboundCommand::Statistics { filters: params.get("filters").cloned() },
        "status" => InboundCommand::Status {
            node_address: get_str("node_address").unwrap_or_default(),
            driver_control: get_str("driver_control").unwrap_or_default(),
            value: get_f64("value").unwrap_or(0.0),
            uom: get_i32("uom"),
            seq: get_u64("seq"),
        },
        "command" => InboundCommand::Command {
            node_address: get_str("node_address").unwrap_or_default(),
            command: get_str("command").unwrap_or_default(),
            value: get_f64("value"),
            uom: get_i32("uom"),
            seq: get_u64("seq"),
        },
        "add" => InboundCommand::Add {
            node_address: get_str("node_address").unwrap_or_default(),
            node_def_id: get_str("node_def_id").unwrap_or_default(),
            primary: get_str("primary"),
            name: get_str("name"),
            seq: get_u64("seq"),
        },
        "change" => InboundCommand::Change {
            node_address: get_str("node_address").unwrap_or_default(),
            seq: get_u64("seq"),
        },
        "remove" => InboundCommand::Remove {
            node_address: get_str("node_address").unwrap_or_default(),
            seq: get_u64("seq"),
        },
        "restcall" => InboundCommand::RestCall {
            url: get_str("url").unwrap_or_default(),
            seq: get_u64("seq"),
        },
        "request" => InboundCommand::Request {
            profile_number: get_u64("profile_number").map(|v| v as u32),
            segments: params
                .get("segments")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default(),
            seq: get_u64("seq"),
        },
        "exit" => InboundCommand::Exit,
        "connected" => InboundCommand::Connected,
        "disconnected" => InboundCommand::Disconnected,
        other => InboundCommand::Unknown { code: other.to_string(), raw: params.clone() },
    }
}

/// Commands Polyglot sends to a node server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum OutboundCommand {
    Config { config: Value },
    Params { params: Value },
    Install { profile_number: u32 },
    Query { node_address: String },
    Status { node_address: String },
    AddAll,
    Added {
        node_address: String,
        node_def_id: String,
        primary_node_address: String,
        name: String,
    },
    Removed { node_address: String },
    Renamed { node_address: String, name: String },
    Enabled { node_address: String },
    Disabled { node_address: String },
    Cmd {
        node_address: String,
        command: String,
        value: Option<f64>,
        uom: Option<i32>,
        request_id: Option<String>,
        /// Additional `<pN>.<uom>=value` query arguments from a multi-parameter
        /// controller command, keyed by their raw query name.
        extra_params: std::collections::BTreeMap<String, f64>,
    },
    Ping,
    Exit,
    Result {
        seq: Option<u64>,
        status_code: i32,
        elapsed: f64,
        text: Option<String>,
        retries: u32,
    },
    Statistics { to_isy: Value, ns: Option<Value> },
}

impl OutboundCommand {
    /// Serialize to the single-key wire [`Message`] form.
    pub fn into_message(self) -> Message {
        let (code, params) = match self {
            OutboundCommand::Config { config } => ("config", config),
            OutboundCommand::Params { params } => ("params", params),
            OutboundCommand::Install { profile_number } => ("install", serde_json::json!({ "profile_number": profile_number })),
            OutboundCommand::Query { node_address } => ("query", serde_json::json!({ "node_address": node_address })),
            OutboundCommand::Status { node_address } => ("status", serde_json::json!({ "node_address": node_address })),
            OutboundCommand::AddAll => ("add_all", serde_json::json!({})),
            OutboundCommand::Added { node_address, node_def_id, primary_node_address, name } => (
                "added",
                serde_json::json!({
                    "node_address": node_address,
                    "node_def_id": node_def_id,
                    "primary_node_address": primary_node_address,
                    "name": name,
                }),
            ),
            OutboundCommand::Removed { node_address } => ("removed", serde_json::json!({ "node_address": node_address })),
            OutboundCommand::Renamed { node_address, name } => ("renamed", serde_json::json!({ "node_address": node_address, "name": name })),
            OutboundCommand::Enabled { node_address } => ("enabled", serde_json::json!({ "node_address": node_address })),
            OutboundCommand::Disabled { node_address } => ("disabled", serde_json::json!({ "node_address": node_address })),
            OutboundCommand::Cmd { node_address, command, value, uom, request_id, extra_params } => {
                let mut obj = serde_json::json!({
                    "node_address": node_address,
                    "command": command,
                    "value": value,
                    "uom": uom,
                    "request_id": request_id,
                });
                if !extra_params.is_empty() {
                    obj["parameters"] = serde_json::to_value(extra_params).unwrap_or(Value::Null);
                }
                ("cmd", obj)
            }
            OutboundCommand::Ping => ("ping", serde_json::json!({})),
            OutboundCommand::Exit => ("exit", serde_json::json!({})),
            OutboundCommand::Result { seq, status_code, elapsed, text, retries } => (
                "result",
                serde_json::json!({
                    "seq": seq,
                    "status_code": status_code,
                    "elapsed": elapsed,
                    "text": text,
                    "retries": retries,
                }),
            ),
            OutboundCommand::Statistics { to_isy, ns } => (
                "statistics",
                serde_json::json!({ "to_isy": to_isy, "ns": ns }),
            ),
        };
        Message(serde_json::json!({ code: params }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_code_does_not_panic_and_is_tagged() {
        let msg = Message(serde_json::json!({"frobnicate": {"a": 1}}));
        match InboundCommand::from_message(&msg) {
            InboundCommand::Unknown { code, .. } => assert_eq!(code, "frobnicate"),
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn pong_has_no_params() {
        let msg = Message(serde_json::json!({"pong": {}}));
        assert_eq!(InboundCommand::from_message(&msg), InboundCommand::Pong);
    }

    #[test]
    fn status_round_trips_seq() {
        let msg = Message(serde_json::json!({
            "status": {"node_address": "light", "driver_control": "ST", "value": 80, "uom": 51, "seq": 1001}
        }));
        let cmd = InboundCommand::from_message(&msg);
        assert_eq!(cmd.seq(), Some(1001));
    }

    #[test]
    fn result_serializes_under_single_key() {
        let out = OutboundCommand::Result {
            seq: Some(1001),
            status_code: 200,
            elapsed: 0.12,
            text: None,
            retries: 0,
        };
        let line = out.into_message().encode_line();
        let v: Value = serde_json::from_str(line.trim()).unwrap();
        assert!(v.get("result").is_some());
        assert_eq!(v["result"]["seq"], 1001);
    }

    #[test]
    fn cmd_omits_parameters_key_when_no_extras() {
        let out = OutboundCommand::Cmd {
            node_address: "light".into(),
            command: "DON".into(),
            value: Some(75.0),
            uom: None,
            request_id: None,
            extra_params: Default::default(),
        };
        let line = out.into_message().encode_line();
        let v: Value = serde_json::from_str(line.trim()).unwrap();
        assert!(v["cmd"].get("parameters").is_none());
    }

    #[test]
    fn cmd_includes_extra_parameters_when_present() {
        let mut extra_params = std::collections::BTreeMap::new();
        extra_params.insert("p1.uom51".to_string(), 10.0);
        let out = OutboundCommand::Cmd {
            node_address: "light".into(),
            command: "SETCLR".into(),
            value: None,
            uom: None,
            request_id: None,
            extra_params,
        };
        let line = out.into_message().encode_line();
        let v: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(v["cmd"]["parameters"]["p1.uom51"], 10.0);
    }

    #[test]
    fn malformed_multi_key_object_is_unknown() {
        let msg = Message(serde_json::json!({"pong": {}, "extra": 1}));
        match InboundCommand::from_message(&msg) {
            InboundCommand::Unknown { .. } => {}
            other => panic!("expected Unknown, got {other:?}"),
        }
    }
}
