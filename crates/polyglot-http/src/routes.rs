//! Route handlers for controller callbacks under `/ns/<base>/…`.
//!
//! Every handler follows the same discipline: look up `<base>` in the
//! registry (404 if unknown), build the outbound command, reply 200
//! immediately, and deliver the command to the child from a spawned task.
//! Replying before forwarding is the only hard ordering constraint here; it
//! keeps a slow child from stalling the controller's callback.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use polyglot_core::addressing::rem_prefix;
use polyglot_core::{OutboundCommand, ServerHandle};
use serde::Deserialize;
use tracing::warn;

use crate::state::AppState;

async fn lookup(state: &AppState, base: &str) -> Option<ServerHandle> {
    state.router.registry().get(base).await
}

/// Deliver `cmd` to the child, then — if `request_id` is set — ack the
/// controller's `requestId` via (B) once delivery has been enqueued.
fn deliver(state: AppState, handle: ServerHandle, node_address: String, cmd: OutboundCommand, request_id: Option<String>) {
    tokio::spawn(async move {
        let (tx, profile_number) = {
            let rec = handle.lock().await;
            (rec.outbound_tx.clone(), rec.profile_number)
        };
        if tx.send(cmd.into_message()).await.is_err() {
            warn!("could not deliver command to {node_address}: outbound channel closed");
            return;
        }
        if let Some(request_id) = request_id {
            state.router.ack_request(profile_number, &node_address, &request_id, true).await;
        }
    });
}

#[derive(Debug, Deserialize, Default)]
pub struct RequestIdOnly {
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddQuery {
    pub primary: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameQuery {
    pub name: Option<String>,
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
}

pub async fn install(
    State(state): State<AppState>,
    Path((base, profile_number)): Path<(String, u32)>,
) -> impl IntoResponse {
    let Some(handle) = lookup(&state, &base).await else {
        return (StatusCode::NOT_FOUND, "unknown base").into_response();
    };
    let node_address = String::new();
    deliver(state, handle, node_address, OutboundCommand::Install { profile_number }, None);
    (StatusCode::OK, "").into_response()
}

pub async fn query(
    State(state): State<AppState>,
    Path((base, addr)): Path<(String, String)>,
    Query(q): Query<RequestIdOnly>,
) -> impl IntoResponse {
    let Some(handle) = lookup(&state, &base).await else {
        return (StatusCode::NOT_FOUND, "unknown base").into_response();
    };
    let node_address = rem_prefix(&addr).to_string();
    deliver(state, handle, node_address.clone(), OutboundCommand::Query { node_address }, q.request_id);
    (StatusCode::OK, "").into_response()
}

pub async fn status(
    State(state): State<AppState>,
    Path((base, addr)): Path<(String, String)>,
    Query(q): Query<RequestIdOnly>,
) -> impl IntoResponse {
    let Some(handle) = lookup(&state, &base).await else {
        return (StatusCode::NOT_FOUND, "unknown base").into_response();
    };
    let node_address = rem_prefix(&addr).to_string();
    deliver(state, handle, node_address.clone(), OutboundCommand::Status { node_address }, q.request_id);
    (StatusCode::OK, "").into_response()
}

pub async fn add_all(
    State(state): State<AppState>,
    Path(base): Path<String>,
    Query(q): Query<RequestIdOnly>,
) -> impl IntoResponse {
    let Some(handle) = lookup(&state, &base).await else {
        return (StatusCode::NOT_FOUND, "unknown base").into_response();
    };
    deliver(state, handle, String::new(), OutboundCommand::AddAll, q.request_id);
    (StatusCode::OK, "").into_response()
}

pub async fn report_add(
    State(state): State<AppState>,
    Path((base, addr, def_id)): Path<(String, String, String)>,
    Query(q): Query<AddQuery>,
) -> impl IntoResponse {
    let Some(handle) = lookup(&state, &base).await else {
        return (StatusCode::NOT_FOUND, "unknown base").into_response();
    };
    let (Some(primary), Some(name)) = (q.primary, q.name) else {
        return (StatusCode::BAD_REQUEST, "primary and name are required").into_response();
    };
    let node_address = rem_prefix(&addr).to_string();
    let cmd = OutboundCommand::Added {
        node_address: node_address.clone(),
        node_def_id: def_id,
        primary_node_address: primary,
        name,
    };
    deliver(state, handle, node_address, cmd, q.request_id);
    (StatusCode::OK, "").into_response()
}

pub async fn report_remove(
    State(state): State<AppState>,
    Path((base, addr)): Path<(String, String)>,
    Query(q): Query<RequestIdOnly>,
) -> impl IntoResponse {
    let Some(handle) = lookup(&state, &base).await else {
        return (StatusCode::NOT_FOUND, "unknown base").into_response();
    };
    let node_address = rem_prefix(&addr).to_string();
    deliver(state, handle, node_address.clone(), OutboundCommand::Removed { node_address }, q.request_id);
    (StatusCode::OK, "").into_response()
}

pub async fn report_rename(
    State(state): State<AppState>,
    Path((base, addr)): Path<(String, String)>,
    Query(q): Query<RenameQuery>,
) -> impl IntoResponse {
    let Some(handle) = lookup(&state, &base).await else {
        return (StatusCode::NOT_FOUND, "unknown base").into_response();
    };
    let Some(name) = q.name else {
        return (StatusCode::BAD_REQUEST, "name is required").into_response();
    };
    let node_address = rem_prefix(&addr).to_string();
    deliver(state, handle, node_address.clone(), OutboundCommand::Renamed { node_address, name }, q.request_id);
    (StatusCode::OK, "").into_response()
}

pub async fn report_enable(
    State(state): State<AppState>,
    Path((base, addr)): Path<(String, String)>,
    Query(q): Query<RequestIdOnly>,
) -> impl IntoResponse {
    let Some(handle) = lookup(&state, &base).await else {
        return (StatusCode::NOT_FOUND, "unknown base").into_response();
    };
    let node_address = rem_prefix(&addr).to_string();
    deliver(state, handle, node_address.clone(), OutboundCommand::Enabled { node_address }, q.request_id);
    (StatusCode::OK, "").into_response()
}

pub async fn report_disable(
    State(state): State<AppState>,
    Path((base, addr)): Path<(String, String)>,
    Query(q): Query<RequestIdOnly>,
) -> impl IntoResponse {
    let Some(handle) = lookup(&state, &base).await else {
        return (StatusCode::NOT_FOUND, "unknown base").into_response();
    };
    let node_address = rem_prefix(&addr).to_string();
    deliver(state, handle, node_address.clone(), OutboundCommand::Disabled { node_address }, q.request_id);
    (StatusCode::OK, "").into_response()
}

/// `nodes/<addr>/cmd/<command>[/<value>[/<uom>]]`. The trailing path is a
/// wildcard since the value/uom segments are optional; `cmd` splits it
/// instead of registering three overlapping static routes.
pub async fn cmd(
    State(state): State<AppState>,
    Path((base, addr, rest)): Path<(String, String, String)>,
    Query(q): Query<RequestIdOnly>,
    Query(raw): Query<BTreeMap<String, String>>,
) -> impl IntoResponse {
    let Some(handle) = lookup(&state, &base).await else {
        return (StatusCode::NOT_FOUND, "unknown base").into_response();
    };
    let mut segments = rest.split('/').filter(|s| !s.is_empty());
    let Some(command) = segments.next() else {
        return (StatusCode::BAD_REQUEST, "missing command").into_response();
    };
    let value = segments.next().and_then(|v| v.parse::<f64>().ok());
    let uom = segments.next().and_then(|v| v.parse::<i32>().ok());

    // Any query argument other than requestId is a `<pN>.<uom>=value`
    // multi-parameter for commands like ISY scenes; forwarded verbatim.
    let extra_params: BTreeMap<String, f64> = raw
        .into_iter()
        .filter(|(k, _)| k != "requestId")
        .filter_map(|(k, v)| v.parse::<f64>().ok().map(|v| (k, v)))
        .collect();

    let node_address = rem_prefix(&addr).to_string();
    let cmd = OutboundCommand::Cmd {
        node_address: node_address.clone(),
        command: command.to_string(),
        value,
        uom,
        request_id: q.request_id.clone(),
        extra_params,
    };
    deliver(state, handle, node_address, cmd, q.request_id);
    (StatusCode::OK, "").into_response()
}

pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "no such route under /ns")
}
