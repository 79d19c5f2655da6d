//! Message Router / Protocol Engine: dispatches inbound
//! [`InboundCommand`]s from a node server by an exhaustive `match`,
//! correlates REST calls to the `result` the child expects, and enforces
//! per-message semantics (ping/pong, exit, config, statistics, CRUD).
//!
//! Dispatch for one server is synchronous from the caller's perspective —
//! the per-server request-dispatcher worker (owned by `polyglot-supervisor`)
//! awaits `dispatch_inbound` once per decoded message, which is what keeps
//! per-server REST-call ordering FIFO without needing a separate
//! pending-result callback table: the await itself *is* the correlation.

mod privileged;

use std::time::{Duration, Instant};

use polyglot_core::config::{ConfigDelta, ConfigWriter, NodeServerEntry};
use polyglot_core::{InboundCommand, ManagerOp, OutboundCommand, Registry};
use polyglot_rest::RestClient;
use serde_json::Value;
use tracing::{debug, error, info, warn};

pub use privileged::PrivilegedServer;

const PING_INTERVAL: Duration = Duration::from_secs(30);
const REST_TIMEOUT: Duration = Duration::from_secs(25);

/// Supplies the `ns` half of a `statistics` reply. Implemented by
/// `polyglot-supervisor`'s liveness tracker; kept as a trait so this crate
/// never depends on the supervisor crate (avoiding a cycle).
pub trait SupervisorStats: Send + Sync {
    fn snapshot(&self) -> Value;
}

/// An effect the caller (the per-server worker) must act on beyond sending
/// a reply — things the router decides but doesn't own the machinery for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterEffect {
    None,
    /// The child asked to exit on its own initiative; the supervisor should
    /// run the same graceful-then-kill teardown as an operator-issued
    /// `send_exit`.
    ChildRequestedExit,
}

pub struct Router {
    rest: std::sync::Arc<RestClient>,
    config_writer: ConfigWriter,
    registry: Registry,
    privileged: PrivilegedServer,
    supervisor_stats: std::sync::Mutex<Option<std::sync::Arc<dyn SupervisorStats>>>,
}

impl Router {
    pub fn new(rest: std::sync::Arc<RestClient>, config_writer: ConfigWriter, registry: Registry) -> Self {
        Self {
            rest,
            config_writer,
            registry,
            privileged: PrivilegedServer::new(),
            supervisor_stats: std::sync::Mutex::new(None),
        }
    }

    pub fn set_supervisor_stats(&self, provider: std::sync::Arc<dyn SupervisorStats>) {
        *self.supervisor_stats.lock().expect("mutex poisoned") = Some(provider);
    }

    /// Revoke `manager` privileges when `base_key`'s `ServerRecord`
    /// transitions to DEAD.
    pub fn on_server_dead(&self, base_key: &str) {
        self.privileged.revoke_if(base_key);
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Acknowledge a controller callback that carried a `requestId`: once
    /// the corresponding command has been enqueued to the child, the HTTP
    /// listener reports success back to the controller via (B).
    /// `requestId` is optional on any path; when absent, no ack is sent.
    pub async fn ack_request(&self, profile_number: u32, node_address: &str, request_id: &str, success: bool) {
        self.rest
            .report_request_status(profile_number, node_address, request_id, success, Some(REST_TIMEOUT), None)
            .await;
    }

    pub async fn dispatch_inbound(&self, base_key: &str, cmd: InboundCommand) -> RouterEffect {
        let Some(handle) = self.registry.get(base_key).await else {
            warn!("dropping message for unregistered server {base_key}");
            return RouterEffect::None;
        };

        match cmd {
            InboundCommand::Pong => {
                let mut rec = handle.lock().await;
                rec.last_pong_received = Some(Instant::now());
                rec.missed_pings = 0;
                RouterEffect::None
            }
            InboundCommand::Config { config } => {
                self.handle_config(base_key, &handle, config).await;
                RouterEffect::None
            }
            InboundCommand::Manager { op } => {
                self.handle_manager(base_key, &handle, op).await;
                RouterEffect::None
            }
            InboundCommand::Statistics { .. } => {
                self.handle_statistics(base_key, &handle).await;
                RouterEffect::None
            }
            InboundCommand::Status { node_address, driver_control, value, uom, seq } => {
                let profile_number = handle.lock().await.profile_number;
                let result = self
                    .rest
                    .report_node_status(profile_number, &node_address, &driver_control, value, uom, Some(REST_TIMEOUT), seq)
                    .await;
                self.reply(&handle, result).await;
                RouterEffect::None
            }
            InboundCommand::Command { node_address, command, value, uom, seq } => {
                let profile_number = handle.lock().await.profile_number;
                let result = self
                    .rest
                    .report_command(profile_number, &node_address, &command, value, uom, Some(REST_TIMEOUT), seq)
                    .await;
                self.reply(&handle, result).await;
                RouterEffect::None
            }
            InboundCommand::Add { node_address, node_def_id, primary, name, seq } => {
                let profile_number = handle.lock().await.profile_number;
                let result = self
                    .rest
                    .node_add(
                        profile_number,
                        &node_address,
                        &node_def_id,
                        primary.as_deref(),
                        name.as_deref(),
                        Some(REST_TIMEOUT),
                        seq,
                    )
                    .await;
                self.reply(&handle, result).await;
                RouterEffect::None
            }
            InboundCommand::Change { node_address, seq } => {
                let profile_number = handle.lock().await.profile_number;
                let result = self.rest.node_change(profile_number, &node_address, Some(REST_TIMEOUT), seq).await;
                self.reply(&handle, result).await;
                RouterEffect::None
            }
            InboundCommand::Remove { node_address, seq } => {
                let profile_number = handle.lock().await.profile_number;
                let result = self.rest.node_remove(profile_number, &node_address, Some(REST_TIMEOUT), seq).await;
                self.reply(&handle, result).await;
                RouterEffect::None
            }
            InboundCommand::RestCall { url, seq } => {
                let result = self.rest.restcall(&url, Some(REST_TIMEOUT), seq).await;
                self.reply(&handle, result).await;
                RouterEffect::None
            }
            InboundCommand::Request { profile_number, segments, seq } => {
                let profile_number = match profile_number {
                    Some(p) => p,
                    None => handle.lock().await.profile_number,
                };
                let refs: Vec<&str> = segments.iter().map(String::as_str).collect();
                let result = self.rest.request(profile_number, &refs, Some(REST_TIMEOUT), seq).await;
                self.reply(&handle, result).await;
                RouterEffect::None
            }
            InboundCommand::Exit => {
                handle.lock().await.exit_requested = true;
                info!("server {base_key} requested its own exit");
                RouterEffect::ChildRequestedExit
            }
            InboundCommand::Connected => {
                let should_ping = {
                    let mut rec = handle.lock().await;
                    let was_connected = rec.connected;
                    rec.connected = true;
                    !was_connected
                };
                if should_ping {
                    self.send_ping(&handle).await;
                }
                RouterEffect::None
            }
            InboundCommand::Disconnected => {
                handle.lock().await.connected = false;
                RouterEffect::None
            }
            InboundCommand::Unknown { code, raw } => {
                error!("unrecognized command code '{code}' from {base_key}: {raw}");
                RouterEffect::None
            }
        }
    }

    async fn handle_config(&self, base_key: &str, handle: &polyglot_core::ServerHandle, config: Value) {
        let mut rec = handle.lock().await;
        if rec.exit_requested {
            debug!("dropping config update for {base_key}: exit already requested");
            return;
        }
        let new_config = config.get("config").cloned().unwrap_or(config);
        rec.config = new_config.clone();
        let entry = NodeServerEntry {
            base_key: rec.base_key.clone(),
            platform: rec.platform.clone(),
            profile_number: rec.profile_number,
            name: rec.name.clone(),
            config: new_config,
        };
        drop(rec);
        self.config_writer.apply_nowait(ConfigDelta::UpsertNodeServer(entry));
    }

    async fn handle_manager(&self, base_key: &str, handle: &polyglot_core::ServerHandle, op: ManagerOp) {
        match op {
            ManagerOp::IAmManager => {
                if self.privileged.claim(base_key) {
                    handle.lock().await.is_privileged = true;
                    info!("server {base_key} claimed manager privileges");
                } else {
                    debug!("server {base_key} is already the privileged manager (or another server is)");
                }
            }
            ManagerOp::ClearStatistics => {
                if self.privileged.is(base_key) {
                    self.rest.get_stats(true);
                    info!("statistics cleared by privileged server {base_key}");
                } else {
                    error!("server {base_key} is not privileged; ClearStatistics dropped");
                }
            }
            ManagerOp::IsyHasRestarted => {
                if self.privileged.is(base_key) {
                    info!("controller restart acknowledged by privileged server {base_key}");
                } else {
                    error!("server {base_key} is not privileged; IsyHasRestarted dropped");
                }
            }
        }
    }

    async fn handle_statistics(&self, base_key: &str, handle: &polyglot_core::ServerHandle) {
        let to_isy = serde_json::to_value(self.rest.get_stats(false)).unwrap_or(Value::Null);
        let ns = if self.privileged.is(base_key) {
            self.supervisor_stats
                .lock()
                .expect("mutex poisoned")
                .as_ref()
                .map(|p| p.snapshot())
        } else {
            None
        };
        let out = OutboundCommand::Statistics { to_isy, ns };
        self.send(handle, out).await;
    }

    async fn reply(&self, handle: &polyglot_core::ServerHandle, result: polyglot_rest::RestResult) {
        if result.seq.is_none() {
            // No seq means the child isn't waiting for a correlated result;
            // still useful to surface failures in logs.
            if !result.is_ok() {
                warn!("REST call without seq failed with status {}", result.status_code);
            }
            return;
        }
        let out = OutboundCommand::Result {
            seq: result.seq,
            status_code: result.status_code,
            elapsed: result.elapsed,
            text: result.text,
            retries: result.retries,
        };
        self.send(handle, out).await;
    }

    async fn send_ping(&self, handle: &polyglot_core::ServerHandle) {
        let mut rec = handle.lock().await;
        rec.last_ping_sent = Some(Instant::now());
        let tx = rec.outbound_tx.clone();
        drop(rec);
        let _ = tx.send(OutboundCommand::Ping.into_message()).await;
    }

    async fn send(&self, handle: &polyglot_core::ServerHandle, cmd: OutboundCommand) {
        let tx = handle.lock().await.outbound_tx.clone();
        if tx.send(cmd.into_message()).await.is_err() {
            warn!("outbound channel closed; message dropped");
        }
    }
}
