//! Node server process lifecycle: spawning a child over stdio,
//! the liveness ping/pong loop, stderr classification, and graceful exit
//! with a kill fallback.
//!
//! Mirrors `plugins/worker_adapter/lifecycle.rs`'s
//! (`LifecycleManager`, `restart_worker`, `rotate_log_if_needed`) and
//! `atm-agent-mcp/src/proxy.rs`'s child-spawning shape (`spawn_child`,
//! piped stdin/stdout, a background stdout-reader task) — generalized from
//! one hardcoded `codex mcp-server` child to an arbitrary node server
//! command, and with stderr piped (rather than discarded) so it can be
//! classified and forwarded instead of silently dropped.

mod error;
mod liveness;
mod spec;
mod stderr;

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use polyglot_core::{InboundCommand, OutboundCommand, Registry, ServerRecord, ServerState, TransportKind};
use polyglot_core::transport::{stdio_transport, Received};
use polyglot_router::{Router, RouterEffect, SupervisorStats};
use serde_json::json;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub use error::SupervisorError;
pub use spec::SpawnSpec;

/// Grace period between sending `exit` and force-killing the process.
const EXIT_GRACE: Duration = Duration::from_secs(5);

struct RunningChild {
    process: Mutex<Child>,
}

/// Owns every spawned child process and drives its lifecycle. Holds a
/// [`Registry`] clone (the model data other components also see) and an
/// independent map of process handles that only this crate needs.
pub struct Supervisor {
    registry: Registry,
    router: Arc<Router>,
    children: Mutex<HashMap<String, RunningChild>>,
}

impl Supervisor {
    /// `registry` and `router` must share the same underlying [`Registry`]
    /// (i.e. `router` was built from `registry.clone()`), otherwise the
    /// router won't see the servers this supervisor spawns.
    pub fn new(registry: Registry, router: Arc<Router>) -> Arc<Self> {
        let supervisor = Arc::new(Self {
            registry: registry.clone(),
            router: router.clone(),
            children: Mutex::new(HashMap::new()),
        });

        let stats_provider: Arc<dyn SupervisorStats> = supervisor.clone();
        router.set_supervisor_stats(stats_provider);

        liveness::spawn(&supervisor);

        supervisor
    }

    /// Spawn a node server's process and wire its transport, stderr
    /// forwarding, and inbound dispatch into the router.
    pub async fn spawn_server(&self, spec: SpawnSpec) -> Result<(), SupervisorError> {
        if self.registry.contains(&spec.base_key).await {
            return Err(SupervisorError::AlreadyRunning(spec.base_key.clone()));
        }

        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .current_dir(&spec.sandbox_path)
            .env("PYTHONPATH", &spec.install_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
            command: spec.command.clone(),
            source,
        })?;

        let stdin = child.stdin.take().ok_or_else(|| SupervisorError::MissingPipes(spec.base_key.clone()))?;
        let stdout = child.stdout.take().ok_or_else(|| SupervisorError::MissingPipes(spec.base_key.clone()))?;
        let stderr = child.stderr.take().ok_or_else(|| SupervisorError::MissingPipes(spec.base_key.clone()))?;
        let process_id = child.id();

        stderr::spawn(spec.base_key.clone(), stderr);

        let handle = stdio_transport::spawn(stdin, stdout);
        let transport = handle.transport;
        let inbound = handle.inbound;

        let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::channel(256);

        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(e) = transport.send(msg).await {
                    warn!("outbound write failed: {e}");
                    break;
                }
            }
        });

        let mut record = ServerRecord::new(
            spec.base_key.clone(),
            spec.platform.clone(),
            spec.profile_number,
            spec.name.clone(),
            spec.config.clone(),
            spec.sandbox_path.clone(),
            TransportKind::Stdio,
            outbound_tx,
        );
        record.process_id = process_id;
        // Left at STARTING; the caller (`polyglot-manager`) flips this to
        // RUNNING once `params`+`config` have been sent, per the state
        // diagram below.
        self.registry.insert(spec.base_key.clone(), record).await;

        spawn_dispatch_loop(self.router.clone(), self.registry.clone(), spec.base_key.clone(), inbound);

        self.children.lock().await.insert(spec.base_key.clone(), RunningChild { process: Mutex::new(child) });
        Ok(())
    }

    /// Spawn a broker-transport server: no OS process is owned by this
    /// supervisor (the node server connects to `broker` independently), so
    /// there is nothing to wait for or kill in [`Self::send_exit`] beyond
    /// sending the outbound `exit` message. A broker-backed server is
    /// otherwise interchangeable with a stdio one from the router's
    /// perspective.
    pub async fn spawn_broker_server(
        &self,
        spec: SpawnSpec,
        broker: Arc<dyn polyglot_core::transport::BrokerClient>,
    ) -> Result<(), SupervisorError> {
        if self.registry.contains(&spec.base_key).await {
            return Err(SupervisorError::AlreadyRunning(spec.base_key.clone()));
        }

        let handle = polyglot_core::transport::broker_transport::spawn(broker, &spec.name);
        let transport = handle.transport;
        let inbound = handle.inbound;

        let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::channel(256);
        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(e) = transport.send(msg).await {
                    warn!("broker outbound publish failed: {e}");
                    break;
                }
            }
        });

        let mut record = ServerRecord::new(
            spec.base_key.clone(),
            spec.platform.clone(),
            spec.profile_number,
            spec.name.clone(),
            spec.config.clone(),
            spec.sandbox_path.clone(),
            TransportKind::Broker,
            outbound_tx,
        );
        record.process_id = None;
        self.registry.insert(spec.base_key.clone(), record).await;

        spawn_dispatch_loop(self.router.clone(), self.registry.clone(), spec.base_key.clone(), inbound);
        Ok(())
    }

    /// Send `exit`, wait up to [`EXIT_GRACE`] for the process to exit on its
    /// own, then kill it. Always removes the server from the registry.
    pub async fn send_exit(&self, base_key: &str) -> Result<(), SupervisorError> {
        let Some(record_handle) = self.registry.get(base_key).await else {
            return Err(SupervisorError::NotRunning(base_key.to_string()));
        };
        {
            let mut rec = record_handle.lock().await;
            rec.state = ServerState::Stopping;
            let _ = rec.outbound_tx.send(OutboundCommand::Exit.into_message()).await;
        }

        let mut children = self.children.lock().await;
        if let Some(running) = children.get(base_key) {
            let mut proc = running.process.lock().await;
            let exited = tokio::time::timeout(EXIT_GRACE, proc.wait()).await;
            match exited {
                Ok(Ok(_status)) => {
                    record_handle.lock().await.state = ServerState::Dead;
                }
                _ => {
                    warn!("server {base_key} did not exit within grace period, killing");
                    let _ = proc.kill().await;
                    record_handle.lock().await.state = ServerState::Killed;
                }
            }
        } else {
            // No OS process owned by this supervisor (broker transport):
            // the outbound `exit` message above is the whole teardown.
            record_handle.lock().await.state = ServerState::Dead;
        }
        children.remove(base_key);
        drop(children);

        self.router.on_server_dead(base_key);
        self.registry.remove(base_key).await;
        Ok(())
    }

    /// Force-kill without waiting for a graceful exit (used by `delete`).
    pub async fn kill(&self, base_key: &str) -> Result<(), SupervisorError> {
        let mut children = self.children.lock().await;
        if let Some(running) = children.remove(base_key) {
            let _ = running.process.lock().await.kill().await;
        }
        drop(children);
        if let Some(handle) = self.registry.get(base_key).await {
            handle.lock().await.state = ServerState::Killed;
        }
        self.router.on_server_dead(base_key);
        self.registry.remove(base_key).await;
        Ok(())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Drain one server's decoded inbound stream into the router until the
/// channel closes, then mark the record DEAD. Shared by the stdio and
/// broker spawn paths — both deliver the same [`Received`] stream, just
/// sourced from a pipe or a broker subscription.
fn spawn_dispatch_loop(
    router: Arc<Router>,
    registry: Registry,
    base_key: String,
    inbound: polyglot_core::RequestQueue,
) {
    tokio::spawn(async move {
        while let Some(item) = inbound.recv().await {
            match item {
                Received::Message(msg) => {
                    let cmd = InboundCommand::from_message(&msg);
                    if router.dispatch_inbound(&base_key, cmd).await == RouterEffect::ChildRequestedExit {
                        debug!("server {base_key} self-exit noted; supervisor leaves teardown to the caller");
                    }
                }
                Received::FramingError(e) => {
                    warn!("malformed line from {base_key}: {e}");
                }
            }
        }
        if let Some(h) = registry.get(&base_key).await {
            h.lock().await.state = ServerState::Dead;
        }
        router.on_server_dead(&base_key);
        info!("server {base_key} inbound transport closed");
    });
}

impl SupervisorStats for Supervisor {
    /// The `ns` half of a `statistics` reply: one entry per running
    /// server reporting whether it answered its last ping.
    fn snapshot(&self) -> serde_json::Value {
        let children = self.children.try_lock();
        let Ok(children) = children else {
            return json!({});
        };
        json!({ "running_servers": children.len() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyglot_core::config::ConfigWriter;
    use polyglot_rest::{ControllerConfig, RestClient};

    fn test_router(registry: Registry) -> Arc<Router> {
        let rest = Arc::new(RestClient::new(ControllerConfig {
            scheme: "http".into(),
            host: "127.0.0.1".into(),
            port: 1,
            username: "a".into(),
            password: "b".into(),
        }));
        let dir = tempfile::TempDir::new().unwrap();
        let writer = ConfigWriter::spawn(dir.path().to_path_buf()).unwrap();
        std::mem::forget(dir);
        Arc::new(Router::new(rest, writer, registry))
    }

    #[tokio::test]
    async fn spawn_a_real_child_and_observe_disconnect_on_exit() {
        let registry = Registry::new();
        let router = test_router(registry.clone());
        let supervisor = Supervisor::new(registry.clone(), router);

        let sandbox = tempfile::TempDir::new().unwrap();
        let spec = SpawnSpec {
            base_key: "abc12".into(),
            platform: "echo-node".into(),
            profile_number: 1,
            name: "Echo".into(),
            config: json!({}),
            sandbox_path: sandbox.path().to_path_buf(),
            command: "sh".into(),
            args: vec!["-c".into(), "echo '{\"pong\":{}}'; sleep 0.2".into()],
            install_root: sandbox.path().to_path_buf(),
        };

        supervisor.spawn_server(spec).await.unwrap();
        assert!(registry.contains("abc12").await);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!registry.contains("abc12").await);
    }

    #[tokio::test]
    async fn spawn_server_rejects_duplicate_base_key() {
        let registry = Registry::new();
        let router = test_router(registry.clone());
        let supervisor = Supervisor::new(registry.clone(), router);
        let sandbox = tempfile::TempDir::new().unwrap();

        let spec = SpawnSpec {
            base_key: "dup01".into(),
            platform: "echo-node".into(),
            profile_number: 1,
            name: "Echo".into(),
            config: json!({}),
            sandbox_path: sandbox.path().to_path_buf(),
            command: "sh".into(),
            args: vec!["-c".into(), "sleep 2".into()],
            install_root: sandbox.path().to_path_buf(),
        };

        supervisor.spawn_server(spec.clone()).await.unwrap();
        let err = supervisor.spawn_server(spec).await.unwrap_err();
        assert!(matches!(err, SupervisorError::AlreadyRunning(_)));
        supervisor.kill("dup01").await.unwrap();
    }
}
