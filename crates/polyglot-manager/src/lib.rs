//! The top-level [`Manager`]: owns the server registry, the shared
//! REST client, the config tree, and drives `start_server`/`delete`/`unload`/
//! `load`. The HTTP listener (`polyglot-http`) is handed an `Arc<Router>`
//! built from the same registry rather than owned directly here, since axum
//! needs `Router` (the message router, not `polyglot-http`'s route table)
//! cloneable into its handler state — see `polyglot-daemon`'s `main.rs` for
//! how the two are wired together into one process.

mod error;
mod platform;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use polyglot_core::config::{ConfigDelta, ConfigWriter, NodeServerEntry};
use polyglot_core::transport::{BrokerClient, InProcessBroker};
use polyglot_core::{home, OutboundCommand, Registry, ServerState, TransportKind};
use polyglot_rest::{ControllerConfig, RestClient};
use polyglot_router::Router;
use polyglot_supervisor::{SpawnSpec, Supervisor};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

pub use error::ManagerError;
pub use platform::{read_definition_view, read_profile_zip, PlatformDefinition, ServerDefinitionView};

/// Protocol version fields sent to every child in its startup `params`
/// message, matching the original's `PGVER`/`PGAPIVER`/`NSAPIVER` module
/// constants.
const PGVER: &str = "1.0.1";
const PGAPIVER: &str = "1";
const NSAPIVER: &str = "1";

pub struct Manager {
    registry: Registry,
    router: Arc<Router>,
    rest: Arc<RestClient>,
    supervisor: Arc<Supervisor>,
    config_writer: ConfigWriter,
    broker: Arc<InProcessBroker>,
    isy_version: Mutex<Option<String>>,
}

impl Manager {
    /// Build the Manager and everything it owns. Does not yet call the
    /// controller or load any persisted node servers — see
    /// [`Self::fetch_isy_version`] and [`Self::load`].
    pub fn new(controller: ControllerConfig, config_dir: PathBuf) -> Result<Arc<Self>, ManagerError> {
        let registry = Registry::new();
        let rest = Arc::new(RestClient::new(controller));
        let config_writer = ConfigWriter::spawn(config_dir)?;
        let router = Arc::new(Router::new(rest.clone(), config_writer.clone(), registry.clone()));
        let supervisor = Supervisor::new(registry.clone(), router.clone());

        Ok(Arc::new(Self {
            registry,
            router,
            rest,
            supervisor,
            config_writer,
            broker: InProcessBroker::new(),
            isy_version: Mutex::new(None),
        }))
    }

    pub fn router(&self) -> Arc<Router> {
        self.router.clone()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// One-shot `/rest/config` read on startup, matching the original's
    /// `self.pglot.isy_version`. Failure is non-fatal: `params` messages
    /// just carry `isyver: null`.
    pub async fn fetch_isy_version(&self) {
        let version = self.rest.get_version().await;
        if let Some(ref v) = version {
            info!("controller app_version: {v}");
        } else {
            warn!("could not read controller app_version on startup");
        }
        *self.isy_version.lock().await = version;
    }

    /// Start a node server: read `<platform_dir>/server.json`, allocate a
    /// `base_key`, create its sandbox, spawn it, and send `params`+`config`.
    /// Persists the new entry to the config tree on success.
    pub async fn start_server(
        &self,
        platform: &str,
        profile_number: u32,
        name: Option<String>,
        base: Option<String>,
        config: Option<Value>,
    ) -> Result<String, ManagerError> {
        let platform_dir = home::get_platform_dir(platform).map_err(|source| ManagerError::Definition {
            platform: platform.to_string(),
            source,
        })?;
        let definition = PlatformDefinition::load(platform, &platform_dir)?;

        let base_key = match base {
            Some(b) => {
                if self.registry.contains(&b).await {
                    return Err(ManagerError::DuplicateBaseKey(b));
                }
                b
            }
            None => self.allocate_base_key().await,
        };

        let sandbox_path = home::get_sandbox_dir(&base_key).map_err(|source| ManagerError::Sandbox {
            base_key: base_key.clone(),
            source,
        })?;
        let (command, args) = definition.resolve_command(&platform_dir)?;
        let config_value = config.unwrap_or_else(|| json!({}));
        let display_name = name.unwrap_or_else(|| definition.name.clone());
        let install_root = home::get_home_dir().map_err(|source| ManagerError::Sandbox {
            base_key: base_key.clone(),
            source,
        })?;

        let spec = SpawnSpec {
            base_key: base_key.clone(),
            platform: platform.to_string(),
            profile_number,
            name: display_name.clone(),
            config: config_value.clone(),
            sandbox_path,
            command,
            args,
            install_root,
        };

        match definition.transport.unwrap_or(TransportKind::Stdio) {
            TransportKind::Stdio => self.supervisor.spawn_server(spec).await?,
            TransportKind::Broker => {
                let broker: Arc<dyn BrokerClient> = self.broker.clone();
                self.supervisor.spawn_broker_server(spec, broker).await?
            }
        }

        self.send_startup(&base_key, &config_value).await;

        self.config_writer
            .apply(ConfigDelta::UpsertNodeServer(NodeServerEntry {
                base_key: base_key.clone(),
                platform: platform.to_string(),
                profile_number,
                name: display_name,
                config: config_value,
            }))
            .await?;

        Ok(base_key)
    }

    /// Send the child's startup `params` then its persisted `config`, and
    /// flip STARTING → RUNNING — the transition the supervisor leaves to its
    /// caller rather than making eagerly on spawn.
    async fn send_startup(&self, base_key: &str, config: &Value) {
        let Some(handle) = self.registry.get(base_key).await else {
            return;
        };
        let (tx, sandbox, name) = {
            let rec = handle.lock().await;
            (rec.outbound_tx.clone(), rec.sandbox_path.display().to_string(), rec.name.clone())
        };
        let isyver = self.isy_version.lock().await.clone();
        let params = json!({
            "isyver": isyver,
            "sandbox": sandbox,
            "name": name,
            "pgver": PGVER,
            "pgapiver": PGAPIVER,
            "nsapiver": NSAPIVER,
        });
        if tx.send(OutboundCommand::Params { params }.into_message()).await.is_err() {
            warn!("server {base_key} closed its inbound channel before params could be sent");
            return;
        }
        let _ = tx.send(OutboundCommand::Config { config: config.clone() }.into_message()).await;
        handle.lock().await.state = ServerState::Running;
    }

    /// Generate a random `base_key`, retrying on collision since duplicate
    /// base_keys are rejected.
    async fn allocate_base_key(&self) -> String {
        loop {
            let candidate = platform::random_base_key();
            if !self.registry.contains(&candidate).await {
                return candidate;
            }
        }
    }

    /// Initial load: start every node server recorded in the persisted
    /// config tree, per the original's `NodeServerManager.load`
    /// (`examples/original_source/polyglot/nodeserver_manager.py`). A bad
    /// entry is logged and skipped, not fatal to the rest of the load.
    pub async fn load(&self) {
        let tree = self.config_writer.current();
        info!("loading {} persisted node server(s)", tree.nodeservers.len());
        for entry in tree.nodeservers {
            if entry.platform.is_empty() {
                error!("bad node server configuration: missing platform for base_key {}", entry.base_key);
                continue;
            }
            let result = self
                .start_server(
                    &entry.platform,
                    entry.profile_number,
                    Some(entry.name.clone()),
                    Some(entry.base_key.clone()),
                    Some(entry.config.clone()),
                )
                .await;
            if let Err(e) = result {
                error!("could not start persisted node server {}: {e}", entry.base_key);
            }
        }
    }

    /// Graceful exit followed by a fresh spawn of the same platform,
    /// profile number, name and config, per `nodeserver_manager.py:restart`.
    /// Always operator- or Manager-triggered; liveness failure alone never
    /// calls this.
    pub async fn restart(&self, base_key: &str) -> Result<(), ManagerError> {
        let handle = self
            .registry
            .get(base_key)
            .await
            .ok_or_else(|| ManagerError::UnknownServer(base_key.to_string()))?;
        let (platform, profile_number, name, config) = {
            let rec = handle.lock().await;
            (rec.platform.clone(), rec.profile_number, rec.name.clone(), rec.config.clone())
        };
        self.supervisor.send_exit(base_key).await?;
        self.start_server(&platform, profile_number, Some(name), Some(base_key.to_string()), Some(config))
            .await?;
        Ok(())
    }

    /// Remove one node server: graceful exit (with kill fallback, bounded by
    /// the supervisor's grace window) then drop it from the persisted tree.
    pub async fn delete(&self, base_key: &str) -> Result<(), ManagerError> {
        if !self.registry.contains(base_key).await {
            return Err(ManagerError::UnknownServer(base_key.to_string()));
        }
        self.supervisor.send_exit(base_key).await?;
        self.config_writer
            .apply(ConfigDelta::RemoveNodeServer(base_key.to_string()))
            .await?;
        Ok(())
    }

    /// Stop every running node server in parallel, each bounded by the
    /// supervisor's grace-then-kill window, so `unload()` returns within
    /// roughly `NS_QUIT_WAIT_TIME` regardless of how many servers are running.
    pub async fn unload(&self) {
        let base_keys = self.registry.base_keys().await;
        info!("unloading {} node server(s)", base_keys.len());
        let mut joins = tokio::task::JoinSet::new();
        for base_key in base_keys {
            let supervisor = self.supervisor.clone();
            joins.spawn(async move {
                if let Err(e) = supervisor.send_exit(&base_key).await {
                    warn!("error stopping {base_key} during unload: {e}");
                }
            });
        }
        while joins.join_next().await.is_some() {}
        info!("unload complete");
    }

    /// A live snapshot of the running registry in the persisted-config
    /// shape, for the management UI and for `Manager::config`'s original
    /// role (`examples/original_source/polyglot/nodeserver_manager.py`'s
    /// `config` property).
    pub async fn config_view(&self) -> Vec<NodeServerEntry> {
        let mut out = Vec::new();
        for handle in self.registry.all_handles().await {
            let rec = handle.lock().await;
            out.push(NodeServerEntry {
                base_key: rec.base_key.clone(),
                platform: rec.platform.clone(),
                profile_number: rec.profile_number,
                name: rec.name.clone(),
                config: rec.config.clone(),
            });
        }
        out
    }

    /// `server.json` + `instructions.txt` + live `running` state for one
    /// server, for the (out-of-scope) management UI's detail page.
    pub async fn definition(&self, base_key: &str) -> Result<ServerDefinitionView, ManagerError> {
        let handle = self
            .registry
            .get(base_key)
            .await
            .ok_or_else(|| ManagerError::UnknownServer(base_key.to_string()))?;
        let (platform, responding) = {
            let rec = handle.lock().await;
            (rec.platform.clone(), rec.state == ServerState::Running && rec.is_responsive())
        };
        let platform_dir = home::get_platform_dir(&platform).map_err(|source| ManagerError::Definition {
            platform: platform.clone(),
            source,
        })?;
        platform::read_definition_view(&platform, &platform_dir, responding)
    }

    /// The platform's `profile.zip` bytes, served opaquely.
    pub async fn profile(&self, base_key: &str) -> Result<Vec<u8>, ManagerError> {
        let handle = self
            .registry
            .get(base_key)
            .await
            .ok_or_else(|| ManagerError::UnknownServer(base_key.to_string()))?;
        let platform = handle.lock().await.platform.clone();
        let platform_dir = home::get_platform_dir(&platform).map_err(|source| ManagerError::Definition {
            platform: platform.clone(),
            source,
        })?;
        platform::read_profile_zip(&platform, &platform_dir)
    }
}

/// The grace window `unload()` gives each server to exit on its own;
/// re-exported so `polyglot-daemon`'s shutdown path can sanity-check it in
/// tests without duplicating the constant.
pub const NS_QUIT_WAIT_TIME: Duration = Duration::from_secs(5);
