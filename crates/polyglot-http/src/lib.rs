//! The controller-facing HTTP listener: routes under `/ns/<base>/…`
//! translating controller callbacks into outbound node-server commands.
//!
//! Route table shape (`axum::Router` + `with_state`) follows
//! `vishalbelsare-agentgateway/src/admin.rs`.

mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router as AxumRouter;
use polyglot_router::Router;
use tracing::info;

pub use state::AppState;

/// Build the `/ns` route table. Split out from [`serve`] so tests can
/// exercise it with `axum::Router::oneshot` or a `TestServer` without
/// binding a real socket.
pub fn app(router: Arc<Router>) -> AxumRouter {
    let state = AppState { router };
    AxumRouter::new()
        .route("/ns/{base}/install/{profnum}", get(routes::install))
        .route("/ns/{base}/nodes/{addr}/query", get(routes::query))
        .route("/ns/{base}/nodes/{addr}/status", get(routes::status))
        .route("/ns/{base}/add/nodes", get(routes::add_all))
        .route("/ns/{base}/nodes/{addr}/report/add/{def_id}", get(routes::report_add))
        .route("/ns/{base}/nodes/{addr}/report/remove", get(routes::report_remove))
        .route("/ns/{base}/nodes/{addr}/report/rename", get(routes::report_rename))
        .route("/ns/{base}/nodes/{addr}/report/enable", get(routes::report_enable))
        .route("/ns/{base}/nodes/{addr}/report/disable", get(routes::report_disable))
        .route("/ns/{base}/nodes/{addr}/cmd/{*rest}", get(routes::cmd))
        .fallback(routes::not_found)
        .with_state(state)
}

/// Bind and serve `/ns` routes until the process is asked to stop.
/// `bind_address`/`port` come from the `ConfigTree`'s `http` section
/// defaulting to `0.0.0.0:3000`.
pub async fn serve(router: Arc<Router>, bind_address: &str, port: u16) -> std::io::Result<()> {
    let addr: SocketAddr = format!("{bind_address}:{port}").parse().map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("bad bind address: {e}"))
    })?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP listener bound on {addr}");
    axum::serve(listener, app(router)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyglot_core::model::{ServerRecord, TransportKind};
    use polyglot_core::Registry;
    use polyglot_rest::{ControllerConfig, RestClient};
    use serde_json::json;
    use tokio::sync::mpsc;

    async fn serve_test_app() -> (String, Registry, mpsc::Receiver<polyglot_core::Message>) {
        let registry = Registry::new();
        let (tx, rx) = mpsc::channel(16);
        let record = ServerRecord::new(
            "abc12".into(),
            "hue".into(),
            1,
            "Hue".into(),
            json!({}),
            std::path::PathBuf::from("/tmp"),
            TransportKind::Stdio,
            tx,
        );
        registry.insert("abc12".into(), record).await;

        let rest = Arc::new(RestClient::new(ControllerConfig {
            scheme: "http".into(),
            host: "127.0.0.1".into(),
            port: 1,
            username: "a".into(),
            password: "b".into(),
        }));
        let dir = tempfile::TempDir::new().unwrap();
        let writer = polyglot_core::config::ConfigWriter::spawn(dir.path().to_path_buf()).unwrap();
        // Keep the tempdir alive for the process lifetime of this test.
        std::mem::forget(dir);
        let router = Arc::new(Router::new(rest, writer, registry.clone()));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = app(router);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), registry, rx)
    }

    /// Scenario 1 from the spec: the controller's callback gets a 200 before
    /// the decoded command reaches the child's outbound queue.
    #[tokio::test]
    async fn happy_path_command_forwarding() {
        let (base_url, _registry, mut rx) = serve_test_app().await;

        let resp = reqwest::get(format!("{base_url}/ns/abc12/nodes/n001_light/cmd/DON/75"))
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);

        let msg = rx.recv().await.unwrap();
        let cmd = &msg.0["cmd"];
        assert_eq!(cmd["node_address"], "light");
        assert_eq!(cmd["command"], "DON");
        assert_eq!(cmd["value"], 75.0);
        assert!(cmd["uom"].is_null());
        assert!(cmd["request_id"].is_null());
    }

    /// Multi-parameter controller commands (e.g. ISY scenes) pass extra
    /// `<pN>.<uom>=value` query args alongside `value`/`uom`.
    #[tokio::test]
    async fn cmd_forwards_extra_query_parameters() {
        let (base_url, _registry, mut rx) = serve_test_app().await;

        let resp = reqwest::get(format!(
            "{base_url}/ns/abc12/nodes/n001_light/cmd/SETCLR?p1.uom51=10&p2.uom51=20&requestId=42"
        ))
        .await
        .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);

        let msg = rx.recv().await.unwrap();
        let cmd = &msg.0["cmd"];
        assert_eq!(cmd["command"], "SETCLR");
        assert_eq!(cmd["request_id"], "42");
        assert_eq!(cmd["parameters"]["p1.uom51"], 10.0);
        assert_eq!(cmd["parameters"]["p2.uom51"], 20.0);
    }

    #[tokio::test]
    async fn unknown_base_is_404() {
        let (base_url, _registry, _rx) = serve_test_app().await;
        let resp = reqwest::get(format!("{base_url}/ns/ghost99/nodes/n001_light/query")).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn report_add_requires_primary_and_name() {
        let (base_url, _registry, _rx) = serve_test_app().await;
        let resp = reqwest::get(format!("{base_url}/ns/abc12/nodes/n001_light/report/add/dimmer")).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn node_address_prefix_is_stripped_before_forwarding() {
        let (base_url, _registry, mut rx) = serve_test_app().await;
        let resp = reqwest::get(format!("{base_url}/ns/abc12/nodes/n001_light/query")).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.0["query"]["node_address"], "light");
    }
}
