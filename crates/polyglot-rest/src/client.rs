//! The controller REST client: shared-session GETs with a retry ladder,
//! per-call timeout, and diagnostics.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use polyglot_core::DiagStats;
use tracing::{debug, warn};

use crate::url_build::make_url;

/// Delay ladder between retry attempts, in order.
const RETRY_DELAYS: [Duration; 4] = [
    Duration::from_millis(250),
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(3),
];

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(25);

/// Transport-layer failure codes reserved below any real HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum TransportStatus {
    Timeout = 1,
    ProtocolError = 2,
    BadUrl = 3,
    ConnectionError = 4,
}

/// Credentials and network location of the controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// Result of one REST call, returned to the caller regardless of outcome —
/// failures are encoded in `status_code`, never as an `Err`.
#[derive(Debug, Clone)]
pub struct RestResult {
    pub text: Option<String>,
    pub status_code: i32,
    pub seq: Option<u64>,
    pub elapsed: f64,
    pub retries: u32,
}

impl RestResult {
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

fn max_retries() -> u32 {
    std::env::var("PG_RETRIES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_MAX_RETRIES)
}

fn sessions_disabled() -> bool {
    std::env::var("PG_NOSESSIONS").is_ok()
}

/// Shared REST client. One instance per controller; `session` is created
/// lazily on first request and invalidated on any connection error so the
/// next call starts a fresh connection.
pub struct RestClient {
    config: ControllerConfig,
    session: Mutex<Option<reqwest::Client>>,
    stats: Mutex<DiagStats>,
}

impl RestClient {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
            stats: Mutex::new(DiagStats::default()),
        }
    }

    fn build_client() -> reqwest::Client {
        reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .expect("reqwest client builder should not fail with this config")
    }

    fn client(&self) -> reqwest::Client {
        if sessions_disabled() {
            return Self::build_client();
        }
        let mut guard = self.session.lock().expect("session mutex poisoned");
        if guard.is_none() {
            *guard = Some(Self::build_client());
        }
        guard.as_ref().expect("just populated").clone()
    }

    fn invalidate_session(&self) {
        let mut guard = self.session.lock().expect("session mutex poisoned");
        *guard = None;
    }

    fn record_stats(&self, ok: bool, elapsed: f64, retries: u32) {
        let mut stats = self.stats.lock().expect("stats mutex poisoned");
        stats.record(ok, elapsed, retries);
    }

    /// Return a snapshot of the diagnostic counters, optionally resetting
    /// them atomically.
    pub fn get_stats(&self, clear: bool) -> DiagStats {
        let mut stats = self.stats.lock().expect("stats mutex poisoned");
        let snapshot = stats.clone();
        if clear {
            *stats = DiagStats::default();
        }
        snapshot
    }

    /// Issue a GET against an already-built URL, with the controller's
    /// Basic-auth credentials, honoring the retry ladder for 503s and
    /// connection errors. `want_body` controls whether `text` is populated.
    pub async fn get(
        &self,
        url: &str,
        timeout: Option<Duration>,
        want_body: bool,
        seq: Option<u64>,
    ) -> RestResult {
        if url::Url::parse(url).is_err() {
            return RestResult {
                text: None,
                status_code: TransportStatus::BadUrl as i32,
                seq,
                elapsed: 0.0,
                retries: 0,
            };
        }

        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let max = max_retries();
        let start = Instant::now();
        let mut retries = 0u32;

        loop {
            let client = self.client();
            let result = client
                .get(url)
                .basic_auth(&self.config.username, Some(&self.config.password))
                .timeout(timeout)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status == reqwest::StatusCode::SERVICE_UNAVAILABLE && retries < max {
                        let delay = RETRY_DELAYS[(retries as usize).min(RETRY_DELAYS.len() - 1)];
                        warn!("controller returned 503, retrying in {delay:?}");
                        tokio::time::sleep(delay).await;
                        retries += 1;
                        continue;
                    }
                    let ok = status.is_success();
                    let status_code = status.as_u16() as i32;
                    let text = if want_body {
                        response.text().await.ok()
                    } else {
                        None
                    };
                    let elapsed = start.elapsed().as_secs_f64();
                    self.record_stats(ok, elapsed, retries);
                    return RestResult {
                        text,
                        status_code,
                        seq,
                        elapsed,
                        retries,
                    };
                }
                Err(e) if e.is_timeout() => {
                    let elapsed = start.elapsed().as_secs_f64();
                    self.record_stats(false, elapsed, retries);
                    return RestResult {
                        text: None,
                        status_code: TransportStatus::Timeout as i32,
                        seq,
                        elapsed,
                        retries,
                    };
                }
                Err(e) if e.is_connect() => {
                    self.invalidate_session();
                    if retries < max {
                        let delay = RETRY_DELAYS[(retries as usize).min(RETRY_DELAYS.len() - 1)];
                        warn!("controller connection error, retrying in {delay:?}: {e}");
                        tokio::time::sleep(delay).await;
                        retries += 1;
                        continue;
                    }
                    let elapsed = start.elapsed().as_secs_f64();
                    self.record_stats(false, elapsed, retries);
                    return RestResult {
                        text: None,
                        status_code: TransportStatus::ConnectionError as i32,
                        seq,
                        elapsed,
                        retries,
                    };
                }
                Err(e) => {
                    debug!("protocol-level REST error: {e}");
                    let elapsed = start.elapsed().as_secs_f64();
                    self.record_stats(false, elapsed, retries);
                    return RestResult {
                        text: None,
                        status_code: TransportStatus::ProtocolError as i32,
                        seq,
                        elapsed,
                        retries,
                    };
                }
            }
        }
    }

    /// Build the URL for a node-server REST path and issue the GET. This is
    /// the shape every public operation funnels through.
    pub async fn call(
        &self,
        profile_number: u32,
        segments: &[Option<&str>],
        query: &[(&str, &str)],
        timeout: Option<Duration>,
        want_body: bool,
        seq: Option<u64>,
    ) -> RestResult {
        let url = make_url(
            &self.config.scheme,
            &self.config.host,
            self.config.port,
            profile_number,
            segments,
            query,
        );
        self.get(&url, timeout, want_body, seq).await
    }

    /// One-shot `/rest/config` call to read `app_version` on manager
    /// startup, per the original source's `element_manager/isy/__init__.py
    /// :get_version` — no retries, a fixed 10s timeout, and this call never
    /// updates `DiagStats` (it predates any node server being loaded).
    pub async fn get_version(&self) -> Option<String> {
        let url = format!(
            "{}://{}:{}/rest/config",
            self.config.scheme, self.config.host, self.config.port
        );
        let client = self.client();
        let response = client
            .get(&url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .timeout(Duration::from_secs(10))
            .send()
            .await;
        match response {
            Ok(r) if r.status().is_success() => {
                let body = r.text().await.ok()?;
                extract_app_version(&body)
            }
            Ok(r) => {
                warn!("controller /rest/config returned {}", r.status());
                None
            }
            Err(e) => {
                warn!("controller /rest/config unreachable on startup: {e}");
                None
            }
        }
    }
}

/// Extract `app_version` from the `/rest/config` XML response. This is the
/// only place in the core that parses XML; elsewhere `text` is passed
/// through opaquely to the child.
fn extract_app_version(xml: &str) -> Option<String> {
    let start_tag = "<app_version>";
    let end_tag = "</app_version>";
    let start = xml.find(start_tag)? + start_tag.len();
    let end = xml[start..].find(end_tag)? + start;
    Some(xml[start..end].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> ControllerConfig {
        let url = url::Url::parse(&server.uri()).unwrap();
        ControllerConfig {
            scheme: "http".into(),
            host: url.host_str().unwrap().to_string(),
            port: url.port().unwrap_or(80),
            username: "admin".into(),
            password: "secret".into(),
        }
    }

    #[tokio::test]
    #[serial]
    async fn retries_on_503_then_succeeds() {
        std::env::remove_var("PG_RETRIES");
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/ns/1/nodes/n001_light/report/status/ST/80/51"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/ns/1/nodes/n001_light/report/status/ST/80/51"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = RestClient::new(config_for(&server));
        let result = client
            .call(
                1,
                &[Some("nodes"), Some("n001_light"), Some("report"), Some("status"), Some("ST"), Some("80"), Some("51")],
                &[],
                Some(Duration::from_secs(5)),
                false,
                Some(1001),
            )
            .await;

        assert_eq!(result.status_code, 200);
        assert_eq!(result.retries, 2);
        assert_eq!(result.seq, Some(1001));

        let stats = client.get_stats(false);
        assert_eq!(stats.ok_count + stats.error_count, stats.total_requests);
    }

    #[tokio::test]
    #[serial]
    async fn bad_url_is_non_retryable() {
        std::env::remove_var("PG_RETRIES");
        let server = MockServer::start().await;
        let client = RestClient::new(config_for(&server));
        let result = client.get("not a url", None, false, None).await;
        assert_eq!(result.status_code, TransportStatus::BadUrl as i32);
        assert_eq!(result.retries, 0);
    }

    #[tokio::test]
    #[serial]
    async fn get_stats_clear_resets_counters() {
        std::env::remove_var("PG_RETRIES");
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let client = RestClient::new(config_for(&server));
        client.call(1, &[Some("nodes")], &[], None, false, None).await;
        let snap = client.get_stats(true);
        assert_eq!(snap.total_requests, 1);
        let after = client.get_stats(false);
        assert_eq!(after.total_requests, 0);
    }

    #[tokio::test]
    #[serial]
    async fn connection_error_invalidates_session_and_is_observable_in_stats() {
        std::env::remove_var("PG_RETRIES");
        std::env::set_var("PG_RETRIES", "0");
        // Nothing listens on this port: every attempt hits a connection error.
        let client = RestClient::new(ControllerConfig {
            scheme: "http".into(),
            host: "127.0.0.1".into(),
            port: 1,
            username: "admin".into(),
            password: "secret".into(),
        });

        // Populate the session so we can observe it getting torn down.
        let _ = client.client();
        assert!(client.session.lock().unwrap().is_some());

        let result = client
            .get("http://127.0.0.1:1/rest/ns/1/nodes/n001_light/report/status/ST/80/51", None, false, None)
            .await;

        assert_eq!(result.status_code, TransportStatus::ConnectionError as i32);
        assert!(client.session.lock().unwrap().is_none());

        let stats = client.get_stats(false);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.ok_count + stats.error_count, stats.total_requests);
        std::env::remove_var("PG_RETRIES");
    }

    #[test]
    fn extracts_app_version_from_xml() {
        let xml = "<config><app_version>9.0.1</app_version></config>";
        assert_eq!(extract_app_version(xml), Some("9.0.1".to_string()));
    }
}
