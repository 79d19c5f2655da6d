//! The public operations node servers drive indirectly through the router:
//! `report_node_status`, `report_command`, `node_add`, `node_change`,
//! `node_remove`, `report_request_status`, `restcall`, `request`.
//!
//! Each builds the `n<NNN>_`-prefixed node address and funnels through
//! [`RestClient::call`].

use std::time::Duration;

use polyglot_core::addressing::add_prefix;

use crate::client::{RestClient, RestResult};

impl RestClient {
    /// `nodes/<addr>/report/status/<driver>/<value>/<uom>`
    pub async fn report_node_status(
        &self,
        profile_number: u32,
        node_address: &str,
        driver_control: &str,
        value: f64,
        uom: Option<i32>,
        timeout: Option<Duration>,
        seq: Option<u64>,
    ) -> RestResult {
        let addr = add_prefix(profile_number, node_address);
        let value_str = format_number(value);
        let uom_str = uom.map(|u| u.to_string());
        self.call(
            profile_number,
            &[
                Some("nodes"),
                Some(addr.as_str()),
                Some("report"),
                Some("status"),
                Some(driver_control),
                Some(value_str.as_str()),
                uom_str.as_deref(),
            ],
            &[],
            timeout,
            false,
            seq,
        )
        .await
    }

    /// `nodes/<addr>/report/cmd/<command>[/<value>[/<uom>]]`
    pub async fn report_command(
        &self,
        profile_number: u32,
        node_address: &str,
        command: &str,
        value: Option<f64>,
        uom: Option<i32>,
        timeout: Option<Duration>,
        seq: Option<u64>,
    ) -> RestResult {
        let addr = add_prefix(profile_number, node_address);
        let value_str = value.map(format_number);
        let uom_str = uom.map(|u| u.to_string());
        self.call(
            profile_number,
            &[
                Some("nodes"),
                Some(addr.as_str()),
                Some("report"),
                Some("cmd"),
                Some(command),
                value_str.as_deref(),
                uom_str.as_deref(),
            ],
            &[],
            timeout,
            false,
            seq,
        )
        .await
    }

    /// `nodes/<addr>/add/<def_id>?primary=&name=`
    pub async fn node_add(
        &self,
        profile_number: u32,
        node_address: &str,
        node_def_id: &str,
        primary: Option<&str>,
        name: Option<&str>,
        timeout: Option<Duration>,
        seq: Option<u64>,
    ) -> RestResult {
        let addr = add_prefix(profile_number, node_address);
        let primary_prefixed = primary.map(|p| add_prefix(profile_number, p));
        let mut query = Vec::new();
        if let Some(p) = primary_prefixed.as_deref() {
            query.push(("primary", p));
        }
        if let Some(n) = name {
            query.push(("name", n));
        }
        self.call(
            profile_number,
            &[Some("nodes"), Some(addr.as_str()), Some("add"), Some(node_def_id)],
            &query,
            timeout,
            false,
            seq,
        )
        .await
    }

    /// `nodes/<addr>/change`
    pub async fn node_change(
        &self,
        profile_number: u32,
        node_address: &str,
        timeout: Option<Duration>,
        seq: Option<u64>,
    ) -> RestResult {
        let addr = add_prefix(profile_number, node_address);
        self.call(
            profile_number,
            &[Some("nodes"), Some(addr.as_str()), Some("change")],
            &[],
            timeout,
            false,
            seq,
        )
        .await
    }

    /// `nodes/<addr>/remove`
    pub async fn node_remove(
        &self,
        profile_number: u32,
        node_address: &str,
        timeout: Option<Duration>,
        seq: Option<u64>,
    ) -> RestResult {
        let addr = add_prefix(profile_number, node_address);
        self.call(
            profile_number,
            &[Some("nodes"), Some(addr.as_str()), Some("remove")],
            &[],
            timeout,
            false,
            seq,
        )
        .await
    }

    /// `nodes/<addr>/report/request/<request_id>/<success>`
    pub async fn report_request_status(
        &self,
        profile_number: u32,
        node_address: &str,
        request_id: &str,
        success: bool,
        timeout: Option<Duration>,
        seq: Option<u64>,
    ) -> RestResult {
        let addr = add_prefix(profile_number, node_address);
        self.call(
            profile_number,
            &[
                Some("nodes"),
                Some(addr.as_str()),
                Some("report"),
                Some("request"),
                Some(request_id),
                Some(if success { "true" } else { "false" }),
            ],
            &[],
            timeout,
            false,
            seq,
        )
        .await
    }

    /// A raw, already-assembled URL passed through verbatim by the child.
    /// `text` is populated since `restcall` explicitly wants the response
    /// body, passed through opaquely rather than parsed.
    pub async fn restcall(&self, url: &str, timeout: Option<Duration>, seq: Option<u64>) -> RestResult {
        self.get(url, timeout, true, seq).await
    }

    /// A child-specified arbitrary path under the node server's profile.
    pub async fn request(
        &self,
        profile_number: u32,
        segments: &[&str],
        timeout: Option<Duration>,
        seq: Option<u64>,
    ) -> RestResult {
        let segment_opts: Vec<Option<&str>> = segments.iter().map(|s| Some(*s)).collect();
        self.call(profile_number, &segment_opts, &[], timeout, true, seq).await
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ControllerConfig;
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
    async fn report_node_status_builds_prefixed_path() {
        std::env::remove_var("PG_RETRIES");
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/ns/1/nodes/n001_light/report/status/ST/80/51"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = RestClient::new(config_for(&server));
        let result = client
            .report_node_status(1, "light", "ST", 80.0, Some(51), None, Some(1001))
            .await;
        assert_eq!(result.status_code, 200);
        assert_eq!(result.seq, Some(1001));
    }
}
