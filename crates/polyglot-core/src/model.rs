//! The data model: `ServerRecord`, `DiagStats`, and supporting enums.
//!
//! `ServerRecord` is not `Sync` on its own; callers share it behind
//! `Arc<Mutex<ServerRecord>>` in the registry, the same shape
//! `session_registry.rs`'s `SessionRegistry` uses for `SessionRecord`.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::message::Message;

/// Number of consecutive missed liveness pings (30 s apart) the supervisor
/// tolerates before killing the child outright, per the 30s-warn/60s-kill
/// liveness scenario.
pub const KILL_AFTER_MISSED_PINGS: u32 = 2;

/// How a node server exchanges [`Message`]s with Polyglot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Stdio,
    Broker,
}

/// Lifecycle state of a [`ServerRecord`], per the supervisor state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    New,
    Starting,
    Running,
    Stopping,
    Killed,
    Dead,
}

/// One per running (or recently-exited) node server.
pub struct ServerRecord {
    pub base_key: String,
    pub platform: String,
    pub profile_number: u32,
    pub name: String,
    pub config: Value,
    pub sandbox_path: std::path::PathBuf,
    pub transport_kind: TransportKind,
    pub state: ServerState,
    pub process_id: Option<u32>,
    pub last_ping_sent: Option<Instant>,
    pub last_pong_received: Option<Instant>,
    /// Consecutive liveness ticks found this server unresponsive. Reset to 0
    /// whenever a pong arrives; the liveness loop kills the server once this
    /// reaches [`crate::model::KILL_AFTER_MISSED_PINGS`].
    pub missed_pings: u32,
    pub connected: bool,
    pub exit_requested: bool,
    /// Outbound messages to write to the child's stdin/broker publish side.
    pub outbound_tx: mpsc::Sender<Message>,
    /// Whether this server has claimed `IAmManager` privileges.
    pub is_privileged: bool,
}

impl ServerRecord {
    pub fn new(
        base_key: String,
        platform: String,
        profile_number: u32,
        name: String,
        config: Value,
        sandbox_path: std::path::PathBuf,
        transport_kind: TransportKind,
        outbound_tx: mpsc::Sender<Message>,
    ) -> Self {
        Self {
            base_key,
            platform,
            profile_number,
            name,
            config,
            sandbox_path,
            transport_kind,
            state: ServerState::New,
            process_id: None,
            last_ping_sent: None,
            last_pong_received: None,
            missed_pings: 0,
            connected: false,
            exit_requested: false,
            outbound_tx,
            is_privileged: false,
        }
    }

    /// A child is responsive iff no ping is outstanding, or the last pong
    /// arrived after the last ping was sent.
    pub fn is_responsive(&self) -> bool {
        match (self.last_ping_sent, self.last_pong_received) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(sent), Some(recv)) => recv >= sent,
        }
    }

    /// Whether `interval` has elapsed since the last ping (or none was ever
    /// sent). Callers still need [`Self::is_responsive`] to tell a "send the
    /// next ping" tick apart from a "the last one went unanswered" tick.
    pub fn ping_due(&self, now: Instant, interval: Duration) -> bool {
        match self.last_ping_sent {
            None => true,
            Some(sent) => now.duration_since(sent) >= interval,
        }
    }
}

/// Diagnostic counters for the controller REST client. One shared instance
/// per controller, mutated under a mutex from any REST worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiagStats {
    pub total_requests: u64,
    pub total_retries: u64,
    pub ok_count: u64,
    pub error_count: u64,
    pub sum_elapsed_seconds: f64,
    pub max_elapsed_seconds: f64,
    pub min_elapsed_seconds: f64,
}

impl DiagStats {
    pub fn record(&mut self, ok: bool, elapsed_seconds: f64, retries: u32) {
        self.total_requests += 1;
        self.total_retries += retries as u64;
        if ok {
            self.ok_count += 1;
        } else {
            self.error_count += 1;
        }
        self.sum_elapsed_seconds += elapsed_seconds;
        if self.total_requests == 1 {
            self.max_elapsed_seconds = elapsed_seconds;
            self.min_elapsed_seconds = elapsed_seconds;
        } else {
            self.max_elapsed_seconds = self.max_elapsed_seconds.max(elapsed_seconds);
            self.min_elapsed_seconds = self.min_elapsed_seconds.min(elapsed_seconds);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diag_stats_invariant_holds_after_mixed_calls() {
        let mut stats = DiagStats::default();
        stats.record(true, 0.1, 0);
        stats.record(false, 2.0, 3);
        stats.record(true, 0.5, 1);
        assert_eq!(stats.ok_count + stats.error_count, stats.total_requests);
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.total_retries, 4);
        assert!((stats.max_elapsed_seconds - 2.0).abs() < f64::EPSILON);
        assert!((stats.min_elapsed_seconds - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn responsive_without_outstanding_ping() {
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let rec = ServerRecord::new(
            "abc12".into(),
            "hue".into(),
            1,
            "Hue".into(),
            serde_json::json!({}),
            std::path::PathBuf::from("/tmp"),
            TransportKind::Stdio,
            tx,
        );
        assert!(rec.is_responsive());
    }

    #[test]
    fn unresponsive_after_ping_without_pong() {
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let mut rec = ServerRecord::new(
            "abc12".into(),
            "hue".into(),
            1,
            "Hue".into(),
            serde_json::json!({}),
            std::path::PathBuf::from("/tmp"),
            TransportKind::Stdio,
            tx,
        );
        rec.last_ping_sent = Some(Instant::now());
        assert!(!rec.is_responsive());
    }
}
