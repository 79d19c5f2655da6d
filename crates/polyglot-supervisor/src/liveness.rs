//! Periodic ping/pong liveness loop: every tick, each `Running` server
//! that's due for a ping either gets one, or — if it never answered the
//! last one — gets a warning logged and another ping issued. After
//! [`polyglot_core::model::KILL_AFTER_MISSED_PINGS`] consecutive misses
//! (60 s, at the 30 s ping interval) the child is killed outright.
//!
//! Killing on liveness failure is not the same as *respawning* on it:
//! `restart` remains always operator- or Manager-triggered, so this loop
//! tears the unresponsive child down and stops there — it never calls back
//! into anything above the supervisor to bring it back up.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use polyglot_core::model::KILL_AFTER_MISSED_PINGS;
use polyglot_core::{OutboundCommand, ServerState};
use tracing::warn;

use crate::Supervisor;

pub const PING_INTERVAL: Duration = Duration::from_secs(30);
const TICK: Duration = Duration::from_secs(5);

/// What a liveness tick should do about one `Running` server, decided from
/// its record alone so the decision is testable without real sleeps.
#[derive(Debug, PartialEq, Eq)]
enum TickAction {
    /// Not due for a ping yet, or not `Running`.
    Noop,
    /// Send a ping now (first one, or a follow-up after a non-fatal miss).
    SendPing,
    /// Missed `KILL_AFTER_MISSED_PINGS` in a row; tear the child down.
    Kill,
}

/// Pure decision for one server at one liveness tick. Mutates `rec`'s
/// `missed_pings`/`last_ping_sent` bookkeeping in place; the caller acts on
/// the returned [`TickAction`].
fn decide(rec: &mut polyglot_core::ServerRecord, now: Instant) -> TickAction {
    if rec.state != ServerState::Running {
        return TickAction::Noop;
    }
    if !rec.ping_due(now, PING_INTERVAL) {
        return TickAction::Noop;
    }
    if !rec.is_responsive() {
        rec.missed_pings += 1;
        if rec.missed_pings >= KILL_AFTER_MISSED_PINGS {
            return TickAction::Kill;
        }
        rec.last_ping_sent = Some(now);
        return TickAction::SendPing;
    }
    rec.last_ping_sent = Some(now);
    TickAction::SendPing
}

/// Runs until every other `Arc<Supervisor>` is dropped; holds only a `Weak`
/// reference itself so this background task can't keep the supervisor (and
/// thus the whole process tree) alive past its own shutdown.
pub fn spawn(supervisor: &Arc<Supervisor>) {
    let registry = supervisor.registry().clone();
    let supervisor: Weak<Supervisor> = Arc::downgrade(supervisor);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK);
        loop {
            interval.tick().await;
            let Some(supervisor) = supervisor.upgrade() else {
                break;
            };
            let now = Instant::now();
            for handle in registry.all_handles().await {
                let mut rec = handle.lock().await;
                let action = decide(&mut rec, now);
                match action {
                    TickAction::Noop => {}
                    TickAction::SendPing => {
                        if rec.missed_pings > 0 {
                            warn!("server {} missed its last ping, pinging again", rec.base_key);
                        }
                        let tx = rec.outbound_tx.clone();
                        let base_key = rec.base_key.clone();
                        drop(rec);
                        if tx.send(OutboundCommand::Ping.into_message()).await.is_err() {
                            warn!("could not send ping to {base_key}: outbound channel closed");
                        }
                    }
                    TickAction::Kill => {
                        let base_key = rec.base_key.clone();
                        drop(rec);
                        warn!("server {base_key} missed {KILL_AFTER_MISSED_PINGS} consecutive pings, killing");
                        if let Err(e) = supervisor.kill(&base_key).await {
                            warn!("failed to kill unresponsive server {base_key}: {e}");
                        }
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyglot_core::{ServerRecord, TransportKind};

    fn test_record() -> ServerRecord {
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
        rec.state = ServerState::Running;
        rec
    }

    #[test]
    fn first_tick_sends_a_ping() {
        let mut rec = test_record();
        assert_eq!(decide(&mut rec, Instant::now()), TickAction::SendPing);
    }

    #[test]
    fn not_yet_due_is_a_noop() {
        let mut rec = test_record();
        let now = Instant::now();
        assert_eq!(decide(&mut rec, now), TickAction::SendPing);
        assert_eq!(decide(&mut rec, now), TickAction::Noop);
    }

    #[test]
    fn non_running_state_is_always_a_noop() {
        let mut rec = test_record();
        rec.state = ServerState::Stopping;
        assert_eq!(decide(&mut rec, Instant::now()), TickAction::Noop);
    }

    #[test]
    fn one_missed_interval_warns_and_resends() {
        let mut rec = test_record();
        let t0 = Instant::now();
        assert_eq!(decide(&mut rec, t0), TickAction::SendPing);
        let t1 = t0 + PING_INTERVAL;
        assert_eq!(decide(&mut rec, t1), TickAction::SendPing);
        assert_eq!(rec.missed_pings, 1);
    }

    #[test]
    fn second_consecutive_missed_interval_kills() {
        let mut rec = test_record();
        let t0 = Instant::now();
        assert_eq!(decide(&mut rec, t0), TickAction::SendPing);
        let t1 = t0 + PING_INTERVAL;
        assert_eq!(decide(&mut rec, t1), TickAction::SendPing);
        let t2 = t1 + PING_INTERVAL;
        assert_eq!(decide(&mut rec, t2), TickAction::Kill);
    }

    #[test]
    fn pong_between_intervals_resets_missed_count() {
        let mut rec = test_record();
        let t0 = Instant::now();
        assert_eq!(decide(&mut rec, t0), TickAction::SendPing);
        let t1 = t0 + PING_INTERVAL;
        assert_eq!(decide(&mut rec, t1), TickAction::SendPing);
        assert_eq!(rec.missed_pings, 1);

        rec.last_pong_received = Some(t1 + Duration::from_secs(1));
        rec.missed_pings = 0;

        let t2 = t1 + PING_INTERVAL;
        assert_eq!(decide(&mut rec, t2), TickAction::SendPing);
        assert_eq!(rec.missed_pings, 0);
    }
}
