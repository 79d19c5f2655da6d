//! The per-server bounded request queue described in spec §5: a soft cap
//! (4096) on buffered inbound traffic. A full queue means a stuck child; per
//! the drop policy, the oldest queued `statistics` request is evicted to
//! make room for new traffic before any command is dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tracing::warn;

use crate::message::Message;
use crate::transport::Received;

/// Soft cap referenced by spec §5 ("e.g. 4096").
pub const SOFT_CAP: usize = 4096;

struct Inner {
    items: Mutex<VecDeque<Received>>,
    notify: Notify,
    closed: AtomicBool,
}

/// A bounded, priority-aware inbound queue shared between a transport's
/// reader task (producer) and a server's request-dispatcher task
/// (consumer). Cheaply `Clone`able; all clones share the same backing queue.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<Inner>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                items: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Enqueue one decoded item. At the soft cap, evicts the oldest queued
    /// `statistics` request before falling back to dropping the oldest entry
    /// outright (a command, since nothing nonessential was left to evict).
    pub async fn push(&self, item: Received) {
        let mut items = self.inner.items.lock().await;
        if items.len() >= SOFT_CAP {
            if let Some(pos) = items.iter().position(is_statistics) {
                items.remove(pos);
                warn!("request queue at soft cap; dropped a queued statistics request to make room");
            } else if items.pop_front().is_some() {
                warn!("request queue at soft cap with no statistics request to evict; dropped the oldest entry");
            }
        }
        items.push_back(item);
        drop(items);
        self.inner.notify.notify_one();
    }

    /// Mark the queue closed: once drained, `recv` returns `None` instead of
    /// waiting forever. Called by the transport's reader task when the
    /// underlying stream ends.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Wait for the next item, or `None` once the queue is closed and
    /// drained.
    pub async fn recv(&self) -> Option<Received> {
        loop {
            {
                let mut items = self.inner.items.lock().await;
                if let Some(item) = items.pop_front() {
                    return Some(item);
                }
                if self.inner.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.inner.notify.notified().await;
        }
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn is_statistics(item: &Received) -> bool {
    matches!(item, Received::Message(Message(v)) if v.get("statistics").is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statistics_item() -> Received {
        Received::Message(Message(serde_json::json!({"statistics": {}})))
    }

    fn pong_item() -> Received {
        Received::Message(Message(serde_json::json!({"pong": {}})))
    }

    #[tokio::test]
    async fn fifo_order_preserved_under_soft_cap() {
        let queue = RequestQueue::new();
        queue.push(pong_item()).await;
        queue.push(statistics_item()).await;
        let first = queue.recv().await.unwrap();
        assert!(matches!(first, Received::Message(Message(v)) if v.get("pong").is_some()));
        let second = queue.recv().await.unwrap();
        assert!(matches!(second, Received::Message(Message(v)) if v.get("statistics").is_some()));
    }

    #[tokio::test]
    async fn closed_and_drained_queue_returns_none() {
        let queue = RequestQueue::new();
        queue.push(pong_item()).await;
        queue.close();
        assert!(queue.recv().await.is_some());
        assert!(queue.recv().await.is_none());
    }

    #[tokio::test]
    async fn overflow_evicts_oldest_statistics_request_first() {
        let queue = RequestQueue::new();
        for _ in 0..SOFT_CAP {
            queue.push(pong_item()).await;
        }
        queue.push(statistics_item()).await;
        // At cap again; the next push should evict the statistics entry just
        // queued rather than a pong, since it's the only nonessential one.
        queue.push(pong_item()).await;

        let mut saw_statistics = false;
        while let Some(item) = queue.recv().await {
            if is_statistics(&item) {
                saw_statistics = true;
            }
        }
        assert!(!saw_statistics, "statistics request should have been evicted under pressure");
    }
}
