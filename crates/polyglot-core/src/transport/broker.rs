//! Broker transport: topic-pair pub/sub, interchangeable with stdio from the
//! router's perspective. This core ships an in-process
//! [`BrokerClient`] implementation suitable for single-process testing; a
//! real deployment wires an MQTT (or similar) SDK behind the same trait —
//! no specific broker vendor is mandated by the protocol.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::message::Message;
use crate::queue::RequestQueue;

use super::trait_def::{Received, Transport, TransportHandle};

/// Publish/subscribe seam a broker transport is built on. `publish` sends
/// one message to a topic; `subscribe` registers a channel that receives
/// every message later published to that topic.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn publish(&self, topic: &str, msg: Message) -> Result<(), TransportError>;
    fn subscribe(&self, topic: &str) -> mpsc::Receiver<Message>;
}

/// In-process broker: topics are `HashMap<String, Vec<mpsc::Sender>>`
/// fanned out under a mutex. No network I/O; useful for tests and for
/// single-host deployments that don't need a real broker.
#[derive(Default)]
pub struct InProcessBroker {
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<Message>>>>,
}

impl InProcessBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl BrokerClient for InProcessBroker {
    async fn publish(&self, topic: &str, msg: Message) -> Result<(), TransportError> {
        let subs = {
            let map = self.subscribers.lock().expect("broker mutex poisoned");
            map.get(topic).cloned().unwrap_or_default()
        };
        if subs.is_empty() {
            return Err(TransportError::NoSubscriber {
                topic: topic.to_string(),
            });
        }
        for sub in subs {
            let _ = sub.send(msg.clone()).await;
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(4096);
        self.subscribers
            .lock()
            .expect("broker mutex poisoned")
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        rx
    }
}

pub struct BrokerTransport {
    broker: Arc<dyn BrokerClient>,
    publish_topic: String,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for BrokerTransport {
    async fn send(&self, msg: Message) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.broker.publish(&self.publish_topic, msg).await
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Topic names for a given node server `name`:
/// Polyglot publishes to `udi/polyglot/<name>/node` and receives on
/// `udi/polyglot/<name>/poly`.
pub fn node_topic(name: &str) -> String {
    format!("udi/polyglot/{name}/node")
}

pub fn poly_topic(name: &str) -> String {
    format!("udi/polyglot/{name}/poly")
}

/// Subscribe to `poly_topic(name)` and build a [`TransportHandle`] that
/// publishes to `node_topic(name)`.
pub fn spawn(broker: Arc<dyn BrokerClient>, name: &str) -> TransportHandle {
    let mut poly_rx = broker.subscribe(&poly_topic(name));
    let queue = RequestQueue::new();
    let queue_reader = queue.clone();

    tokio::spawn(async move {
        while let Some(msg) = poly_rx.recv().await {
            queue_reader.push(Received::Message(msg)).await;
        }
        queue_reader.close();
    });

    TransportHandle {
        transport: Box::new(BrokerTransport {
            broker,
            publish_topic: node_topic(name),
            closed: Arc::new(AtomicBool::new(false)),
        }),
        inbound: queue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_with_no_subscriber_is_reported_not_panicked() {
        let broker = InProcessBroker::new();
        let err = broker
            .publish("udi/polyglot/hue/node", Message(serde_json::json!({"ping":{}})))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NoSubscriber { .. }));
    }

    #[tokio::test]
    async fn node_and_poly_transport_handles_are_independent_topics() {
        let broker: Arc<dyn BrokerClient> = InProcessBroker::new();
        let handle = spawn(broker.clone(), "hue");

        // Simulate the child publishing on the poly topic.
        broker
            .publish(&poly_topic("hue"), Message(serde_json::json!({"pong":{}})))
            .await
            .unwrap();

        let inbound = handle.inbound;
        let received = inbound.recv().await.unwrap();
        assert!(matches!(received, Received::Message(_)));

        // Sending via the handle goes out on the node topic, not poly.
        let mut child_rx = broker.subscribe(&node_topic("hue"));
        handle
            .transport
            .send(Message(serde_json::json!({"ping":{}})))
            .await
            .unwrap();
        let from_polyglot = child_rx.recv().await.unwrap();
        assert_eq!(from_polyglot.0["ping"], serde_json::json!({}));
    }
}
