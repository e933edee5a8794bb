//! Single-process pub/sub fan-out (§4.10).
//!
//! Every publish goes to a broadcast channel; each subscriber gets its own bounded forwarding
//! task so one slow WebSocket client cannot back-pressure the publisher — it is disconnected
//! instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

/// One message on the bus. Mirrors the `/ws` envelope's `type` values (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum QntxEvent {
    AttestationCreated { id: String },
    JobStateChanged { job_id: String, status: String },
    WatcherFired { watcher_id: String, attestation_id: String },
    PluginStateChanged { plugin_name: String, state: String },
    RichSearchResults { query: String, count: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub event: QntxEvent,
    pub occurred_at: DateTime<Utc>,
}

/// How many outstanding messages a single slow subscriber tolerates before being dropped.
const SUBSCRIBER_QUEUE_DEPTH: usize = 256;
const BUS_CAPACITY: usize = 1024;

pub struct EventBus {
    sender: broadcast::Sender<Envelope>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, event: QntxEvent) {
        let envelope = Envelope { event, occurred_at: Utc::now() };
        // No subscribers is not an error; the bus is fire-and-forget.
        let _ = self.sender.send(envelope);
    }

    /// Returns a per-subscriber bounded receiver fed by a forwarding task. When the subscriber
    /// falls behind past [`SUBSCRIBER_QUEUE_DEPTH`], the forwarding task exits and the
    /// subscriber's channel closes — the subscriber observes this as a closed stream.
    pub fn subscribe(&self) -> mpsc::Receiver<Envelope> {
        let mut broadcast_rx = self.sender.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_DEPTH);

        tokio::spawn(async move {
            loop {
                match broadcast_rx.recv().await {
                    Ok(envelope) => {
                        if tx.try_send(envelope).is_err() {
                            warn!("subscriber queue full or closed, disconnecting");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "subscriber lagged behind the event bus, disconnecting");
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        rx
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_is_delivered_to_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(QntxEvent::AttestationCreated { id: "asid_abc".to_string() });

        let envelope = rx.recv().await.unwrap();
        match envelope.event {
            QntxEvent::AttestationCreated { id } => assert_eq!(id, "asid_abc"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_error() {
        let bus = EventBus::new();
        bus.publish(QntxEvent::JobStateChanged { job_id: "j1".to_string(), status: "completed".to_string() });
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_the_event() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        bus.publish(QntxEvent::WatcherFired { watcher_id: "w1".to_string(), attestation_id: "a1".to_string() });

        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }
}
