use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::warn;

const BROADCAST_CAPACITY: usize = 256;

/// Fan-out events to all connected WS clients via tokio broadcast channel.
///
/// Every event is a JSON object `{ "event", "seq", "data" }`.
pub struct EventBroadcaster {
    tx: broadcast::Sender<String>,
    seq: AtomicU64,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            tx,
            seq: AtomicU64::new(0),
        }
    }

    /// New client subscribes to the broadcast stream.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn subscribers(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Serialize `data` under `event` and push it to all subscribers.
    /// Silently drops if no subscribers exist.
    pub fn emit<T: Serialize>(&self, event: &str, data: &T) {
        let data = match serde_json::to_value(data) {
            Ok(v) => v,
            Err(e) => {
                warn!(%event, "event not serializable: {e}");
                return;
            }
        };
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let payload = json!({ "event": event, "seq": seq, "data": data }).to_string();
        let _ = self.tx.send(payload);
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_sequenced_events() {
        let b = EventBroadcaster::new();
        let mut rx = b.subscribe();
        b.emit("schedule_fired", &json!({"id": 1}));
        b.emit("poll_result", &json!({"pollId": "P1"}));

        let first: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        let second: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(first["event"], "schedule_fired");
        assert_eq!(first["data"]["id"], 1);
        assert_eq!(second["seq"], 1);
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        let b = EventBroadcaster::new();
        b.emit("poll_result", &json!({}));
        assert_eq!(b.subscribers(), 0);
    }
}
