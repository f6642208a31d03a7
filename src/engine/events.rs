use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// A typed event published to a room. Rooms are keyed by client
/// (`client_<id>` / legacy `client-<id>`) or by client-scoped summaries
/// (`summaries-<id>`), per §4.9.
#[derive(Debug, Clone, Serialize)]
pub struct ReductionEvent {
    pub event_type: &'static str,
    pub timestamp: DateTime<Utc>,
    pub client_id: String,
    #[serde(flatten)]
    pub payload: Value,
}

/// Publish-only fabric: best-effort, at-most-once per subscriber,
/// non-durable. Within one room events are ordered by emission time;
/// there is no cross-room ordering guarantee.
pub struct EventBus {
    rooms: Mutex<HashMap<String, broadcast::Sender<ReductionEvent>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self { rooms: Mutex::new(HashMap::new()) }
    }

    pub fn subscribe(&self, room: &str) -> broadcast::Receiver<ReductionEvent> {
        let mut rooms = self.rooms.lock().unwrap();
        rooms
            .entry(room.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .subscribe()
    }

    /// Publish to a single room. Dropped silently if nobody is listening —
    /// delivery is best-effort.
    pub fn publish(&self, room: &str, event: ReductionEvent) {
        let rooms = self.rooms.lock().unwrap();
        if let Some(tx) = rooms.get(room) {
            let _ = tx.send(event);
        }
    }

    /// Publish to both the canonical and legacy client rooms.
    pub fn publish_to_client(&self, client_id: &str, event: ReductionEvent) {
        self.publish(&format!("client_{client_id}"), event.clone());
        self.publish(&format!("client-{client_id}"), event);
    }

    pub fn publish_to_summaries(&self, client_id: &str, event: ReductionEvent) {
        self.publish(&format!("summaries-{client_id}"), event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("client_C1");
        bus.publish(
            "client_C1",
            ReductionEvent {
                event_type: "net-reduction:api-saved",
                timestamp: Utc::now(),
                client_id: "C1".into(),
                payload: json!({ "entryId": "e1" }),
            },
        );
        let received = rx.try_recv().unwrap();
        assert_eq!(received.event_type, "net-reduction:api-saved");
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish_to_client(
            "C1",
            ReductionEvent { event_type: "net-reduction:manual-updated", timestamp: Utc::now(), client_id: "C1".into(), payload: json!({}) },
        );
    }

    #[test]
    fn canonical_and_legacy_rooms_both_receive() {
        let bus = EventBus::new();
        let mut canonical = bus.subscribe("client_C1");
        let mut legacy = bus.subscribe("client-C1");
        bus.publish_to_client(
            "C1",
            ReductionEvent { event_type: "net-reduction:csv-processed", timestamp: Utc::now(), client_id: "C1".into(), payload: json!({}) },
        );
        assert!(canonical.try_recv().is_ok());
        assert!(legacy.try_recv().is_ok());
    }
}
