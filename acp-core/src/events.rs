//! Event broadcast for downstream consumers (live UI push).
//!
//! Fire-and-forget: events are JSON lines on a tokio broadcast channel;
//! nobody listening is fine, slow listeners lag and skip.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::warn;

const EVENT_BUFFER: usize = 128;

/// Event name emitted after every successful repository refresh.
pub const EVENT_REPO_UPDATED: &str = "repository.updated";

/// Broadcast channel for control-plane events (JSON lines).
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<String>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER);
        Self { sender }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    /// Emit a structured event with payload.
    pub fn emit<T: Serialize>(&self, event: &str, data: &T) {
        let envelope = json!({
            "event": event,
            "data": data,
            "timestamp": Utc::now().to_rfc3339(),
        });
        match serde_json::to_string(&envelope) {
            Ok(line) => {
                let _ = self.sender.send(line);
            }
            Err(err) => warn!("Failed to serialize event {}: {}", event, err),
        }
    }

    /// Notify downstream consumers that a repository catalog was refreshed.
    pub fn repo_updated(&self, repo: &str) {
        self.emit(EVENT_REPO_UPDATED, &json!({ "repo": repo }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn emit_sends_json_envelope() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit("test.event", &json!({"answer": 42}));

        let line = tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("broadcast recv failed");
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["event"], "test.event");
        assert_eq!(parsed["data"]["answer"], 42);
        chrono::DateTime::parse_from_rfc3339(parsed["timestamp"].as_str().unwrap())
            .expect("timestamp should be RFC3339");
    }

    #[tokio::test]
    async fn repo_updated_names_the_repository() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.repo_updated("stable");

        let line = rx.recv().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["event"], EVENT_REPO_UPDATED);
        assert_eq!(parsed["data"]["repo"], "stable");
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_harmless() {
        let bus = EventBus::new();
        bus.repo_updated("stable");
    }
}
