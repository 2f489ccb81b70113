//! Action events published around form saves and operations
//!
//! Views publish a [`ActionEvent`] with [`EventPhase::Pre`] right before they
//! write to the datastore and one with [`EventPhase::Post`] once the write
//! has committed. Subscribers hang audit logs, cache invalidation and the
//! like off the bus without the views knowing about them.
//!
//! ```rust,ignore
//! let mut rx = kibble.events().subscribe();
//! while let Ok(envelope) = rx.recv().await {
//!     if envelope.event.phase == EventPhase::Post {
//!         tracing::info!(action = %envelope.event.action, "committed");
//!     }
//! }
//! ```

use crate::core::key::Key;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// When the event fires relative to the datastore write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPhase {
    Pre,
    Post,
}

/// A view action about to run or just completed
#[derive(Debug, Clone, Serialize)]
pub struct ActionEvent {
    pub phase: EventPhase,
    /// Action name, e.g. `edit`, `create`, `delete`
    pub action: String,
    /// Model path, e.g. `Author/Book`
    pub path: String,
    /// The instance acted upon; unset before a create commits
    pub key: Option<Key>,
    pub ancestor_key: Option<Key>,
}

impl ActionEvent {
    pub fn pre(action: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            phase: EventPhase::Pre,
            action: action.into(),
            path: path.into(),
            key: None,
            ancestor_key: None,
        }
    }

    pub fn with_key(mut self, key: Option<Key>) -> Self {
        self.key = key;
        self
    }

    pub fn with_ancestor(mut self, ancestor_key: Option<Key>) -> Self {
        self.ancestor_key = ancestor_key;
        self
    }

    /// The matching post event, carrying the committed key
    pub fn committed(&self, key: Option<Key>) -> Self {
        Self {
            phase: EventPhase::Post,
            key: key.or_else(|| self.key.clone()),
            ..self.clone()
        }
    }
}

/// Envelope wrapping an action event with metadata
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event: ActionEvent,
}

impl EventEnvelope {
    pub fn new(event: ActionEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Broadcast-based event bus
///
/// Cheap to clone; slow receivers lose events and see `Lagged` on their
/// next `recv()`.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers; returns how many received it
    pub fn publish(&self, event: ActionEvent) -> usize {
        tracing::debug!(
            phase = ?event.phase,
            action = %event.action,
            path = %event.path,
            "publishing action event"
        );
        // send() only fails when nobody is subscribed
        self.sender.send(EventEnvelope::new(event)).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_committed_event_keeps_context() {
        let pre = ActionEvent::pre("create", "Author/Book").with_ancestor(Some(Key::new("Author", 1)));
        let post = pre.committed(Some(Key::new("Author", 1).child("Book", 2)));

        assert_eq!(post.phase, EventPhase::Post);
        assert_eq!(post.action, "create");
        assert_eq!(post.ancestor_key, Some(Key::new("Author", 1)));
        assert_eq!(post.key, Some(Key::new("Author", 1).child("Book", 2)));
    }

    #[test]
    fn test_event_serialization() {
        let event = ActionEvent::pre("delete", "Author").with_key(Some(Key::new("Author", 3)));
        let json = serde_json::to_value(EventEnvelope::new(event)).unwrap();
        assert_eq!(json["event"]["phase"], "pre");
        assert_eq!(json["event"]["action"], "delete");
        assert_eq!(json["event"]["key"], Key::new("Author", 3).urlsafe());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        assert_eq!(bus.publish(ActionEvent::pre("edit", "Author")), 0);
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        assert_eq!(bus.publish(ActionEvent::pre("edit", "Author")), 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event.action, "edit");
        assert_eq!(received.event.phase, EventPhase::Pre);
    }
}
