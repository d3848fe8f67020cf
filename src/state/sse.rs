use serde::Serialize;
use tokio::sync::broadcast;

use crate::dto::messages::Envelope;

/// Whether this node published a message or applied one it received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventDirection {
    /// Published by this node.
    Sent,
    /// Received and applied by this node.
    Applied,
}

/// One sync message seen by this node.
#[derive(Debug, Clone, Serialize)]
pub struct SyncEvent {
    /// Direction of the message.
    pub direction: EventDirection,
    /// The message as it travelled.
    pub envelope: Envelope,
}

/// Simple broadcast hub wrapper used by the SSE services.
pub struct SseHub {
    sender: broadcast::Sender<SyncEvent>,
}

impl SseHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, ignoring delivery errors.
    pub fn broadcast(&self, direction: EventDirection, envelope: Envelope) {
        let _ = self.sender.send(SyncEvent {
            direction,
            envelope,
        });
    }
}

impl Default for SseHub {
    fn default() -> Self {
        Self::new(64)
    }
}
