use std::sync::Arc;

use crate::{
    dto::messages::{Envelope, SyncMessage},
    state::{EventDirection, SseHub},
    transport::{SyncChannel, Subscription, TransportResult},
};

/// A node's endpoint on the session channel plus its SSE tap.
#[derive(Clone)]
pub struct Publisher {
    channel: SyncChannel,
    events: Arc<SseHub>,
}

impl Publisher {
    /// Pair `channel` with the event hub.
    pub fn new(channel: SyncChannel, events: Arc<SseHub>) -> Self {
        Self { channel, events }
    }

    /// Publish `message`; failures are logged by the channel.
    pub async fn publish(&self, message: SyncMessage) {
        if let Some(envelope) = self.channel.send(message).await {
            self.events.broadcast(EventDirection::Sent, envelope);
        }
    }

    /// Report an inbound envelope as applied.
    pub fn applied(&self, envelope: &Envelope) {
        self.events
            .broadcast(EventDirection::Applied, envelope.clone());
    }

    /// Subscribe to envelopes from other endpoints.
    pub fn subscribe(&self) -> TransportResult<Subscription> {
        self.channel.subscribe()
    }

    /// The underlying endpoint.
    pub fn channel(&self) -> &SyncChannel {
        &self.channel
    }
}
