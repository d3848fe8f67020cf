//! Pub/sub channel shared by every display of a session.
//!
//! Two implementations sit behind [`BroadcastChannel`]: in-process broadcast
//! hubs ([`native`]) and a polled shared key ([`storage`]). [`open_channel`]
//! picks one at construction time and wraps it in a [`failover::FailoverChannel`]
//! so an irrecoverable native failure degrades to polling for the rest of the
//! session.

pub mod failover;
pub mod native;
pub mod session;
pub mod storage;

use std::{io, sync::Arc, time::Duration};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dto::messages::{Envelope, SyncMessage};

use self::{
    failover::FailoverChannel,
    native::{NativeChannel, NativeRegistry},
    storage::{SharedStorage, StorageChannel},
};

/// Buffer between a subscription task and its consumer.
const SUBSCRIPTION_BUFFER: usize = 64;

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Failures raised by a broadcast channel implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The primitive cannot be used at all.
    #[error("channel `{channel}` unavailable: {reason}")]
    Unavailable {
        /// Channel name.
        channel: String,
        /// Why the primitive refused.
        reason: String,
    },
    /// The endpoint was closed locally.
    #[error("channel closed")]
    Closed,
    /// A message could not be encoded.
    #[error("failed to encode message")]
    Encode(#[source] serde_json::Error),
    /// A stored payload could not be decoded.
    #[error("failed to decode stored message under `{key}`")]
    Decode {
        /// Storage key the payload was read from.
        key: String,
        /// Underlying decoder error.
        #[source]
        source: serde_json::Error,
    },
    /// The shared storage rejected a read or write.
    #[error("storage access failed for `{key}`")]
    Storage {
        /// Storage key being accessed.
        key: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl TransportError {
    /// Whether the failure means the primitive is gone for good.
    pub fn is_irrecoverable(&self) -> bool {
        matches!(self, TransportError::Unavailable { .. })
    }
}

/// Which implementation carries the channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// In-process broadcast hub.
    #[default]
    Native,
    /// Polled shared storage key.
    Storage,
}

impl TransportKind {
    /// Lowercase name used in logs and health payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Native => "native",
            TransportKind::Storage => "storage",
        }
    }
}

/// Abstraction over the session-wide pub/sub primitive.
///
/// An endpoint never receives envelopes it published itself.
pub trait BroadcastChannel: Send + Sync {
    /// Publish an envelope to every other endpoint.
    fn send(&self, envelope: Envelope) -> BoxFuture<'static, TransportResult<()>>;
    /// Start receiving envelopes published by other endpoints.
    fn subscribe(&self) -> TransportResult<Subscription>;
    /// Stop the endpoint; live subscriptions end.
    fn close(&self);
    /// Implementation currently in use.
    fn kind(&self) -> TransportKind;
}

/// Stream of inbound envelopes; dropping it stops the forwarding task.
pub struct Subscription {
    receiver: mpsc::Receiver<Envelope>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Wrap a receiver fed by `task`.
    pub fn new(receiver: mpsc::Receiver<Envelope>, task: JoinHandle<()>) -> Self {
        Self {
            receiver,
            task: Some(task),
        }
    }

    /// Build a bounded pipe; the sender goes to the forwarding task.
    pub fn channel() -> (mpsc::Sender<Envelope>, mpsc::Receiver<Envelope>) {
        mpsc::channel(SUBSCRIPTION_BUFFER)
    }

    /// Next envelope, or `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Transport settings resolved from configuration.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Preferred implementation.
    pub preferred: TransportKind,
    /// Name of the native hub.
    pub channel_name: String,
    /// Shared key used by the storage fallback.
    pub storage_key: String,
    /// Polling period of the storage fallback.
    pub poll_interval: Duration,
}

/// Everything needed to open endpoints on the same session channel.
#[derive(Clone)]
pub struct ChannelFactory {
    registry: Arc<NativeRegistry>,
    storage: Arc<dyn SharedStorage>,
    settings: TransportSettings,
}

impl ChannelFactory {
    /// Bundle the process-wide registry and storage with the settings.
    pub fn new(
        registry: Arc<NativeRegistry>,
        storage: Arc<dyn SharedStorage>,
        settings: TransportSettings,
    ) -> Self {
        Self {
            registry,
            storage,
            settings,
        }
    }

    /// Open a new endpoint with a fresh origin id.
    pub fn open(&self) -> SyncChannel {
        open_channel(
            &self.registry,
            self.storage.clone(),
            &self.settings,
            Uuid::new_v4().to_string(),
        )
    }
}

/// Select and build the channel implementation for one endpoint.
///
/// Native construction failures are logged and the endpoint starts on storage
/// polling instead.
pub fn open_channel(
    registry: &NativeRegistry,
    storage: Arc<dyn SharedStorage>,
    settings: &TransportSettings,
    origin: String,
) -> SyncChannel {
    let fallback = Arc::new(StorageChannel::new(
        storage,
        settings.storage_key.clone(),
        origin.clone(),
        settings.poll_interval,
    ));

    let native = match settings.preferred {
        TransportKind::Native => match NativeChannel::open(registry, &settings.channel_name, &origin)
        {
            Ok(channel) => Some(Arc::new(channel)),
            Err(err) => {
                warn!(
                    channel = %settings.channel_name,
                    error = %err,
                    "native broadcast unavailable; falling back to storage polling"
                );
                None
            }
        },
        TransportKind::Storage => None,
    };

    let channel = FailoverChannel::new(native, fallback);
    debug!(origin = %origin, transport = channel.kind().as_str(), "opened broadcast endpoint");
    SyncChannel {
        inner: Arc::new(channel),
        origin,
    }
}

/// Cloneable endpoint handle used by coordinators.
///
/// Send failures are logged and swallowed; the display keeps its last known
/// state.
#[derive(Clone)]
pub struct SyncChannel {
    inner: Arc<dyn BroadcastChannel>,
    origin: String,
}

impl SyncChannel {
    /// Wrap an arbitrary implementation.
    pub fn from_channel(inner: Arc<dyn BroadcastChannel>, origin: impl Into<String>) -> Self {
        Self {
            inner,
            origin: origin.into(),
        }
    }

    /// Stamp and publish a message. Returns the envelope that went out.
    pub async fn send(&self, message: SyncMessage) -> Option<Envelope> {
        let envelope = Envelope::new(message).with_origin(self.origin.clone());
        self.send_envelope(envelope).await
    }

    /// Publish a pre-built envelope (relayed from a remote display).
    pub async fn send_envelope(&self, mut envelope: Envelope) -> Option<Envelope> {
        envelope.origin = Some(self.origin.clone());
        let kind = envelope.message.kind();
        match self.inner.send(envelope.clone()).await {
            Ok(()) => Some(envelope),
            Err(err) => {
                warn!(message = kind, error = %err, "failed to publish sync message");
                None
            }
        }
    }

    /// Subscribe to envelopes from other endpoints.
    pub fn subscribe(&self) -> TransportResult<Subscription> {
        self.inner.subscribe()
    }

    /// Close the endpoint.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Implementation currently in use.
    pub fn kind(&self) -> TransportKind {
        self.inner.kind()
    }

    /// Origin id stamped on outgoing envelopes.
    pub fn origin(&self) -> &str {
        &self.origin
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::timeout;

    use super::{storage::MemoryStorage, *};

    fn settings(preferred: TransportKind) -> TransportSettings {
        TransportSettings {
            preferred,
            channel_name: "roulette-sync-channel".into(),
            storage_key: "roulette-game-state".into(),
            poll_interval: Duration::from_millis(1000),
        }
    }

    fn client_connect(id: &str) -> SyncMessage {
        SyncMessage::ClientConnect {
            client_id: id.into(),
        }
    }

    #[tokio::test]
    async fn native_endpoints_see_each_other_but_not_themselves() {
        let factory = ChannelFactory::new(
            Arc::new(NativeRegistry::new()),
            Arc::new(MemoryStorage::new()),
            settings(TransportKind::Native),
        );
        let master = factory.open();
        let client = factory.open();
        assert_eq!(master.kind(), TransportKind::Native);

        let mut master_inbox = master.subscribe().unwrap();
        let mut client_inbox = client.subscribe().unwrap();

        client.send(client_connect("session_a")).await.unwrap();

        let received = timeout(Duration::from_secs(1), master_inbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.message, client_connect("session_a"));
        assert!(
            timeout(Duration::from_millis(50), client_inbox.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn messages_sent_right_after_subscribing_are_delivered() {
        let factory = ChannelFactory::new(
            Arc::new(NativeRegistry::new()),
            Arc::new(MemoryStorage::new()),
            settings(TransportKind::Native),
        );
        let master = factory.open();
        let client = factory.open();

        // no yield between subscribing and sending
        let mut inbox = master.subscribe().unwrap();
        client.send(client_connect("session_x")).await.unwrap();
        client.send(client_connect("session_y")).await.unwrap();

        for expected in ["session_x", "session_y"] {
            let received = timeout(Duration::from_secs(1), inbox.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(received.message, client_connect(expected));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn storage_subscription_exists_before_the_first_send() {
        let factory = ChannelFactory::new(
            Arc::new(NativeRegistry::new()),
            Arc::new(MemoryStorage::new()),
            settings(TransportKind::Storage),
        );
        let sender = factory.open();
        let receiver = factory.open();

        let mut inbox = receiver.subscribe().unwrap();
        sender.send(client_connect("session_z")).await.unwrap();

        let received = timeout(Duration::from_millis(1500), inbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.message, client_connect("session_z"));
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_native_primitive_falls_back_to_storage() {
        let factory = ChannelFactory::new(
            Arc::new(NativeRegistry::unavailable()),
            Arc::new(MemoryStorage::new()),
            settings(TransportKind::Native),
        );
        let sender = factory.open();
        let receiver = factory.open();
        assert_eq!(sender.kind(), TransportKind::Storage);
        assert_eq!(receiver.kind(), TransportKind::Storage);

        let mut inbox = receiver.subscribe().unwrap();
        sender.send(client_connect("session_b")).await.unwrap();

        let received = timeout(Duration::from_millis(1000), inbox.recv())
            .await
            .expect("delivered within one polling interval")
            .unwrap();
        assert_eq!(received.message, client_connect("session_b"));
    }

    #[tokio::test(start_paused = true)]
    async fn revoked_native_hub_switches_to_storage_mid_session() {
        let registry = Arc::new(NativeRegistry::new());
        let factory = ChannelFactory::new(
            registry.clone(),
            Arc::new(MemoryStorage::new()),
            settings(TransportKind::Native),
        );
        let sender = factory.open();
        let receiver = factory.open();
        let mut inbox = receiver.subscribe().unwrap();

        registry.revoke("roulette-sync-channel");

        sender.send(client_connect("session_c")).await.unwrap();
        assert_eq!(sender.kind(), TransportKind::Storage);

        let received = timeout(Duration::from_millis(1000), inbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.message, client_connect("session_c"));
        assert_eq!(receiver.kind(), TransportKind::Storage);
    }
}
