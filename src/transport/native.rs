//! In-process broadcast hubs keyed by channel name.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::{self, BoxFuture};
use tokio::sync::{
    broadcast::{self, error::RecvError},
    watch,
};
use tracing::{trace, warn};

use crate::{
    dto::messages::Envelope,
    transport::{
        BroadcastChannel, Subscription, TransportError, TransportKind, TransportResult,
    },
};

const HUB_CAPACITY: usize = 256;

/// One named hub shared by every endpoint that opened it.
struct NativeHub {
    sender: broadcast::Sender<Envelope>,
    revoked: watch::Sender<bool>,
}

impl NativeHub {
    fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(HUB_CAPACITY);
        let (revoked, _rx) = watch::channel(false);
        Self { sender, revoked }
    }

    fn is_revoked(&self) -> bool {
        *self.revoked.borrow()
    }
}

/// Process-wide registry of broadcast hubs.
pub struct NativeRegistry {
    hubs: DashMap<String, Arc<NativeHub>>,
    available: bool,
}

impl NativeRegistry {
    /// Registry on which hubs can be opened.
    pub fn new() -> Self {
        Self {
            hubs: DashMap::new(),
            available: true,
        }
    }

    /// Registry modelling a runtime without the primitive: every open fails.
    pub fn unavailable() -> Self {
        Self {
            hubs: DashMap::new(),
            available: false,
        }
    }

    fn hub(&self, channel: &str) -> TransportResult<Arc<NativeHub>> {
        if !self.available {
            return Err(TransportError::Unavailable {
                channel: channel.to_string(),
                reason: "broadcast primitive not supported".into(),
            });
        }
        if channel.is_empty() {
            return Err(TransportError::Unavailable {
                channel: channel.to_string(),
                reason: "empty channel name".into(),
            });
        }

        let hub = self
            .hubs
            .entry(channel.to_string())
            .or_insert_with(|| Arc::new(NativeHub::new()))
            .clone();
        if hub.is_revoked() {
            return Err(TransportError::Unavailable {
                channel: channel.to_string(),
                reason: "hub revoked".into(),
            });
        }
        Ok(hub)
    }

    /// Tear a hub down; its endpoints fail with [`TransportError::Unavailable`].
    pub fn revoke(&self, channel: &str) {
        if let Some((_, hub)) = self.hubs.remove(channel) {
            hub.revoked.send_replace(true);
        }
    }
}

impl Default for NativeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Endpoint on a native hub.
pub struct NativeChannel {
    channel: String,
    origin: String,
    hub: Arc<NativeHub>,
    closed: watch::Sender<bool>,
}

impl NativeChannel {
    /// Open `channel` on `registry` for the endpoint `origin`.
    pub fn open(registry: &NativeRegistry, channel: &str, origin: &str) -> TransportResult<Self> {
        let hub = registry.hub(channel)?;
        let (closed, _rx) = watch::channel(false);
        Ok(Self {
            channel: channel.to_string(),
            origin: origin.to_string(),
            hub,
            closed,
        })
    }

    fn check_usable(&self) -> TransportResult<()> {
        if *self.closed.borrow() {
            return Err(TransportError::Closed);
        }
        if self.hub.is_revoked() {
            return Err(TransportError::Unavailable {
                channel: self.channel.clone(),
                reason: "hub revoked".into(),
            });
        }
        Ok(())
    }
}

impl BroadcastChannel for NativeChannel {
    fn send(&self, envelope: Envelope) -> BoxFuture<'static, TransportResult<()>> {
        let result = self.check_usable().map(|()| {
            // no live receiver is not an error for a pub/sub channel
            let receivers = self.hub.sender.send(envelope).unwrap_or(0);
            trace!(channel = %self.channel, receivers, "native broadcast sent");
        });
        Box::pin(future::ready(result))
    }

    fn subscribe(&self) -> TransportResult<Subscription> {
        self.check_usable()?;

        let mut inbound = self.hub.sender.subscribe();
        let mut revoked = self.hub.revoked.subscribe();
        let mut closed = self.closed.subscribe();
        let origin = self.origin.clone();
        let channel = self.channel.clone();
        let (tx, rx) = Subscription::channel();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = inbound.recv() => match received {
                        Ok(envelope) => {
                            if envelope.origin.as_deref() == Some(origin.as_str()) {
                                continue;
                            }
                            if tx.send(envelope).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(channel = %channel, skipped, "native subscriber lagged; messages dropped");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = revoked.changed() => break,
                    _ = closed.changed() => break,
                }
            }
        });

        Ok(Subscription::new(rx, task))
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Native
    }
}
