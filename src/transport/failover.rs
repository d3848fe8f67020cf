use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use futures::future::BoxFuture;
use tokio::sync::watch;
use tracing::warn;

use crate::{
    dto::messages::Envelope,
    transport::{
        BroadcastChannel, Subscription, TransportKind, TransportResult,
        native::NativeChannel, storage::StorageChannel,
    },
};

/// Native channel with a storage-polling fallback.
///
/// Once switched to storage the endpoint stays there for the rest of the
/// session.
pub struct FailoverChannel {
    native: Option<Arc<NativeChannel>>,
    storage: Arc<StorageChannel>,
    active: Arc<watch::Sender<TransportKind>>,
    closed: Arc<AtomicBool>,
}

impl FailoverChannel {
    /// Start on `native` when present, otherwise directly on `storage`.
    pub fn new(native: Option<Arc<NativeChannel>>, storage: Arc<StorageChannel>) -> Self {
        let initial = if native.is_some() {
            TransportKind::Native
        } else {
            TransportKind::Storage
        };
        let (active, _rx) = watch::channel(initial);
        Self {
            native,
            storage,
            active: Arc::new(active),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

fn switch_to_storage(active: &watch::Sender<TransportKind>, reason: &str) {
    let switched = active.send_if_modified(|kind| {
        if *kind == TransportKind::Storage {
            false
        } else {
            *kind = TransportKind::Storage;
            true
        }
    });
    if switched {
        warn!(reason, "native broadcast failed irrecoverably; using storage polling for this session");
    }
}

impl BroadcastChannel for FailoverChannel {
    fn send(&self, envelope: Envelope) -> BoxFuture<'static, TransportResult<()>> {
        let native = self.native.clone();
        let storage = self.storage.clone();
        let active = self.active.clone();

        Box::pin(async move {
            if *active.borrow() == TransportKind::Native {
                if let Some(native) = native {
                    match native.send(envelope.clone()).await {
                        Ok(()) => return Ok(()),
                        Err(err) if err.is_irrecoverable() => {
                            switch_to_storage(&active, &err.to_string());
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
            storage.send(envelope).await
        })
    }

    fn subscribe(&self) -> TransportResult<Subscription> {
        // receivers are created before returning so nothing sent afterwards is missed
        let on_native = *self.active.borrow() == TransportKind::Native;
        let native_inbound = match (&self.native, on_native) {
            (Some(native), true) => match native.subscribe() {
                Ok(inbound) => Some(inbound),
                Err(err) if err.is_irrecoverable() => {
                    switch_to_storage(&self.active, &err.to_string());
                    None
                }
                Err(err) => return Err(err),
            },
            _ => None,
        };
        let storage_inbound = match native_inbound {
            Some(_) => None,
            None => Some(self.storage.subscribe()?),
        };

        let storage = self.storage.clone();
        let active = self.active.clone();
        let closed = self.closed.clone();
        let mut active_rx = self.active.subscribe();
        let (tx, rx) = Subscription::channel();

        let task = tokio::spawn(async move {
            if let Some(mut inbound) = native_inbound {
                loop {
                    tokio::select! {
                        received = inbound.recv() => match received {
                            Some(envelope) => {
                                if tx.send(envelope).await.is_err() {
                                    return;
                                }
                            }
                            None => break,
                        },
                        _ = active_rx.changed() => break,
                    }
                }
                if closed.load(Ordering::Acquire) {
                    return;
                }
                // the native stream only ends on its own when the hub is gone
                switch_to_storage(&active, "native subscription ended");
            }

            let mut inbound = match storage_inbound {
                Some(inbound) => inbound,
                None => match storage.subscribe() {
                    Ok(inbound) => inbound,
                    Err(err) => {
                        warn!(error = %err, "storage subscription refused");
                        return;
                    }
                },
            };
            while let Some(envelope) = inbound.recv().await {
                if tx.send(envelope).await.is_err() {
                    return;
                }
            }
        });

        Ok(Subscription::new(rx, task))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(native) = &self.native {
            native.close();
        }
        self.storage.close();
    }

    fn kind(&self) -> TransportKind {
        *self.active.borrow()
    }
}
