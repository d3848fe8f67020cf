//! Polling fallback over a shared key-value store.
//!
//! `send` overwrites a single well-known key with `{message, timestamp}`;
//! subscribers poll the key and forward entries newer than the last one they
//! saw. Two sends inside one polling period collapse to the latest, which the
//! periodic full-state broadcast repairs.

use std::{
    io::ErrorKind,
    path::PathBuf,
    sync::{Arc, atomic::{AtomicBool, Ordering}},
    time::Duration,
};

use dashmap::DashMap;
use futures::future::{self, BoxFuture};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{Mutex, watch},
    time::{MissedTickBehavior, interval},
};
use tracing::{trace, warn};

use crate::{
    dto::{messages::Envelope, now_millis},
    transport::{
        BroadcastChannel, Subscription, TransportError, TransportKind, TransportResult,
    },
};

/// Minimal shared key-value store.
pub trait SharedStorage: Send + Sync {
    /// Read the value under `key`.
    fn get(&self, key: &str) -> BoxFuture<'static, TransportResult<Option<String>>>;
    /// Overwrite the value under `key`.
    fn set(&self, key: &str, value: String) -> BoxFuture<'static, TransportResult<()>>;
}

/// Process-local storage shared by every endpoint holding the same `Arc`.
#[derive(Default, Clone)]
pub struct MemoryStorage {
    entries: Arc<DashMap<String, String>>,
}

impl MemoryStorage {
    /// Empty storage.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SharedStorage for MemoryStorage {
    fn get(&self, key: &str) -> BoxFuture<'static, TransportResult<Option<String>>> {
        let value = self.entries.get(key).map(|entry| entry.value().clone());
        Box::pin(future::ready(Ok(value)))
    }

    fn set(&self, key: &str, value: String) -> BoxFuture<'static, TransportResult<()>> {
        self.entries.insert(key.to_string(), value);
        Box::pin(future::ready(Ok(())))
    }
}

/// Directory-backed storage, one `<key>.json` file per key, shared across
/// processes on the same host.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Store files under `dir`, created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl SharedStorage for FileStorage {
    fn get(&self, key: &str) -> BoxFuture<'static, TransportResult<Option<String>>> {
        let path = self.path(key);
        let key = key.to_string();
        Box::pin(async move {
            match tokio::fs::read_to_string(&path).await {
                Ok(contents) => Ok(Some(contents)),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
                Err(source) => Err(TransportError::Storage { key, source }),
            }
        })
    }

    fn set(&self, key: &str, value: String) -> BoxFuture<'static, TransportResult<()>> {
        let dir = self.dir.clone();
        let path = self.path(key);
        let staging = self.dir.join(format!("{key}.json.tmp"));
        let key = key.to_string();
        Box::pin(async move {
            let write = async {
                tokio::fs::create_dir_all(&dir).await?;
                tokio::fs::write(&staging, value).await?;
                tokio::fs::rename(&staging, &path).await
            };
            write
                .await
                .map_err(|source| TransportError::Storage { key, source })
        })
    }
}

/// Value stored under the shared key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    /// Last published envelope.
    pub message: Envelope,
    /// Write time in unix ms, strictly increasing across writes.
    pub timestamp: u64,
}

/// Endpoint polling the shared key.
pub struct StorageChannel {
    storage: Arc<dyn SharedStorage>,
    key: String,
    origin: String,
    poll_interval: Duration,
    write_gate: Arc<Mutex<()>>,
    closed: Arc<AtomicBool>,
    close_signal: watch::Sender<bool>,
}

impl StorageChannel {
    /// Endpoint `origin` on `key`, polling every `poll_interval`.
    pub fn new(
        storage: Arc<dyn SharedStorage>,
        key: String,
        origin: String,
        poll_interval: Duration,
    ) -> Self {
        let (close_signal, _rx) = watch::channel(false);
        Self {
            storage,
            key,
            origin,
            poll_interval,
            write_gate: Arc::new(Mutex::new(())),
            closed: Arc::new(AtomicBool::new(false)),
            close_signal,
        }
    }
}

async fn read_entry(
    storage: &dyn SharedStorage,
    key: &str,
) -> TransportResult<Option<StoredEntry>> {
    let Some(raw) = storage.get(key).await? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| TransportError::Decode {
            key: key.to_string(),
            source,
        })
}

impl BroadcastChannel for StorageChannel {
    fn send(&self, envelope: Envelope) -> BoxFuture<'static, TransportResult<()>> {
        let storage = self.storage.clone();
        let key = self.key.clone();
        let gate = self.write_gate.clone();
        let closed = self.closed.load(Ordering::Acquire);

        Box::pin(async move {
            if closed {
                return Err(TransportError::Closed);
            }
            let _guard = gate.lock().await;

            // a corrupt entry must not block new writes
            let previous = match read_entry(storage.as_ref(), &key).await {
                Ok(entry) => entry.map_or(0, |entry| entry.timestamp),
                Err(err @ TransportError::Decode { .. }) => {
                    warn!(key = %key, error = %err, "overwriting undecodable storage entry");
                    0
                }
                Err(err) => return Err(err),
            };
            let timestamp = now_millis().max(previous + 1);
            let entry = StoredEntry {
                message: envelope,
                timestamp,
            };
            let raw = serde_json::to_string(&entry).map_err(TransportError::Encode)?;
            storage.set(&key, raw).await?;
            trace!(key = %key, timestamp, "storage broadcast written");
            Ok(())
        })
    }

    fn subscribe(&self) -> TransportResult<Subscription> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let storage = self.storage.clone();
        let key = self.key.clone();
        let origin = self.origin.clone();
        let period = self.poll_interval;
        let mut closed = self.close_signal.subscribe();
        let (tx, rx) = Subscription::channel();

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last_seen = 0u64;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = closed.changed() => break,
                }

                let entry = match read_entry(storage.as_ref(), &key).await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => continue,
                    Err(err) => {
                        warn!(key = %key, error = %err, "storage poll failed");
                        continue;
                    }
                };
                if entry.timestamp <= last_seen {
                    continue;
                }
                last_seen = entry.timestamp;

                if entry.message.origin.as_deref() == Some(origin.as_str()) {
                    continue;
                }
                trace!(key = %key, timestamp = entry.timestamp, "storage poll picked up message");
                if tx.send(entry.message).await.is_err() {
                    break;
                }
            }
        });

        Ok(Subscription::new(rx, task))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.close_signal.send_replace(true);
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Storage
    }
}
