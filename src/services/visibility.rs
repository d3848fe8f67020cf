//! Single owner of visibility changes for a display node.
//!
//! Components register named handlers instead of watching visibility
//! themselves. A resume after a long absence runs a catch-up: cheap handlers
//! first, then the heavy reloads strictly one after another.

use std::{
    cmp::Reverse,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use futures::{FutureExt, future::BoxFuture};
use indexmap::IndexMap;
use thiserror::Error;
use tokio::{
    sync::{Mutex, RwLock},
    time::{Duration, Instant, sleep},
};
use tracing::{debug, info, warn};

use crate::{config::VisibilityConfig, dao::BackendError, transport::TransportError};

/// Failure reported by a visibility handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// A backend call failed.
    #[error("backend call failed")]
    Backend(#[from] BackendError),
    /// Publishing on the sync channel failed.
    #[error("sync channel failed")]
    Transport(#[from] TransportError),
    /// Anything else.
    #[error("{0}")]
    Failed(String),
}

/// Callback run on a visibility change.
pub type HandlerFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

/// A named registration.
#[derive(Clone)]
pub struct VisibilityHandler {
    name: String,
    priority: i32,
    allow_catch_up: bool,
    on_visible: Option<HandlerFn>,
    on_hidden: Option<HandlerFn>,
}

impl VisibilityHandler {
    /// Handler with priority 0 that does not take part in catch-up.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            allow_catch_up: false,
            on_visible: None,
            on_hidden: None,
        }
    }

    /// Higher runs first.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Defer `on_visible` to the sequential phase of a catch-up.
    pub fn allow_catch_up(mut self, allow: bool) -> Self {
        self.allow_catch_up = allow;
        self
    }

    /// Run `callback` when the display becomes visible.
    pub fn on_visible<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.on_visible = Some(Arc::new(move || callback().boxed()));
        self
    }

    /// Run `callback` when the display becomes hidden.
    pub fn on_hidden<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.on_hidden = Some(Arc::new(move || callback().boxed()));
        self
    }

    /// Registration name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

struct VisibilityState {
    is_visible: bool,
    last_visible: Instant,
    last_hidden: Option<Instant>,
}

/// Debounced dispatcher of visibility changes.
pub struct TabVisibilityCoordinator {
    settings: VisibilityConfig,
    handlers: RwLock<IndexMap<String, VisibilityHandler>>,
    state: Mutex<VisibilityState>,
    generation: AtomicU64,
    catch_up: AtomicBool,
}

impl TabVisibilityCoordinator {
    /// Coordinator for a display that starts visible.
    pub fn new(settings: VisibilityConfig) -> Arc<Self> {
        Arc::new(Self {
            settings,
            handlers: RwLock::new(IndexMap::new()),
            state: Mutex::new(VisibilityState {
                is_visible: true,
                last_visible: Instant::now(),
                last_hidden: None,
            }),
            generation: AtomicU64::new(0),
            catch_up: AtomicBool::new(false),
        })
    }

    /// Register `handler`, replacing one with the same name.
    pub async fn register(&self, handler: VisibilityHandler) {
        debug!(handler = handler.name(), priority = handler.priority, "visibility handler registered");
        self.handlers
            .write()
            .await
            .insert(handler.name.clone(), handler);
    }

    /// Remove the handler named `name`.
    pub async fn unregister(&self, name: &str) -> bool {
        self.handlers.write().await.shift_remove(name).is_some()
    }

    /// Visibility after the last applied change.
    pub async fn is_visible(&self) -> bool {
        self.state.lock().await.is_visible
    }

    /// Whether a catch-up pass is running.
    pub fn is_catch_up_in_progress(&self) -> bool {
        self.catch_up.load(Ordering::SeqCst)
    }

    /// Report a visibility change; it applies once no further change arrives
    /// within the debounce window.
    pub fn set_visible(self: &Arc<Self>, visible: bool) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            sleep(coordinator.settings.debounce).await;
            if coordinator.generation.load(Ordering::SeqCst) != generation {
                debug!(visible, "visibility change superseded");
                return;
            }
            coordinator.apply(visible).await;
        });
    }

    async fn apply(&self, visible: bool) {
        let hidden_for = {
            let mut state = self.state.lock().await;
            if state.is_visible == visible {
                return;
            }
            state.is_visible = visible;
            let now = Instant::now();
            if visible {
                state.last_visible = now;
                state.last_hidden.map(|hidden_at| now - hidden_at)
            } else {
                debug!(visible_for = ?(now - state.last_visible), "display hidden");
                state.last_hidden = Some(now);
                None
            }
        };

        let handlers = self.ordered_handlers().await;
        if !visible {
            for handler in &handlers {
                if let Some(callback) = &handler.on_hidden {
                    invoke(&handler.name, callback, "hidden").await;
                }
            }
            return;
        }

        match hidden_for {
            Some(hidden_for) if hidden_for > self.settings.catch_up_threshold => {
                self.catch_up(handlers, hidden_for).await
            }
            _ => {
                for handler in &handlers {
                    if let Some(callback) = &handler.on_visible {
                        invoke(&handler.name, callback, "visible").await;
                    }
                }
            }
        }
    }

    async fn catch_up(&self, handlers: Vec<VisibilityHandler>, hidden_for: Duration) {
        if self
            .catch_up
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("catch-up already running; ignoring resume");
            return;
        }
        let _guard = CatchUpGuard(&self.catch_up);
        info!(hidden_secs = hidden_for.as_secs(), "long absence; starting catch-up");

        let (heavy, light): (Vec<_>, Vec<_>) =
            handlers.into_iter().partition(|handler| handler.allow_catch_up);
        for handler in &light {
            if let Some(callback) = &handler.on_visible {
                invoke(&handler.name, callback, "visible").await;
            }
        }

        sleep(self.settings.catch_up_delay).await;
        let mut first = true;
        for handler in &heavy {
            let Some(callback) = &handler.on_visible else {
                continue;
            };
            if !first {
                sleep(self.settings.inter_handler_pause).await;
            }
            first = false;
            invoke(&handler.name, callback, "catch-up").await;
        }
        info!("catch-up finished");
    }

    async fn ordered_handlers(&self) -> Vec<VisibilityHandler> {
        let mut handlers: Vec<_> = self.handlers.read().await.values().cloned().collect();
        handlers.sort_by_key(|handler| Reverse(handler.priority));
        handlers
    }
}

struct CatchUpGuard<'a>(&'a AtomicBool);

impl Drop for CatchUpGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

async fn invoke(name: &str, callback: &HandlerFn, event: &'static str) {
    let callback = Arc::clone(callback);
    match AssertUnwindSafe(async move { callback().await })
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => debug!(handler = name, event, "visibility handler done"),
        Ok(Err(err)) => warn!(handler = name, event, error = %err, "visibility handler failed"),
        Err(_) => warn!(handler = name, event, "visibility handler panicked"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;

    type Log = Arc<StdMutex<Vec<String>>>;

    fn settings() -> VisibilityConfig {
        VisibilityConfig {
            debounce: Duration::from_millis(100),
            catch_up_threshold: Duration::from_secs(300),
            catch_up_delay: Duration::from_secs(2),
            inter_handler_pause: Duration::from_millis(100),
        }
    }

    fn record(log: &Log, entry: impl Into<String>) {
        log.lock().unwrap().push(entry.into());
    }

    fn tracked(log: &Log, name: &str, priority: i32, allow_catch_up: bool, work: Duration) -> VisibilityHandler {
        let on_visible_log = log.clone();
        let on_hidden_log = log.clone();
        let visible_name = name.to_string();
        let hidden_name = name.to_string();
        VisibilityHandler::new(name)
            .priority(priority)
            .allow_catch_up(allow_catch_up)
            .on_visible(move || {
                let log = on_visible_log.clone();
                let name = visible_name.clone();
                async move {
                    record(&log, format!("{name}:start"));
                    sleep(work).await;
                    record(&log, format!("{name}:end"));
                    Ok::<(), HandlerError>(())
                }
            })
            .on_hidden(move || {
                let log = on_hidden_log.clone();
                let name = hidden_name.clone();
                async move {
                    record(&log, format!("{name}:hidden"));
                    Ok::<(), HandlerError>(())
                }
            })
    }

    fn buggy_handler() -> Result<(), HandlerError> {
        panic!("handler bug")
    }

    async fn change(coordinator: &Arc<TabVisibilityCoordinator>, visible: bool) {
        coordinator.set_visible(visible);
        sleep(Duration::from_millis(150)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn short_absence_resumes_in_priority_order() {
        let log: Log = Arc::default();
        let coordinator = TabVisibilityCoordinator::new(settings());
        coordinator.register(tracked(&log, "low", 10, false, Duration::ZERO)).await;
        coordinator.register(tracked(&log, "high", 30, false, Duration::ZERO)).await;
        coordinator.register(tracked(&log, "mid", 20, true, Duration::ZERO)).await;

        change(&coordinator, false).await;
        assert!(!coordinator.is_visible().await);
        sleep(Duration::from_secs(10)).await;
        change(&coordinator, true).await;

        assert_eq!(
            *log.lock().unwrap(),
            [
                "high:hidden", "mid:hidden", "low:hidden",
                "high:start", "high:end", "mid:start", "mid:end", "low:start", "low:end",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn long_absence_runs_catch_up_sequentially() {
        let log: Log = Arc::default();
        let coordinator = TabVisibilityCoordinator::new(settings());
        coordinator.register(tracked(&log, "polling", 30, false, Duration::from_millis(10))).await;
        coordinator.register(tracked(&log, "analytics", 20, true, Duration::from_millis(500))).await;
        coordinator.register(tracked(&log, "draws", 10, true, Duration::from_millis(500))).await;

        change(&coordinator, false).await;
        sleep(Duration::from_secs(301)).await;
        log.lock().unwrap().clear();

        coordinator.set_visible(true);
        sleep(Duration::from_millis(200)).await;
        assert!(coordinator.is_catch_up_in_progress());
        assert_eq!(*log.lock().unwrap(), ["polling:start", "polling:end"]);

        sleep(Duration::from_secs(5)).await;
        assert!(!coordinator.is_catch_up_in_progress());
        assert_eq!(
            *log.lock().unwrap(),
            [
                "polling:start", "polling:end",
                "analytics:start", "analytics:end",
                "draws:start", "draws:end",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_toggling_is_coalesced() {
        let log: Log = Arc::default();
        let coordinator = TabVisibilityCoordinator::new(settings());
        coordinator.register(tracked(&log, "polling", 30, false, Duration::ZERO)).await;

        coordinator.set_visible(false);
        sleep(Duration::from_millis(20)).await;
        coordinator.set_visible(true);
        sleep(Duration::from_millis(500)).await;

        assert!(coordinator.is_visible().await);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_handlers_do_not_block_the_rest() {
        let log: Log = Arc::default();
        let coordinator = TabVisibilityCoordinator::new(settings());
        coordinator
            .register(
                VisibilityHandler::new("broken")
                    .priority(50)
                    .on_hidden(|| async { Err::<(), _>(HandlerError::Failed("boom".into())) }),
            )
            .await;
        coordinator
            .register(
                VisibilityHandler::new("panicky")
                    .priority(40)
                    .on_hidden(|| async { buggy_handler() }),
            )
            .await;
        coordinator.register(tracked(&log, "polling", 30, false, Duration::ZERO)).await;

        change(&coordinator, false).await;
        assert_eq!(*log.lock().unwrap(), ["polling:hidden"]);
    }

    #[tokio::test(start_paused = true)]
    async fn unregistered_handlers_are_not_called() {
        let log: Log = Arc::default();
        let coordinator = TabVisibilityCoordinator::new(settings());
        coordinator.register(tracked(&log, "polling", 30, false, Duration::ZERO)).await;

        assert!(coordinator.unregister("polling").await);
        assert!(!coordinator.unregister("polling").await);
        change(&coordinator, false).await;
        assert!(log.lock().unwrap().is_empty());
    }
}
