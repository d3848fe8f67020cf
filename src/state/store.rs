use std::sync::Arc;

use tokio::sync::RwLock;

use crate::state::game::GameState;

/// Owning handle on a node's [`GameState`]; held only by the active coordinator.
pub struct GameStateStore {
    inner: Arc<RwLock<GameState>>,
}

impl GameStateStore {
    /// Take ownership of `state`.
    pub fn new(state: GameState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    /// Read-only handle for everything else.
    pub fn view(&self) -> GameStateView {
        GameStateView {
            inner: self.inner.clone(),
        }
    }

    /// Copy of the current state.
    pub async fn snapshot(&self) -> GameState {
        self.inner.read().await.clone()
    }

    /// Mutate the state in place.
    pub async fn update<R>(&self, mutate: impl FnOnce(&mut GameState) -> R) -> R {
        let mut guard = self.inner.write().await;
        mutate(&mut guard)
    }

    /// Overwrite the whole state.
    pub async fn replace(&self, state: GameState) {
        *self.inner.write().await = state;
    }
}

/// Read-only view of a node's [`GameState`].
#[derive(Clone)]
pub struct GameStateView {
    inner: Arc<RwLock<GameState>>,
}

impl GameStateView {
    /// Copy of the current state.
    pub async fn snapshot(&self) -> GameState {
        self.inner.read().await.clone()
    }
}
