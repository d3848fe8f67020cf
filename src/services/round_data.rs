use std::{sync::Arc, time::Duration};

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{
    dao::{BackendError, BackendResult, GameBackend},
    dto::{backend::SaveRoundRequest, now_millis},
    state::game::GameState,
};

/// Round persistence and spin-log loading against the backend.
pub struct RoundDataService {
    backend: Arc<dyn GameBackend>,
    flush_timeout: Duration,
}

impl RoundDataService {
    /// Service bounded by `flush_timeout` on shutdown.
    pub fn new(backend: Arc<dyn GameBackend>, flush_timeout: Duration) -> Self {
        Self {
            backend,
            flush_timeout,
        }
    }

    /// Post the persisted subset of `state`.
    pub async fn save(&self, state: &GameState) -> BackendResult<()> {
        let request = SaveRoundRequest::from_state(state, now_millis());
        debug!(numbers = %request.numbers, draw = %request.last_draw, "saving round data");
        self.backend.save_round(request).await
    }

    /// [`RoundDataService::save`], logging instead of failing.
    pub async fn save_logged(&self, state: &GameState) {
        match self.save(state).await {
            Ok(()) => {}
            Err(err @ BackendError::MissingEndpoint { .. }) => {
                debug!(error = %err, "round data not saved")
            }
            Err(err) => warn!(error = %err, "failed to save round data"),
        }
    }

    /// Recorded spin log, oldest first.
    pub async fn load_spin_log(&self) -> BackendResult<Vec<u8>> {
        let spins = self.backend.load_analytics().await?;
        debug!(spins = spins.len(), "spin log loaded");
        Ok(spins)
    }

    /// Best-effort save on shutdown, never longer than the flush timeout.
    /// Returns whether the backend acknowledged it.
    pub async fn flush_on_unload(&self, state: &GameState) -> bool {
        match timeout(self.flush_timeout, self.save(state)).await {
            Ok(Ok(())) => {
                info!("round data flushed on shutdown");
                true
            }
            Ok(Err(err)) => {
                warn!(error = %err, "round data flush failed");
                false
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.flush_timeout.as_millis() as u64,
                    "round data flush timed out"
                );
                false
            }
        }
    }
}
