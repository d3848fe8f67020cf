use futures::future::BoxFuture;

use crate::{
    dao::error::BackendResult,
    dto::backend::SaveRoundRequest,
    state::manual_override::ManualOverride,
};

/// Abstraction over the draw-control backend.
pub trait GameBackend: Send + Sync {
    /// Query the primary manual-number endpoint.
    fn fetch_primary_override(&self) -> BoxFuture<'static, BackendResult<ManualOverride>>;
    /// Query the fallback sync endpoint.
    fn fetch_fallback_override(&self) -> BoxFuture<'static, BackendResult<ManualOverride>>;
    /// Persist the round data of the current state.
    fn save_round(&self, request: SaveRoundRequest) -> BoxFuture<'static, BackendResult<()>>;
    /// Load the recorded spin log, oldest first.
    fn load_analytics(&self) -> BoxFuture<'static, BackendResult<Vec<u8>>>;
}

#[cfg(test)]
pub mod testing {
    //! Scripted backend for service tests.

    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use super::*;
    use crate::dao::error::BackendError;

    /// Canned answers, consumed front to back; the last one repeats.
    #[derive(Default)]
    pub struct ScriptedBackend {
        pub primary: Mutex<VecDeque<Option<ManualOverride>>>,
        pub fallback: Mutex<VecDeque<Option<ManualOverride>>>,
        pub spins: Mutex<Vec<u8>>,
        pub saved: Arc<Mutex<Vec<SaveRoundRequest>>>,
        pub save_delay: Option<Duration>,
    }

    fn next(queue: &Mutex<VecDeque<Option<ManualOverride>>>, endpoint: &'static str) -> BackendResult<ManualOverride> {
        let mut queue = queue.lock().unwrap();
        let answer = if queue.len() > 1 {
            queue.pop_front().flatten()
        } else {
            queue.front().cloned().flatten()
        };
        answer.ok_or(BackendError::MissingEndpoint { endpoint })
    }

    impl ScriptedBackend {
        /// Primary answers in order; `None` simulates a failed request.
        pub fn with_primary(answers: impl IntoIterator<Item = Option<ManualOverride>>) -> Self {
            Self {
                primary: Mutex::new(answers.into_iter().collect()),
                ..Self::default()
            }
        }

        /// Add fallback answers.
        pub fn and_fallback(self, answers: impl IntoIterator<Item = Option<ManualOverride>>) -> Self {
            *self.fallback.lock().unwrap() = answers.into_iter().collect();
            self
        }
    }

    impl GameBackend for ScriptedBackend {
        fn fetch_primary_override(&self) -> BoxFuture<'static, BackendResult<ManualOverride>> {
            let answer = next(&self.primary, "primary");
            Box::pin(async move { answer })
        }

        fn fetch_fallback_override(&self) -> BoxFuture<'static, BackendResult<ManualOverride>> {
            let answer = next(&self.fallback, "fallback");
            Box::pin(async move { answer })
        }

        fn save_round(&self, request: SaveRoundRequest) -> BoxFuture<'static, BackendResult<()>> {
            let saved = self.saved.clone();
            let delay = self.save_delay;
            Box::pin(async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                saved.lock().unwrap().push(request);
                Ok(())
            })
        }

        fn load_analytics(&self) -> BoxFuture<'static, BackendResult<Vec<u8>>> {
            let spins = self.spins.lock().unwrap().clone();
            Box::pin(async move { Ok(spins) })
        }
    }
}
