use axum::Router;

use crate::state::SharedState;

pub mod health;
pub mod sse;
pub mod state;
pub mod visibility;
pub mod websocket;

/// Compose all route trees and wire in the shared state.
pub fn router(state: SharedState) -> Router<()> {
    health::router()
        .merge(state::router())
        .merge(sse::router())
        .merge(websocket::router())
        .merge(visibility::router())
        .with_state(state)
}
