use axum::{Json, Router, extract::State, routing::get};

use crate::{dto::snapshot::StateResponse, services::state_service, state::SharedState};

/// Current game state of this node with its role and session.
pub async fn current_state(State(state): State<SharedState>) -> Json<StateResponse> {
    Json(state_service::snapshot(&state).await)
}

/// Configure the state inspection route.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/state", get(current_state))
}
