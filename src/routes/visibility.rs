use axum::{Json, Router, extract::State, http::StatusCode, routing::post};

use crate::{dto::snapshot::VisibilityRequest, services::state_service, state::SharedState};

/// Report the display as shown or hidden.
pub async fn set_visibility(
    State(state): State<SharedState>,
    Json(request): Json<VisibilityRequest>,
) -> StatusCode {
    state_service::set_visibility(&state, request.visible);
    StatusCode::ACCEPTED
}

/// Configure the visibility route.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/visibility", post(set_visibility))
}
