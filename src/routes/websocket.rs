use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};

use crate::{error::AppError, services::websocket_service, state::SharedState};

/// Upgrade into a relay session joining the node's broadcast channel.
pub async fn ws_handler(
    State(state): State<SharedState>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    let relay = websocket_service::open_relay(&state)?;
    Ok(ws.on_upgrade(move |socket| websocket_service::handle_socket(relay, socket)))
}

/// Configure the WebSocket endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/ws", get(ws_handler))
}
