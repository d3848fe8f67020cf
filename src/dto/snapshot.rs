use serde::{Deserialize, Serialize};

use crate::{
    config::Role,
    state::{game::GameState, manual_override::OverrideMode},
};

/// Payload of `GET /state`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateResponse {
    /// Role this node plays.
    pub role: Role,
    /// Session identifier of this node.
    pub session_id: String,
    /// Current replica of the game state.
    pub game_state: GameState,
    /// Forced-number mode observed by this node.
    pub override_mode: OverrideMode,
    /// Clients currently registered (always 0 on a client).
    pub connected_clients: usize,
    /// Transport currently carrying the broadcast channel.
    pub transport: &'static str,
}

/// Body of `POST /visibility`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct VisibilityRequest {
    /// New visibility of the display.
    pub visible: bool,
}
