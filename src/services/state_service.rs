use tracing::info;

use crate::{dto::snapshot::StateResponse, state::SharedState};

/// Current view of the node.
pub async fn snapshot(state: &SharedState) -> StateResponse {
    StateResponse {
        role: state.role(),
        session_id: state.session_id().to_string(),
        game_state: state.coordinator().view().snapshot().await,
        override_mode: state.overrides().mode(),
        connected_clients: state.connected_clients(),
        transport: state.transport().as_str(),
    }
}

/// Feed a visibility change to the coordinator; it applies after the debounce.
pub fn set_visibility(state: &SharedState, visible: bool) {
    info!(visible, "display visibility reported");
    state.visibility().set_visible(visible);
}
