use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState, transport::TransportKind};

/// Report degraded when the node runs on storage polling or the forced-number
/// backend stopped answering.
pub fn health_status(state: &SharedState) -> HealthResponse {
    let transport = state.transport();
    let backend_healthy = state.is_backend_healthy();

    if transport == TransportKind::Storage && state.config().transport == TransportKind::Native {
        warn!("native broadcast lost; running on storage polling (degraded mode)");
    }
    if !backend_healthy {
        warn!("forced-number backend unreachable (degraded mode)");
    }

    if transport == TransportKind::Storage || !backend_healthy {
        HealthResponse::degraded(transport.as_str())
    } else {
        HealthResponse::ok(transport.as_str())
    }
}
