use serde::Serialize;

/// Simple health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Transport currently carrying the broadcast channel.
    pub transport: &'static str,
}

impl HealthResponse {
    /// Create a health response indicating the node is operational.
    pub fn ok(transport: &'static str) -> Self {
        Self {
            status: "ok".to_string(),
            transport,
        }
    }

    /// Create a health response indicating the node runs on a fallback path.
    pub fn degraded(transport: &'static str) -> Self {
        Self {
            status: "degraded".to_string(),
            transport,
        }
    }
}
