use serde::Serialize;
use utoipa::ToSchema;

/// Simple health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Number of live websocket connections.
    pub connections: usize,
    /// Number of entries in the mesh directory.
    pub known_servers: usize,
}

impl HealthResponse {
    /// Create a health response indicating the server is operational.
    pub fn ok(connections: usize, known_servers: usize) -> Self {
        Self {
            status: "ok".to_string(),
            connections,
            known_servers,
        }
    }

    /// Create a health response indicating storage is unreachable.
    pub fn degraded(connections: usize, known_servers: usize) -> Self {
        Self {
            status: "degraded".to_string(),
            connections,
            known_servers,
        }
    }
}
