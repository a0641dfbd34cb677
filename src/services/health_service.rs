use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report storage health along with live connection and mesh counts.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.storage().store().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "storage health check failed");
            }
        }
        Err(_) => warn!("storage unavailable (degraded mode)"),
    }

    let connections = state.connections().len();
    let known_servers = state.manager().servers().await.len();
    if state.is_degraded() {
        HealthResponse::degraded(connections, known_servers)
    } else {
        HealthResponse::ok(connections, known_servers)
    }
}
