//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Version reported to clients.
    pub version: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open WebSocket connections.
    pub connections: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, version: &str, connections: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        version: version.to_owned(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
    }
}
