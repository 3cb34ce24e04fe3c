//! `/health` endpoint body.

use std::time::Instant;

use serde::Serialize;

use crate::document::DocumentSnapshot;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the server is serving.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered viewer connections.
    pub connections: usize,
    /// Shared buffer version.
    pub document_version: u64,
    /// Shared buffer size in bytes.
    pub document_bytes: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    connections: usize,
    document: &DocumentSnapshot,
) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        document_version: document.version,
        document_bytes: document.code.len(),
    }
}
