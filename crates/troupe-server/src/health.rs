//! `/health` endpoint payload.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered workers.
    pub workers: usize,
    /// Workers currently accepting assignments.
    pub idle_workers: usize,
    /// Requests waiting for a worker.
    pub queue_depth: usize,
    /// Executions currently running.
    pub active_executions: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    workers: usize,
    idle_workers: usize,
    queue_depth: usize,
    active_executions: usize,
) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        workers,
        idle_workers,
        queue_depth,
        active_executions,
    }
}
