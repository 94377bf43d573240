//! Heartbeat loop for one worker connection.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time;
use tokio_util::sync::CancellationToken;

use troupe_wire::OrchestratorMessage;

use crate::connection::WorkerConnection;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The worker went silent past the timeout window.
    TimedOut,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Run heartbeats for a connection.
///
/// At each `interval` tick: if nothing has been heard from the worker for
/// longer than `timeout`, the loop ends with [`HeartbeatResult::TimedOut`]
/// and the caller closes the transport. Otherwise a heartbeat frame is sent.
/// Any inbound frame refreshes the liveness clock (see
/// [`WorkerConnection::mark_heartbeat`]).
pub async fn run_heartbeat(
    connection: Arc<WorkerConnection>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticker = time::interval(interval);
    // The first tick fires immediately; consume it so the first real check
    // happens one interval in.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if connection.heartbeat_elapsed() > timeout {
                    return HeartbeatResult::TimedOut;
                }
                let _ = connection.send(&OrchestratorMessage::Heartbeat {
                    timestamp: Utc::now(),
                });
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
