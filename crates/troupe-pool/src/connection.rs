//! Per-worker connection state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use troupe_core::{ExecutionId, WorkerId};
use troupe_wire::OrchestratorMessage;

/// Lifecycle state of a registered worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    /// Registered and accepting assignments.
    Idle,
    /// Running exactly one execution.
    Executing,
    /// Removed from the pool; the session loop is winding down.
    Disconnected,
}

/// A registered worker.
///
/// Invariant: `current_execution` is `Some` iff the state is `Executing`.
/// Both live under one lock so the pair can only change together.
pub struct WorkerConnection {
    /// Worker-chosen identifier from its `hello` frame.
    pub id: WorkerId,
    /// Worker software version from `hello`.
    pub version: String,
    /// Capability strings from `hello`.
    pub capabilities: Vec<String>,
    /// Registration-epoch token echoed back in `ack`.
    pub session_token: String,
    /// When the session registered.
    pub connected_at: Instant,
    /// Cancelling this token closes the session (eviction, shutdown).
    pub cancel: CancellationToken,
    /// Send channel to the connection's WebSocket write task.
    tx: mpsc::Sender<Arc<String>>,
    inner: Mutex<StateInner>,
    last_heartbeat: Mutex<Instant>,
    /// Count of frames dropped due to a full write channel.
    pub dropped_messages: AtomicU64,
}

struct StateInner {
    state: WorkerState,
    current_execution: Option<ExecutionId>,
}

impl WorkerConnection {
    pub fn new(
        id: WorkerId,
        version: String,
        capabilities: Vec<String>,
        session_token: String,
        tx: mpsc::Sender<Arc<String>>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            version,
            capabilities,
            session_token,
            connected_at: now,
            cancel: CancellationToken::new(),
            tx,
            inner: Mutex::new(StateInner {
                state: WorkerState::Idle,
                current_execution: None,
            }),
            last_heartbeat: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Send a pre-encoded frame.
    ///
    /// Returns `false` if the write channel is full or closed, and counts
    /// the drop.
    pub fn send_raw(&self, frame: Arc<String>) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Encode and send a protocol message.
    pub fn send(&self, msg: &OrchestratorMessage) -> bool {
        self.send_raw(Arc::new(msg.encode()))
    }

    /// Record traffic from the worker; any frame counts as liveness.
    pub fn mark_heartbeat(&self) {
        *self.last_heartbeat.lock() = Instant::now();
    }

    /// Time since the worker was last heard from.
    pub fn heartbeat_elapsed(&self) -> Duration {
        self.last_heartbeat.lock().elapsed()
    }

    pub fn state(&self) -> WorkerState {
        self.inner.lock().state
    }

    /// The execution this worker is running, if any.
    pub fn current_execution(&self) -> Option<ExecutionId> {
        self.inner.lock().current_execution.clone()
    }

    /// Atomically move `Idle` → `Executing` with the given execution.
    ///
    /// Returns `false` (and changes nothing) unless the worker was idle.
    pub fn begin_execution(&self, execution_id: ExecutionId) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != WorkerState::Idle {
            return false;
        }
        inner.state = WorkerState::Executing;
        inner.current_execution = Some(execution_id);
        true
    }

    /// Return to `Idle`, clearing the current execution.
    pub fn set_idle(&self) {
        let mut inner = self.inner.lock();
        if inner.state != WorkerState::Disconnected {
            inner.state = WorkerState::Idle;
            inner.current_execution = None;
        }
    }

    /// Mark removed from the pool. Returns the execution that was in flight.
    pub fn mark_disconnected(&self) -> Option<ExecutionId> {
        let mut inner = self.inner.lock();
        inner.state = WorkerState::Disconnected;
        inner.current_execution.take()
    }

    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
