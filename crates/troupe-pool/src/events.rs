//! Typed notifications from the pool to its subscriber.
//!
//! One unbounded channel carries every notification kind; the enum is the
//! contract. The dispatcher consumes the receiving end; nothing in this
//! crate knows who is listening.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use troupe_core::{ExecutionId, WorkerId};
use troupe_wire::PersonaEventKind;

/// Receiving end of the pool's notification channel.
pub type PoolEventReceiver = mpsc::UnboundedReceiver<PoolEvent>;

/// Terminal fields from a worker's `complete` frame.
#[derive(Clone, Debug)]
pub struct CompletionReport {
    pub execution_id: ExecutionId,
    pub status: String,
    pub exit_code: i32,
    pub duration_ms: i64,
    pub session_id: Option<String>,
    pub total_cost_usd: Option<f64>,
}

/// Everything subscribers can observe about the worker fleet.
#[derive(Clone, Debug)]
pub enum PoolEvent {
    /// A worker registered (after `hello`/`ack`).
    WorkerConnected { worker_id: WorkerId },
    /// A worker signalled it is idle and accepting work.
    WorkerReady { worker_id: WorkerId },
    /// Stdout chunk from a running execution.
    Stdout {
        worker_id: WorkerId,
        execution_id: ExecutionId,
        chunk: String,
        timestamp: DateTime<Utc>,
    },
    /// Stderr chunk from a running execution.
    Stderr {
        worker_id: WorkerId,
        execution_id: ExecutionId,
        chunk: String,
        timestamp: DateTime<Utc>,
    },
    /// Structured event the worker parsed out of the CLI stream.
    PersonaEvent {
        worker_id: WorkerId,
        execution_id: ExecutionId,
        kind: PersonaEventKind,
        payload: serde_json::Value,
    },
    /// A worker finished its execution and returned to idle.
    Complete {
        worker_id: WorkerId,
        report: CompletionReport,
    },
    /// A worker left the pool; `execution_id` is the run it abandoned.
    WorkerDisconnected {
        worker_id: WorkerId,
        execution_id: Option<ExecutionId>,
    },
}

impl PoolEvent {
    /// The worker this notification concerns.
    pub fn worker_id(&self) -> &WorkerId {
        match self {
            Self::WorkerConnected { worker_id }
            | Self::WorkerReady { worker_id }
            | Self::Stdout { worker_id, .. }
            | Self::Stderr { worker_id, .. }
            | Self::PersonaEvent { worker_id, .. }
            | Self::Complete { worker_id, .. }
            | Self::WorkerDisconnected { worker_id, .. } => worker_id,
        }
    }
}

/// Create the pool notification channel.
pub fn channel() -> (mpsc::UnboundedSender<PoolEvent>, PoolEventReceiver) {
    mpsc::unbounded_channel()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_id_accessor_covers_all_variants() {
        let w = WorkerId::from("w1");
        let events = vec![
            PoolEvent::WorkerConnected { worker_id: w.clone() },
            PoolEvent::WorkerReady { worker_id: w.clone() },
            PoolEvent::Stdout {
                worker_id: w.clone(),
                execution_id: ExecutionId::from("e1"),
                chunk: "x".into(),
                timestamp: Utc::now(),
            },
            PoolEvent::WorkerDisconnected {
                worker_id: w.clone(),
                execution_id: None,
            },
        ];
        for event in events {
            assert_eq!(event.worker_id().as_str(), "w1");
        }
    }

    #[tokio::test]
    async fn channel_delivers_in_order() {
        let (tx, mut rx) = channel();
        tx.send(PoolEvent::WorkerConnected {
            worker_id: WorkerId::from("w1"),
        })
        .unwrap();
        tx.send(PoolEvent::WorkerReady {
            worker_id: WorkerId::from("w1"),
        })
        .unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            PoolEvent::WorkerConnected { .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            PoolEvent::WorkerReady { .. }
        ));
    }
}
