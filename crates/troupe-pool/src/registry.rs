//! The worker registry — the pool's authoritative session map.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use troupe_core::WorkerId;
use troupe_wire::OrchestratorMessage;

use crate::connection::{WorkerConnection, WorkerState};
use crate::events::{self, PoolEvent, PoolEventReceiver};
use crate::PoolConfig;

/// Tracks every registered worker and multiplexes frames to them.
///
/// Holds no reference to any subscriber; notifications go out on the typed
/// channel created at construction.
pub struct WorkerPool {
    config: PoolConfig,
    workers: RwLock<HashMap<String, Arc<WorkerConnection>>>,
    events: mpsc::UnboundedSender<PoolEvent>,
}

impl WorkerPool {
    /// Create the pool and the notification channel subscribers consume.
    pub fn new(config: PoolConfig) -> (Arc<Self>, PoolEventReceiver) {
        let (tx, rx) = events::channel();
        (
            Arc::new(Self {
                config,
                workers: RwLock::new(HashMap::new()),
                events: tx,
            }),
            rx,
        )
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Install a freshly-handshaked session.
    ///
    /// A prior session under the same worker ID is evicted first: its
    /// transport is closed with a going-away code and its in-flight
    /// execution (if any) is surfaced as a disconnect so subscribers can
    /// fail it.
    pub async fn register(&self, conn: Arc<WorkerConnection>) {
        let key = conn.id.as_str().to_string();
        let evicted = {
            let mut workers = self.workers.write().await;
            let evicted = workers.remove(&key);
            let _ = workers.insert(key, conn.clone());
            evicted
        };

        if let Some(old) = evicted {
            warn!(worker_id = %conn.id, "duplicate hello, evicting previous session");
            old.cancel.cancel();
            let abandoned = old.mark_disconnected();
            self.publish(PoolEvent::WorkerDisconnected {
                worker_id: old.id.clone(),
                execution_id: abandoned,
            });
        }

        info!(worker_id = %conn.id, version = %conn.version, "worker registered");
        self.publish(PoolEvent::WorkerConnected {
            worker_id: conn.id.clone(),
        });
    }

    /// Remove a session at the end of its loop.
    ///
    /// A session evicted by a newer registration is already out of the map;
    /// in that case nothing happens here (the eviction already published the
    /// disconnect).
    pub async fn deregister(&self, conn: &Arc<WorkerConnection>) {
        let removed = {
            let mut workers = self.workers.write().await;
            match workers.get(conn.id.as_str()) {
                Some(current) if Arc::ptr_eq(current, conn) => {
                    let _ = workers.remove(conn.id.as_str());
                    true
                }
                _ => false,
            }
        };

        if removed {
            let abandoned = conn.mark_disconnected();
            info!(worker_id = %conn.id, "worker disconnected");
            self.publish(PoolEvent::WorkerDisconnected {
                worker_id: conn.id.clone(),
                execution_id: abandoned,
            });
        }
    }

    /// Look up a registered worker.
    pub async fn worker(&self, worker_id: &WorkerId) -> Option<Arc<WorkerConnection>> {
        self.workers.read().await.get(worker_id.as_str()).cloned()
    }

    /// Send a frame to one worker. `false` if it is missing or unwritable.
    pub async fn send(&self, worker_id: &WorkerId, msg: &OrchestratorMessage) -> bool {
        match self.worker(worker_id).await {
            Some(conn) if conn.state() != WorkerState::Disconnected => conn.send(msg),
            _ => false,
        }
    }

    /// Atomically hand an assignment to an idle worker.
    ///
    /// Marks the worker executing, then sends the frame. If the worker is
    /// not idle, unknown, or the send fails, the worker state is rolled back
    /// and `false` is returned; the caller rolls back its own records.
    pub async fn assign(&self, worker_id: &WorkerId, msg: &OrchestratorMessage) -> bool {
        let OrchestratorMessage::Assign { execution_id, .. } = msg else {
            debug!(worker_id = %worker_id, "assign called with a non-assign frame");
            return false;
        };

        let Some(conn) = self.worker(worker_id).await else {
            return false;
        };
        if !conn.begin_execution(execution_id.clone()) {
            return false;
        }
        if conn.send(msg) {
            true
        } else {
            conn.set_idle();
            false
        }
    }

    /// Any idle worker, or `None`. Selection order is unspecified.
    pub async fn get_idle_worker(&self) -> Option<WorkerId> {
        let workers = self.workers.read().await;
        workers
            .values()
            .find(|c| c.state() == WorkerState::Idle)
            .map(|c| c.id.clone())
    }

    pub async fn worker_count(&self) -> usize {
        self.workers.read().await.len()
    }

    pub async fn idle_count(&self) -> usize {
        self.workers
            .read()
            .await
            .values()
            .filter(|c| c.state() == WorkerState::Idle)
            .count()
    }

    /// Announce shutdown to every worker, then close all sessions.
    pub async fn shutdown(&self, reason: &str) {
        let grace_ms = self.config.shutdown_grace.as_millis() as u64;
        let msg = OrchestratorMessage::Shutdown {
            reason: reason.to_string(),
            grace_period_ms: grace_ms,
        };
        let workers: Vec<_> = self.workers.read().await.values().cloned().collect();
        info!(workers = workers.len(), "broadcasting shutdown");
        for conn in &workers {
            let _ = conn.send(&msg);
        }
        for conn in &workers {
            conn.cancel.cancel();
        }
    }

    pub(crate) fn publish(&self, event: PoolEvent) {
        // The receiver living shorter than the pool only happens in tests
        // and teardown; dropping the notification is fine there.
        let _ = self.events.send(event);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
