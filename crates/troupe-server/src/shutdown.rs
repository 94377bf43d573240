//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default timeout for graceful shutdown before aborting stragglers.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Coordinates graceful shutdown across all server tasks.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            task_handles: Mutex::new(Vec::new()),
        }
    }

    /// Register a background task handle for graceful shutdown.
    pub fn register_task(&self, handle: JoinHandle<()>) {
        self.task_handles.lock().push(handle);
    }

    /// Register several task handles at once.
    pub fn register_tasks(&self, handles: Vec<JoinHandle<()>>) {
        self.task_handles.lock().extend(handles);
    }

    /// Take all registered task handles (drains the list).
    pub fn take_tasks(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.task_handles.lock())
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel everything, then wait up to `timeout` for the registered
    /// tasks; abort whatever is left after that.
    pub async fn graceful_shutdown(&self, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown();

        let handles = self.take_tasks();
        info!(
            task_count = handles.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for tasks to complete"
        );

        let abort_handles: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
            Ok(_) => info!("all shutdown tasks completed"),
            Err(_) => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "shutdown timed out, aborting remaining tasks"
                );
                for handle in &abort_handles {
                    handle.abort();
                }
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
    }

    #[test]
    fn shutdown_sets_flag() {
        let coord = ShutdownCoordinator::new();
        coord.shutdown();
        assert!(coord.is_shutting_down());
    }

    #[test]
    fn token_propagation() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        assert!(!token.is_cancelled());
        coord.shutdown();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn graceful_shutdown_waits_for_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        coord.register_task(tokio::spawn(async move {
            token.cancelled().await;
        }));

        tokio::time::timeout(
            Duration::from_secs(2),
            coord.graceful_shutdown(Some(Duration::from_secs(1))),
        )
        .await
        .expect("graceful shutdown hung");
    }

    #[tokio::test]
    async fn graceful_shutdown_aborts_stragglers() {
        let coord = ShutdownCoordinator::new();
        coord.register_task(tokio::spawn(async {
            // Ignores cancellation entirely.
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }));

        tokio::time::timeout(
            Duration::from_secs(2),
            coord.graceful_shutdown(Some(Duration::from_millis(50))),
        )
        .await
        .expect("graceful shutdown hung");
    }

    #[test]
    fn take_tasks_drains() {
        let coord = ShutdownCoordinator::new();
        coord.register_tasks(vec![tokio::runtime::Runtime::new()
            .unwrap()
            .spawn(async {})]);
        assert_eq!(coord.take_tasks().len(), 1);
        assert!(coord.take_tasks().is_empty());
    }
}
