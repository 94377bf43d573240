//! The dispatcher — owns the ready queue, the in-flight execution table and
//! the output fan-out.
//!
//! Mutable state (`queue` + `active`) lives behind one async mutex; every
//! path that touches either takes that lock, which serializes the submit
//! path against the pool-notification handlers. Nothing async happens while
//! the lock is held except the lock acquisition itself.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use troupe_auth::TokenProvider;
use troupe_bus::{topics, SharedBus};
use troupe_core::{
    Event, EventId, ExecRequest, ExecutionId, ExecutionRecord, ExecutionStatus, PersonaId,
    WorkerId, DEFAULT_PROJECT,
};
use troupe_pool::{CompletionReport, PoolEvent, PoolEventReceiver, WorkerPool};
use troupe_store::{Finalize, Store};
use troupe_wire::{AssignConfig, OrchestratorMessage, PersonaEventKind};

use crate::materializer;
use crate::prompt;

use std::sync::Arc;

/// Error message recorded when a worker drops mid-execution.
pub const WORKER_DISCONNECTED: &str = "Worker disconnected";

/// Dispatcher tuning knobs.
#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Timeout handed to workers when the request does not carry one.
    pub default_timeout_ms: u64,
    /// Output cap handed to workers.
    pub max_output_bytes: u64,
    /// How long terminal entries stay in the in-memory table.
    pub retention: Duration,
    /// Cadence of the retention sweep.
    pub sweep_interval: Duration,
    /// Static bearer token used when no OAuth provider is wired.
    pub fallback_token: Option<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 300_000,
            max_output_bytes: 10 * 1024 * 1024,
            retention: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(60),
            fallback_token: None,
        }
    }
}

/// In-memory record of one in-flight (or recently finished) execution.
#[derive(Clone, Debug)]
pub struct ActiveExecution {
    pub worker_id: WorkerId,
    pub persona_id: PersonaId,
    pub project_id: String,
    pub started_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub output: Vec<String>,
    pub exit_code: Option<i32>,
    pub duration_ms: Option<i64>,
    pub session_id: Option<String>,
    pub total_cost_usd: Option<f64>,
    pub error_message: Option<String>,
    /// Set when the entry turns terminal; drives the retention sweep.
    pub finished_at: Option<Instant>,
}

/// Read model served to observers while (and shortly after) a run.
#[derive(Clone, Debug)]
pub struct ExecutionView {
    pub status: ExecutionStatus,
    pub output: Vec<String>,
    pub duration_ms: Option<i64>,
    pub session_id: Option<String>,
    pub total_cost_usd: Option<f64>,
    pub error_message: Option<String>,
}

#[derive(Default)]
struct DispatchState {
    queue: VecDeque<ExecRequest>,
    active: HashMap<String, ActiveExecution>,
}

/// The coordination core between callers, the store, the bus and the pool.
pub struct Dispatcher {
    pool: Arc<WorkerPool>,
    store: Store,
    bus: SharedBus,
    tokens: Option<Arc<TokenProvider>>,
    master_key: [u8; 32],
    config: DispatcherConfig,
    state: Mutex<DispatchState>,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<WorkerPool>,
        store: Store,
        bus: SharedBus,
        tokens: Option<Arc<TokenProvider>>,
        master_key: [u8; 32],
        config: DispatcherConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            store,
            bus,
            tokens,
            master_key,
            config,
            state: Mutex::new(DispatchState::default()),
        })
    }

    /// Spawn the pool-event loop and the retention sweep. Both stop when
    /// `cancel` fires.
    pub fn spawn_tasks(
        self: &Arc<Self>,
        events: PoolEventReceiver,
        cancel: CancellationToken,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        let event_loop = {
            let dispatcher = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                dispatcher.run_event_loop(events, cancel).await;
            })
        };
        let sweep = {
            let dispatcher = self.clone();
            tokio::spawn(async move {
                dispatcher.run_retention_sweep(cancel).await;
            })
        };
        vec![event_loop, sweep]
    }

    // ── Submit path ─────────────────────────────────────────────────

    /// Accept an execution request: persist a `queued` record, enqueue, and
    /// try to pair it with an idle worker.
    #[instrument(skip_all, fields(execution_id = %request.execution_id, persona_id = %request.persona_id))]
    pub async fn submit(&self, request: ExecRequest) {
        info!("execution submitted");
        let record = ExecutionRecord {
            id: request.execution_id.clone(),
            project_id: request.project_id.clone(),
            persona_id: request.persona_id.clone(),
            status: ExecutionStatus::Queued,
            input_data: request
                .input_data
                .as_ref()
                .map(|v| v.to_string()),
            output_data: None,
            session_id: None,
            cost_usd: None,
            error_message: None,
            duration_ms: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.insert_execution(&record) {
            warn!(error = %e, "failed to persist queued execution record");
        }

        {
            let mut state = self.state.lock().await;
            state.queue.push_back(request);
        }
        self.process_queue().await;
    }

    /// Pair the queue head with an idle worker, if both exist.
    pub async fn process_queue(&self) {
        {
            let state = self.state.lock().await;
            if state.queue.is_empty() {
                return;
            }
        }
        let Some(worker_id) = self.pool.get_idle_worker().await else {
            return;
        };
        let request = {
            let mut state = self.state.lock().await;
            match state.queue.pop_front() {
                Some(request) => request,
                None => return,
            }
        };
        self.dispatch_to_worker(worker_id, request).await;
    }

    #[instrument(skip_all, fields(worker_id = %worker_id, execution_id = %request.execution_id))]
    async fn dispatch_to_worker(&self, worker_id: WorkerId, request: ExecRequest) {
        // 1. Bearer credential. No credential: the request goes back to the
        // queue head and the idle worker is not consumed.
        let token = match &self.tokens {
            Some(provider) => provider.get_valid_access_token().await,
            None => self.config.fallback_token.clone(),
        };
        let Some(token) = token else {
            error!("no bearer credential available, re-queueing request");
            self.requeue_front(request).await;
            return;
        };

        // 2+3. Environment and prompt from the stored persona, when present.
        let persona = match self.store.persona(&request.persona_id) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "persona lookup failed, dispatching with caller prompt");
                None
            }
        };

        let (env, prompt_text) = match &persona {
            Some(persona) => {
                let tools = self
                    .store
                    .tools_for_persona(&persona.id)
                    .unwrap_or_else(|e| {
                        warn!(error = %e, "tool lookup failed");
                        Vec::new()
                    });
                let credentials = self
                    .store
                    .credentials_for_persona(&persona.id)
                    .unwrap_or_else(|e| {
                        warn!(error = %e, "credential lookup failed");
                        Vec::new()
                    });
                let materialized = materializer::build_env(
                    &token,
                    Some(persona),
                    &credentials,
                    &self.master_key,
                );
                for credential_id in &materialized.used_credentials {
                    let _ = self.store.touch_credential(credential_id, Utc::now());
                }
                let prompt_text = prompt::assemble(
                    persona,
                    &tools,
                    request.input_data.as_ref(),
                    &materialized.credential_hints,
                );
                (materialized.env, prompt_text)
            }
            None => {
                let materialized =
                    materializer::build_env(&token, None, &[], &self.master_key);
                (materialized.env, request.prompt.clone())
            }
        };

        let timeout_ms = request
            .timeout_ms
            .unwrap_or(self.config.default_timeout_ms);

        // 4. Record the in-flight execution before the frame leaves.
        let started_at = Utc::now();
        {
            let mut state = self.state.lock().await;
            let _ = state.active.insert(
                request.execution_id.as_str().to_string(),
                ActiveExecution {
                    worker_id: worker_id.clone(),
                    persona_id: request.persona_id.clone(),
                    project_id: request.project_id.clone(),
                    started_at,
                    status: ExecutionStatus::Running,
                    output: Vec::new(),
                    exit_code: None,
                    duration_ms: None,
                    session_id: None,
                    total_cost_usd: None,
                    error_message: None,
                    finished_at: None,
                },
            );
        }
        if let Err(e) = self
            .store
            .mark_execution_running(&request.execution_id, started_at)
        {
            warn!(error = %e, "failed to mark execution running");
        }

        // 5. Hand it to the worker; unwind everything if that fails.
        let msg = OrchestratorMessage::Assign {
            execution_id: request.execution_id.clone(),
            persona_id: request.persona_id.clone(),
            prompt: prompt_text,
            env,
            config: AssignConfig {
                timeout_ms,
                max_output_bytes: self.config.max_output_bytes,
            },
        };
        if !self.pool.assign(&worker_id, &msg).await {
            warn!("assign failed, re-queueing request");
            {
                let mut state = self.state.lock().await;
                let _ = state.active.remove(request.execution_id.as_str());
            }
            if let Err(e) = self
                .store
                .set_execution_status(&request.execution_id, ExecutionStatus::Queued)
            {
                warn!(error = %e, "failed to revert execution record to queued");
            }
            self.requeue_front(request).await;
        }
    }

    async fn requeue_front(&self, request: ExecRequest) {
        let mut state = self.state.lock().await;
        state.queue.push_front(request);
    }

    // ── Cancellation ────────────────────────────────────────────────

    /// Advisory cancel: forwards a cancel frame to the owning worker.
    ///
    /// The execution stays `running` until the worker's `complete` frame
    /// reports the authoritative terminal status. Returns `false` for
    /// unknown or already-terminal executions.
    pub async fn cancel(&self, execution_id: &ExecutionId) -> bool {
        let worker_id = {
            let state = self.state.lock().await;
            match state.active.get(execution_id.as_str()) {
                Some(entry) if entry.status == ExecutionStatus::Running => {
                    entry.worker_id.clone()
                }
                _ => return false,
            }
        };
        self.pool
            .send(
                &worker_id,
                &OrchestratorMessage::Cancel {
                    execution_id: execution_id.clone(),
                },
            )
            .await
    }

    // ── Observation ─────────────────────────────────────────────────

    /// Merged read model: in-memory entry while retained, else the store.
    pub async fn execution_view(&self, execution_id: &ExecutionId) -> Option<ExecutionView> {
        {
            let state = self.state.lock().await;
            if let Some(entry) = state.active.get(execution_id.as_str()) {
                return Some(ExecutionView {
                    status: entry.status,
                    output: entry.output.clone(),
                    duration_ms: entry.duration_ms,
                    session_id: entry.session_id.clone(),
                    total_cost_usd: entry.total_cost_usd,
                    error_message: entry.error_message.clone(),
                });
            }
        }
        match self.store.execution(execution_id) {
            Ok(Some(record)) => Some(ExecutionView {
                status: record.status,
                output: record.output_data.map(|o| vec![o]).unwrap_or_default(),
                duration_ms: record.duration_ms,
                session_id: record.session_id,
                total_cost_usd: record.cost_usd,
                error_message: record.error_message,
            }),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "execution lookup failed");
                None
            }
        }
    }

    pub async fn queue_depth(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Executions currently `running` in the in-memory table.
    pub async fn active_count(&self) -> usize {
        self.state
            .lock()
            .await
            .active
            .values()
            .filter(|e| e.status == ExecutionStatus::Running)
            .count()
    }

    // ── Pool notification handling ──────────────────────────────────

    async fn run_event_loop(&self, mut events: PoolEventReceiver, cancel: CancellationToken) {
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { return };
                    self.handle_pool_event(event).await;
                }
                () = cancel.cancelled() => return,
            }
        }
    }

    /// React to one pool notification.
    pub async fn handle_pool_event(&self, event: PoolEvent) {
        match event {
            PoolEvent::WorkerConnected { worker_id } => {
                debug!(worker_id = %worker_id, "worker connected");
                self.process_queue().await;
            }
            PoolEvent::WorkerReady { worker_id } => {
                debug!(worker_id = %worker_id, "worker ready");
                self.process_queue().await;
            }
            PoolEvent::Stdout {
                execution_id,
                chunk,
                timestamp,
                ..
            } => {
                self.on_output(&execution_id, chunk, timestamp).await;
            }
            PoolEvent::Stderr {
                execution_id,
                chunk,
                timestamp,
                ..
            } => {
                self.on_output(&execution_id, format!("[STDERR] {chunk}"), timestamp)
                    .await;
            }
            PoolEvent::PersonaEvent {
                worker_id,
                execution_id,
                kind,
                payload,
            } => {
                self.on_persona_event(&worker_id, &execution_id, kind, payload)
                    .await;
            }
            PoolEvent::Complete { report, .. } => {
                self.on_complete(report).await;
                self.process_queue().await;
            }
            PoolEvent::WorkerDisconnected {
                worker_id,
                execution_id,
            } => {
                if let Some(execution_id) = execution_id {
                    self.on_worker_lost(&worker_id, &execution_id).await;
                }
            }
        }
    }

    async fn on_output(
        &self,
        execution_id: &ExecutionId,
        chunk: String,
        timestamp: DateTime<Utc>,
    ) {
        let known = {
            let mut state = self.state.lock().await;
            match state.active.get_mut(execution_id.as_str()) {
                Some(entry) => {
                    entry.output.push(chunk.clone());
                    true
                }
                None => false,
            }
        };
        if !known {
            debug!(execution_id = %execution_id, "output for unknown execution");
        }

        if let Err(e) = self.store.append_execution_output(execution_id, &chunk) {
            debug!(error = %e, "failed to persist output chunk");
        }

        self.bus.produce(
            topics::OUTPUT,
            execution_id.as_str(),
            json!({
                "executionId": execution_id.as_str(),
                "chunk": chunk,
                "timestamp": timestamp.to_rfc3339(),
            }),
        );
    }

    async fn on_complete(&self, report: CompletionReport) {
        let status = ExecutionStatus::from_completion(&report.status);
        let known = {
            let mut state = self.state.lock().await;
            match state.active.get_mut(report.execution_id.as_str()) {
                Some(entry) => {
                    entry.status = status;
                    entry.exit_code = Some(report.exit_code);
                    entry.duration_ms = Some(report.duration_ms);
                    entry.session_id = report.session_id.clone();
                    entry.total_cost_usd = report.total_cost_usd;
                    entry.finished_at = Some(Instant::now());
                    true
                }
                None => false,
            }
        };
        if !known {
            warn!(execution_id = %report.execution_id, "completion for unknown execution");
        }

        info!(
            execution_id = %report.execution_id,
            status = status.as_str(),
            duration_ms = report.duration_ms,
            "execution finished"
        );
        if let Err(e) = self.store.finalize_execution(
            &report.execution_id,
            &Finalize {
                status,
                duration_ms: report.duration_ms,
                session_id: report.session_id.as_deref(),
                cost_usd: report.total_cost_usd,
                error_message: None,
                completed_at: Utc::now(),
            },
        ) {
            warn!(error = %e, "failed to finalize execution record");
        }

        self.bus.produce(
            topics::LIFECYCLE,
            report.execution_id.as_str(),
            json!({
                "executionId": report.execution_id.as_str(),
                "status": status.as_str(),
                "exitCode": report.exit_code,
                "durationMs": report.duration_ms,
                "sessionId": report.session_id,
                "totalCostUsd": report.total_cost_usd,
                "timestamp": Utc::now().to_rfc3339(),
            }),
        );
    }

    async fn on_worker_lost(&self, worker_id: &WorkerId, execution_id: &ExecutionId) {
        let affected = {
            let mut state = self.state.lock().await;
            match state.active.get_mut(execution_id.as_str()) {
                Some(entry) if entry.status == ExecutionStatus::Running => {
                    entry.status = ExecutionStatus::Failed;
                    entry.error_message = Some(WORKER_DISCONNECTED.to_string());
                    entry.duration_ms = Some(0);
                    entry.finished_at = Some(Instant::now());
                    true
                }
                _ => false,
            }
        };
        if !affected {
            return;
        }

        warn!(
            worker_id = %worker_id,
            execution_id = %execution_id,
            "worker lost mid-execution"
        );
        if let Err(e) = self.store.finalize_execution(
            execution_id,
            &Finalize {
                status: ExecutionStatus::Failed,
                duration_ms: 0,
                session_id: None,
                cost_usd: None,
                error_message: Some(WORKER_DISCONNECTED),
                completed_at: Utc::now(),
            },
        ) {
            warn!(error = %e, "failed to record worker loss");
        }

        self.bus.produce(
            topics::LIFECYCLE,
            execution_id.as_str(),
            json!({
                "executionId": execution_id.as_str(),
                "status": "failed",
                "durationMs": 0,
                "errorMessage": WORKER_DISCONNECTED,
                "timestamp": Utc::now().to_rfc3339(),
            }),
        );
    }

    async fn on_persona_event(
        &self,
        worker_id: &WorkerId,
        execution_id: &ExecutionId,
        kind: PersonaEventKind,
        payload: serde_json::Value,
    ) {
        self.bus.produce(
            topics::EVENTS,
            execution_id.as_str(),
            json!({
                "executionId": execution_id.as_str(),
                "workerId": worker_id.as_str(),
                "eventType": kind,
                "payload": payload,
            }),
        );

        // An emitted event also lands on the event table so subscriptions
        // can route it to other personas.
        if kind == PersonaEventKind::EmitEvent {
            let Some(event_type) = payload.get("event_type").and_then(|v| v.as_str()) else {
                warn!(execution_id = %execution_id, "emit_event without event_type dropped");
                return;
            };
            let (project_id, persona_id) = {
                let state = self.state.lock().await;
                match state.active.get(execution_id.as_str()) {
                    Some(entry) => (
                        entry.project_id.clone(),
                        Some(entry.persona_id.clone()),
                    ),
                    None => (DEFAULT_PROJECT.to_string(), None),
                }
            };
            let event = Event {
                id: EventId::new(),
                project_id,
                event_type: event_type.to_string(),
                source_type: "persona".to_string(),
                source_id: persona_id.map(String::from),
                target_persona_id: None,
                payload: payload.get("payload").map(|v| v.to_string()),
                status: troupe_core::EventStatus::Pending,
                use_case_id: None,
                error_message: None,
                created_at: Utc::now(),
                processed_at: None,
            };
            if let Err(e) = self.store.insert_event(&event) {
                warn!(error = %e, "failed to persist emitted event");
            }
        }
    }

    // ── Retention ───────────────────────────────────────────────────

    async fn run_retention_sweep(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => self.sweep_terminal_entries().await,
                () = cancel.cancelled() => return,
            }
        }
    }

    /// Drop terminal in-memory entries older than the retention window.
    /// The store remains the source of truth for finished executions.
    pub async fn sweep_terminal_entries(&self) {
        let retention = self.config.retention;
        let mut state = self.state.lock().await;
        let before = state.active.len();
        state.active.retain(|_, entry| match entry.finished_at {
            Some(finished) => finished.elapsed() < retention,
            None => true,
        });
        let reaped = before - state.active.len();
        if reaped > 0 {
            debug!(reaped, "reaped terminal execution entries");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
