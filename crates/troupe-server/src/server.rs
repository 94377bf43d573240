//! `TroupeServer` — Axum HTTP + WebSocket server hosting the engine.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tracing::{info, instrument, warn};

use troupe_auth::{now_ms, OAuthConfig, OAuthTokens, TokenProvider};
use troupe_bus::SharedBus;
use troupe_core::{ExecRequest, ExecutionId, PersonaId, DEFAULT_PROJECT};
use troupe_dispatch::{Dispatcher, DispatcherConfig};
use troupe_pool::{run_worker_session, PoolConfig, WorkerPool};
use troupe_store::Store;

use crate::auth::api_key_ok;
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;

/// Generates UUIDv7 request IDs.
#[derive(Clone)]
struct UuidV7RequestId;

impl MakeRequestId for UuidV7RequestId {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = uuid::Uuid::now_v7().to_string();
        axum::http::HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// Shared state accessible from handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<WorkerPool>,
    pub dispatcher: Arc<Dispatcher>,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub start_time: Instant,
    pub config: ServerConfig,
}

/// The orchestrator server: worker pool, dispatcher, periodic processors
/// and the HTTP/WS surface, assembled and running.
pub struct TroupeServer {
    config: ServerConfig,
    pool: Arc<WorkerPool>,
    dispatcher: Arc<Dispatcher>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl TroupeServer {
    /// Assemble the engine and spawn its background tasks.
    pub fn new(config: ServerConfig, store: Store, bus: SharedBus) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let master_key = troupe_auth::secrets::derive_master_key(&config.master_key_secret);

        let (pool, pool_events) = WorkerPool::new(PoolConfig {
            worker_token: config.worker_token.clone(),
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
            heartbeat_timeout: Duration::from_secs(config.heartbeat_timeout_secs),
            hello_deadline: Duration::from_secs(config.hello_deadline_secs),
            shutdown_grace: Duration::from_secs(config.shutdown_grace_secs),
        });

        let tokens = match (&config.oauth_access_token, &config.oauth_refresh_token) {
            (Some(access), Some(refresh)) => {
                let provider = Arc::new(TokenProvider::with_tokens(
                    OAuthConfig::default(),
                    OAuthTokens {
                        access_token: access.clone(),
                        refresh_token: refresh.clone(),
                        // Unknown expiry: force a refresh on first use.
                        expires_at: now_ms(),
                        scopes: Vec::new(),
                    },
                ));
                let warm = troupe_auth::provider::spawn_keep_warm(
                    provider.clone(),
                    shutdown.token(),
                );
                shutdown.register_task(warm);
                Some(provider)
            }
            _ => None,
        };

        let dispatcher = Dispatcher::new(
            pool.clone(),
            store.clone(),
            bus,
            tokens,
            master_key,
            DispatcherConfig {
                fallback_token: config.static_token.clone(),
                ..DispatcherConfig::default()
            },
        );
        shutdown.register_tasks(dispatcher.spawn_tasks(pool_events, shutdown.token()));

        shutdown.register_task(troupe_dispatch::event_tick::spawn(
            dispatcher.clone(),
            store.clone(),
            troupe_dispatch::event_tick::EVENT_TICK_INTERVAL,
            shutdown.token(),
        ));
        shutdown.register_task(troupe_dispatch::trigger_tick::spawn(
            store,
            troupe_dispatch::trigger_tick::TRIGGER_TICK_INTERVAL,
            shutdown.token(),
        ));

        Self {
            config,
            pool,
            dispatcher,
            shutdown,
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes and middleware.
    pub fn router(&self) -> Router {
        let state = AppState {
            pool: self.pool.clone(),
            dispatcher: self.dispatcher.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            config: self.config.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/ws", get(ws_upgrade_handler))
            .route("/api/execute", post(execute_handler))
            .route("/api/executions/{id}", get(get_execution_handler))
            .route("/api/executions/{id}/cancel", post(cancel_handler))
            .with_state(state)
            .layer(CatchPanicLayer::new())
            .layer(RequestBodyLimitLayer::new(1024 * 1024)) // 1 MB
            .layer(SetRequestIdLayer::x_request_id(UuidV7RequestId))
            .layer(PropagateRequestIdLayer::x_request_id())
    }

    /// Bind and start serving. Returns the bound address and the server
    /// task handle.
    #[instrument(skip_all, fields(host = %self.config.host, port = self.config.port))]
    pub async fn listen(
        &self,
    ) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), std::io::Error> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, "server started");

        let router = self.router();
        let shutdown_token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_token.cancelled().await;
                    info!("server shutdown initiated");
                })
                .await;
            info!("server shutdown complete");
        });

        Ok((bound_addr, handle))
    }

    /// Orderly stop: announce shutdown to workers, then cancel and await
    /// every background task.
    pub async fn stop(&self) {
        self.pool.shutdown("orchestrator shutting down").await;
        self.shutdown.graceful_shutdown(None).await;
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn shutdown_coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let resp = health::health_check(
        state.start_time,
        state.pool.worker_count().await,
        state.pool.idle_count().await,
        state.dispatcher.queue_depth().await,
        state.dispatcher.active_count().await,
    );
    Json(resp)
}

/// GET /ws — worker WebSocket upgrade.
async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let token = params.get("token").cloned();
    let pool = state.pool;
    // Token verification happens inside the session so the policy-violation
    // close code reaches the worker on its own transport.
    ws.on_upgrade(move |socket| run_worker_session(socket, token, pool))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteBody {
    persona_id: String,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    input_data: Option<serde_json::Value>,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    project_id: Option<String>,
}

/// POST /api/execute
async fn execute_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ExecuteBody>,
) -> impl IntoResponse {
    if !api_key_ok(&headers, &state.config.api_key_hash) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"})));
    }

    let execution_id = ExecutionId::new();
    state
        .dispatcher
        .submit(ExecRequest {
            execution_id: execution_id.clone(),
            persona_id: PersonaId::from(body.persona_id),
            project_id: body.project_id.unwrap_or_else(|| DEFAULT_PROJECT.to_string()),
            prompt: body.prompt.unwrap_or_default(),
            input_data: body.input_data,
            timeout_ms: body.timeout_ms,
        })
        .await;

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "executionId": execution_id.as_str(),
            "status": "queued",
        })),
    )
}

/// GET /api/executions/{id}
async fn get_execution_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if !api_key_ok(&headers, &state.config.api_key_hash) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"})));
    }

    match state.dispatcher.execution_view(&ExecutionId::from(id)).await {
        Some(view) => (
            StatusCode::OK,
            Json(json!({
                "status": view.status.as_str(),
                "output": view.output,
                "durationMs": view.duration_ms,
                "sessionId": view.session_id,
                "totalCostUsd": view.total_cost_usd,
                "errorMessage": view.error_message,
            })),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "execution not found"})),
        ),
    }
}

/// POST /api/executions/{id}/cancel
async fn cancel_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if !api_key_ok(&headers, &state.config.api_key_hash) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"})));
    }

    let cancelled = state.dispatcher.cancel(&ExecutionId::from(id)).await;
    if !cancelled {
        warn!("cancel refused: unknown or already-terminal execution");
    }
    (StatusCode::OK, Json(json!({"cancelled": cancelled})))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
