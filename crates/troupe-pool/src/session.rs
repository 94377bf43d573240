//! Worker session lifecycle — one connected worker from upgrade through
//! disconnect.
//!
//! Each session is a single task owning both directions of the socket: it
//! authenticates the query-string token, waits for `hello`, registers with
//! the pool, then routes frames until the transport closes, the heartbeat
//! loop gives up, or the session is cancelled (eviction, shutdown).

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use rand::RngCore;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use troupe_wire::{OrchestratorMessage, WorkerMessage};

use crate::connection::WorkerConnection;
use crate::events::{CompletionReport, PoolEvent};
use crate::heartbeat::{run_heartbeat, HeartbeatResult};
use crate::registry::WorkerPool;
use crate::{CLOSE_GOING_AWAY, CLOSE_POLICY_VIOLATION};

/// Mint the per-registration session token (32 random bytes, hex).
fn mint_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

async fn close_with(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    code: u16,
    reason: &'static str,
) {
    let _ = ws_tx
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

/// Run a worker session.
///
/// `token` is the `?token=` query parameter from the upgrade request; it
/// must equal the configured worker token or the socket is closed with a
/// policy-violation code before any frame exchange.
#[instrument(skip_all)]
pub async fn run_worker_session(ws: WebSocket, token: Option<String>, pool: Arc<WorkerPool>) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let expected = pool.config().worker_token.as_str();
    if expected.is_empty() || token.as_deref() != Some(expected) {
        warn!("worker connection rejected: bad or missing token");
        close_with(&mut ws_tx, CLOSE_POLICY_VIOLATION, "invalid token").await;
        return;
    }

    // ── Hello handshake ─────────────────────────────────────────────
    let deadline = tokio::time::sleep(pool.config().hello_deadline);
    tokio::pin!(deadline);

    let (worker_id, version, capabilities) = loop {
        tokio::select! {
            () = &mut deadline => {
                warn!("worker did not send hello in time");
                close_with(&mut ws_tx, CLOSE_POLICY_VIOLATION, "hello timeout").await;
                return;
            }
            frame = ws_rx.next() => {
                let Some(Ok(msg)) = frame else { return };
                let Some(text) = frame_text(&msg) else {
                    if matches!(msg, Message::Close(_)) {
                        return;
                    }
                    continue;
                };
                match WorkerMessage::decode(&text) {
                    Ok(WorkerMessage::Hello { worker_id, version, capabilities }) => {
                        break (worker_id, version, capabilities);
                    }
                    Ok(other) => {
                        debug!(frame = ?other, "frame before hello discarded");
                    }
                    Err(e) => {
                        warn!(error = %e, "dropping unparseable frame");
                    }
                }
            }
        }
    };

    // ── Registration ────────────────────────────────────────────────
    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(256);
    let conn = Arc::new(WorkerConnection::new(
        worker_id.clone(),
        version,
        capabilities,
        mint_session_token(),
        send_tx,
    ));
    pool.register(conn.clone()).await;

    let ack = OrchestratorMessage::Ack {
        worker_id: worker_id.clone(),
        session_token: conn.session_token.clone(),
    };
    if !conn.send(&ack) {
        pool.deregister(&conn).await;
        return;
    }

    let mut heartbeat = tokio::spawn(run_heartbeat(
        conn.clone(),
        pool.config().heartbeat_interval,
        pool.config().heartbeat_timeout,
        conn.cancel.child_token(),
    ));

    // ── Main loop: one reader, one writer, one task ─────────────────
    // Outbound frames are polled first so a shutdown announcement reaches
    // the wire before the accompanying cancellation closes the socket.
    loop {
        tokio::select! {
            biased;
            outbound = send_rx.recv() => {
                let Some(frame) = outbound else { break };
                if ws_tx.send(Message::Text(frame.as_str().to_owned().into())).await.is_err() {
                    break;
                }
            }
            inbound = ws_rx.next() => {
                let Some(Ok(msg)) = inbound else { break };
                if matches!(msg, Message::Close(_)) {
                    info!(worker_id = %conn.id, "worker sent close frame");
                    break;
                }
                conn.mark_heartbeat();
                let Some(text) = frame_text(&msg) else { continue };
                match WorkerMessage::decode(&text) {
                    Ok(frame) => handle_frame(&pool, &conn, frame),
                    Err(e) => warn!(worker_id = %conn.id, error = %e, "dropping unparseable frame"),
                }
            }
            result = &mut heartbeat => {
                match result {
                    Ok(HeartbeatResult::TimedOut) => {
                        warn!(worker_id = %conn.id, "heartbeat timeout, closing");
                        close_with(&mut ws_tx, CLOSE_GOING_AWAY, "heartbeat timeout").await;
                    }
                    Ok(HeartbeatResult::Cancelled) => {
                        info!(worker_id = %conn.id, "session cancelled");
                        close_with(&mut ws_tx, CLOSE_GOING_AWAY, "going away").await;
                    }
                    Err(_) => {}
                }
                break;
            }
            () = conn.cancel.cancelled() => {
                info!(worker_id = %conn.id, "session cancelled");
                close_with(&mut ws_tx, CLOSE_GOING_AWAY, "going away").await;
                break;
            }
        }
    }

    heartbeat.abort();
    pool.deregister(&conn).await;
}

/// Extract UTF-8 text from a frame. Binary frames carrying valid UTF-8 are
/// accepted as text; everything else yields `None`.
fn frame_text(msg: &Message) -> Option<String> {
    match msg {
        Message::Text(t) => Some(t.to_string()),
        Message::Binary(data) => match std::str::from_utf8(data) {
            Ok(s) => Some(s.to_string()),
            Err(_) => {
                debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                None
            }
        },
        _ => None,
    }
}

/// Route one decoded frame from a registered worker.
pub(crate) fn handle_frame(pool: &WorkerPool, conn: &Arc<WorkerConnection>, frame: WorkerMessage) {
    match frame {
        WorkerMessage::Hello { .. } => {
            debug!(worker_id = %conn.id, "duplicate hello on live session dropped");
        }
        WorkerMessage::Ready {} => {
            conn.set_idle();
            pool.publish(PoolEvent::WorkerReady {
                worker_id: conn.id.clone(),
            });
        }
        WorkerMessage::Stdout {
            execution_id,
            chunk,
            timestamp,
        } => {
            pool.publish(PoolEvent::Stdout {
                worker_id: conn.id.clone(),
                execution_id,
                chunk,
                timestamp,
            });
        }
        WorkerMessage::Stderr {
            execution_id,
            chunk,
            timestamp,
        } => {
            pool.publish(PoolEvent::Stderr {
                worker_id: conn.id.clone(),
                execution_id,
                chunk,
                timestamp,
            });
        }
        WorkerMessage::Event {
            execution_id,
            event_type,
            payload,
        } => {
            pool.publish(PoolEvent::PersonaEvent {
                worker_id: conn.id.clone(),
                execution_id,
                kind: event_type,
                payload,
            });
        }
        WorkerMessage::Complete {
            execution_id,
            status,
            exit_code,
            duration_ms,
            session_id,
            total_cost_usd,
        } => {
            conn.set_idle();
            pool.publish(PoolEvent::Complete {
                worker_id: conn.id.clone(),
                report: CompletionReport {
                    execution_id,
                    status,
                    exit_code,
                    duration_ms,
                    session_id,
                    total_cost_usd,
                },
            });
        }
        WorkerMessage::Heartbeat { .. } => {
            // Liveness was stamped on receipt.
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
