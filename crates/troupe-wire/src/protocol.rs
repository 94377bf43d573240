//! Message envelope types and the frame codec.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use troupe_core::{ExecutionId, PersonaId, WorkerId};

/// Codec errors.
#[derive(Debug, Error)]
pub enum WireError {
    /// The frame was not a valid message of the expected direction.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Kinds of mid-execution events a worker can surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonaEventKind {
    /// The persona asks a human to review something before proceeding.
    ManualReview,
    /// The persona sends a message addressed to a user.
    UserMessage,
    /// The persona reports a noteworthy action it took.
    PersonaAction,
    /// The persona publishes a new event onto the event table.
    EmitEvent,
}

/// Frames a worker sends to the orchestrator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum WorkerMessage {
    /// First frame after connecting; identifies the worker.
    Hello {
        worker_id: WorkerId,
        version: String,
        #[serde(default)]
        capabilities: Vec<String>,
    },
    /// The worker is idle and accepts assignments.
    Ready {},
    /// A chunk of standard output from the running execution.
    Stdout {
        execution_id: ExecutionId,
        chunk: String,
        timestamp: DateTime<Utc>,
    },
    /// A chunk of standard error from the running execution.
    Stderr {
        execution_id: ExecutionId,
        chunk: String,
        timestamp: DateTime<Utc>,
    },
    /// Terminal report for an execution.
    Complete {
        execution_id: ExecutionId,
        /// `"completed"`, `"cancelled"`, or an error status.
        status: String,
        exit_code: i32,
        duration_ms: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_cost_usd: Option<f64>,
    },
    /// Structured mid-execution event parsed from the CLI output.
    Event {
        execution_id: ExecutionId,
        event_type: PersonaEventKind,
        payload: serde_json::Value,
    },
    /// Liveness signal.
    Heartbeat { timestamp: DateTime<Utc> },
}

/// Per-assignment execution policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignConfig {
    /// Wall-clock budget the worker enforces on the CLI process.
    pub timeout_ms: u64,
    /// Output cap the worker enforces on the combined streams.
    pub max_output_bytes: u64,
}

/// Frames the orchestrator sends to a worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum OrchestratorMessage {
    /// Registration accepted; `session_token` identifies this registration.
    Ack {
        worker_id: WorkerId,
        session_token: String,
    },
    /// Hand an execution to the worker.
    Assign {
        execution_id: ExecutionId,
        persona_id: PersonaId,
        prompt: String,
        env: HashMap<String, String>,
        config: AssignConfig,
    },
    /// Advisory cancellation; the worker still reports `complete`.
    Cancel { execution_id: ExecutionId },
    /// Orderly shutdown announcement.
    Shutdown {
        reason: String,
        grace_period_ms: u64,
    },
    /// Liveness signal.
    Heartbeat { timestamp: DateTime<Utc> },
}

impl WorkerMessage {
    /// Decode a text frame from a worker.
    pub fn decode(frame: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(frame)?)
    }

    /// Encode as a text frame.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl OrchestratorMessage {
    /// Decode a text frame from the orchestrator.
    pub fn decode(frame: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(frame)?)
    }

    /// Encode as a text frame.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn hello_decodes() {
        let frame = r#"{"type":"hello","workerId":"w1","version":"1.4.0","capabilities":["shell","git"]}"#;
        let msg = WorkerMessage::decode(frame).unwrap();
        match msg {
            WorkerMessage::Hello {
                worker_id,
                version,
                capabilities,
            } => {
                assert_eq!(worker_id.as_str(), "w1");
                assert_eq!(version, "1.4.0");
                assert_eq!(capabilities, vec!["shell", "git"]);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn hello_capabilities_default_empty() {
        let frame = r#"{"type":"hello","workerId":"w1","version":"1.0.0"}"#;
        let msg = WorkerMessage::decode(frame).unwrap();
        match msg {
            WorkerMessage::Hello { capabilities, .. } => assert!(capabilities.is_empty()),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn ready_decodes() {
        let msg = WorkerMessage::decode(r#"{"type":"ready"}"#).unwrap();
        assert!(matches!(msg, WorkerMessage::Ready {}));
    }

    #[test]
    fn stdout_roundtrip() {
        let msg = WorkerMessage::Stdout {
            execution_id: ExecutionId::from("e1"),
            chunk: "hello\n".into(),
            timestamp: ts(),
        };
        let frame = msg.encode();
        let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["type"], "stdout");
        assert_eq!(parsed["executionId"], "e1");
        assert_eq!(parsed["chunk"], "hello\n");
        let back = WorkerMessage::decode(&frame).unwrap();
        assert!(matches!(back, WorkerMessage::Stdout { .. }));
    }

    #[test]
    fn complete_decodes_with_optionals() {
        let frame = r#"{"type":"complete","executionId":"e1","status":"completed","exitCode":0,"durationMs":123,"sessionId":"s-9","totalCostUsd":0.42}"#;
        let msg = WorkerMessage::decode(frame).unwrap();
        match msg {
            WorkerMessage::Complete {
                execution_id,
                status,
                exit_code,
                duration_ms,
                session_id,
                total_cost_usd,
            } => {
                assert_eq!(execution_id.as_str(), "e1");
                assert_eq!(status, "completed");
                assert_eq!(exit_code, 0);
                assert_eq!(duration_ms, 123);
                assert_eq!(session_id.as_deref(), Some("s-9"));
                assert_eq!(total_cost_usd, Some(0.42));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn complete_optionals_absent() {
        let frame = r#"{"type":"complete","executionId":"e1","status":"failed","exitCode":1,"durationMs":5}"#;
        let msg = WorkerMessage::decode(frame).unwrap();
        match msg {
            WorkerMessage::Complete {
                session_id,
                total_cost_usd,
                ..
            } => {
                assert!(session_id.is_none());
                assert!(total_cost_usd.is_none());
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn complete_encode_skips_absent_optionals() {
        let msg = WorkerMessage::Complete {
            execution_id: ExecutionId::from("e1"),
            status: "failed".into(),
            exit_code: 1,
            duration_ms: 5,
            session_id: None,
            total_cost_usd: None,
        };
        let frame = msg.encode();
        assert!(!frame.contains("sessionId"));
        assert!(!frame.contains("totalCostUsd"));
    }

    #[test]
    fn event_kind_snake_case() {
        let frame = r#"{"type":"event","executionId":"e1","eventType":"manual_review","payload":{"title":"check this"}}"#;
        let msg = WorkerMessage::decode(frame).unwrap();
        match msg {
            WorkerMessage::Event {
                event_type,
                payload,
                ..
            } => {
                assert_eq!(event_type, PersonaEventKind::ManualReview);
                assert_eq!(payload["title"], "check this");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn all_event_kinds_parse() {
        for (text, kind) in [
            ("manual_review", PersonaEventKind::ManualReview),
            ("user_message", PersonaEventKind::UserMessage),
            ("persona_action", PersonaEventKind::PersonaAction),
            ("emit_event", PersonaEventKind::EmitEvent),
        ] {
            let parsed: PersonaEventKind =
                serde_json::from_str(&format!("\"{text}\"")).unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn unknown_discriminant_is_error() {
        assert!(WorkerMessage::decode(r#"{"type":"selfdestruct"}"#).is_err());
    }

    #[test]
    fn garbage_is_error() {
        assert!(WorkerMessage::decode("not json").is_err());
        assert!(WorkerMessage::decode("[1,2,3]").is_err());
        assert!(WorkerMessage::decode("").is_err());
    }

    #[test]
    fn ack_shape() {
        let msg = OrchestratorMessage::Ack {
            worker_id: WorkerId::from("w1"),
            session_token: "deadbeef".into(),
        };
        let parsed: serde_json::Value = serde_json::from_str(&msg.encode()).unwrap();
        assert_eq!(parsed["type"], "ack");
        assert_eq!(parsed["workerId"], "w1");
        assert_eq!(parsed["sessionToken"], "deadbeef");
    }

    #[test]
    fn assign_shape() {
        let mut env = HashMap::new();
        let _ = env.insert("CONNECTOR_GITLAB".to_string(), "tok".to_string());
        let msg = OrchestratorMessage::Assign {
            execution_id: ExecutionId::from("e1"),
            persona_id: PersonaId::from("p1"),
            prompt: "do the thing".into(),
            env,
            config: AssignConfig {
                timeout_ms: 300_000,
                max_output_bytes: 10 * 1024 * 1024,
            },
        };
        let parsed: serde_json::Value = serde_json::from_str(&msg.encode()).unwrap();
        assert_eq!(parsed["type"], "assign");
        assert_eq!(parsed["executionId"], "e1");
        assert_eq!(parsed["personaId"], "p1");
        assert_eq!(parsed["prompt"], "do the thing");
        assert_eq!(parsed["env"]["CONNECTOR_GITLAB"], "tok");
        assert_eq!(parsed["config"]["timeoutMs"], 300_000);
        assert_eq!(parsed["config"]["maxOutputBytes"], 10 * 1024 * 1024);
    }

    #[test]
    fn cancel_shape() {
        let msg = OrchestratorMessage::Cancel {
            execution_id: ExecutionId::from("e1"),
        };
        let parsed: serde_json::Value = serde_json::from_str(&msg.encode()).unwrap();
        assert_eq!(parsed["type"], "cancel");
        assert_eq!(parsed["executionId"], "e1");
    }

    #[test]
    fn shutdown_shape() {
        let msg = OrchestratorMessage::Shutdown {
            reason: "restarting".into(),
            grace_period_ms: 5_000,
        };
        let parsed: serde_json::Value = serde_json::from_str(&msg.encode()).unwrap();
        assert_eq!(parsed["type"], "shutdown");
        assert_eq!(parsed["reason"], "restarting");
        assert_eq!(parsed["gracePeriodMs"], 5_000);
    }

    #[test]
    fn heartbeat_roundtrip_both_directions() {
        let w = WorkerMessage::Heartbeat { timestamp: ts() };
        let o = OrchestratorMessage::Heartbeat { timestamp: ts() };
        assert!(matches!(
            WorkerMessage::decode(&w.encode()).unwrap(),
            WorkerMessage::Heartbeat { .. }
        ));
        assert!(matches!(
            OrchestratorMessage::decode(&o.encode()).unwrap(),
            OrchestratorMessage::Heartbeat { .. }
        ));
    }

    #[test]
    fn timestamps_are_rfc3339() {
        let frame = WorkerMessage::Heartbeat { timestamp: ts() }.encode();
        let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
        let raw = parsed["timestamp"].as_str().unwrap();
        assert!(raw.starts_with("2026-03-01T12:00:00"));
    }

    #[test]
    fn worker_frames_do_not_decode_as_orchestrator_frames() {
        let frame = r#"{"type":"ready"}"#;
        assert!(OrchestratorMessage::decode(frame).is_err());
    }
}
