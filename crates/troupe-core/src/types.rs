//! Domain records exchanged between the store, the dispatcher and the server.
//!
//! These mirror the persisted rows one-to-one. Mutability is narrow on
//! purpose: personas, tools, credentials and subscriptions are immutable at
//! execution time (external CRUD owns them), events and triggers are mutated
//! only by the periodic processors, executions only by the dispatcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{
    CredentialId, EventId, ExecutionId, PersonaId, SubscriptionId, ToolId, TriggerId,
};

/// The template of an executable agent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Persona {
    pub id: PersonaId,
    /// Tenancy boundary. Defaults to `"default"`.
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    /// Raw system prompt, used when `structured_prompt` is absent or invalid.
    pub system_prompt: String,
    /// JSON blob with identity/instructions/examples sections.
    pub structured_prompt: Option<String>,
    pub enabled: bool,
    /// Upper bound on simultaneously running executions for this persona.
    pub max_concurrent: i64,
    /// Execution timeout handed to the worker.
    pub timeout_ms: i64,
    /// Opaque JSON descriptor selecting the upstream model provider.
    pub model_profile: Option<String>,
    pub max_budget_usd: Option<f64>,
    pub max_turns: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Persona {
    /// Parse the model-profile descriptor, if present and well-formed.
    pub fn parsed_model_profile(&self) -> Option<ModelProfile> {
        let raw = self.model_profile.as_deref()?;
        serde_json::from_str(raw).ok()
    }
}

/// Parsed form of [`Persona::model_profile`].
///
/// Unknown fields are ignored so older descriptors keep working.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModelProfile {
    /// Provider key: `"ollama"`, `"litellm"`, `"custom"` or anything else
    /// (anything else leaves the default credential env untouched).
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

/// A tool a persona may be bound to; contributes documentation to the prompt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub id: ToolId,
    pub name: String,
    pub category: String,
    pub description: String,
    /// Path of the script the worker invokes for this tool.
    pub script_path: String,
    /// Free-form usage notes; preferred over the script path in prompts.
    pub implementation_guide: Option<String>,
    /// JSON schema of the tool input, included verbatim in prompts.
    pub input_schema: Option<String>,
    /// Connector name this tool needs a credential for.
    pub requires_credential_type: Option<String>,
}

/// Encrypted persona-scoped secret.
///
/// `ciphertext`, `iv` and `auth_tag` are base64; the plaintext exists only
/// in memory at dispatch time and is never logged or served by read APIs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Credential {
    pub id: CredentialId,
    pub persona_id: PersonaId,
    /// Connector name, e.g. `"gitlab"`; uppercased for env injection.
    pub name: String,
    pub service_type: String,
    pub ciphertext: String,
    pub iv: String,
    pub auth_tag: String,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of a pending event row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Processing,
    Delivered,
    /// Some subscription matches were delivered, some failed.
    Partial,
    Failed,
    /// No subscription matched.
    Skipped,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Delivered => "delivered",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "delivered" => Some(Self::Delivered),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

/// A unit of pending work matched against subscriptions by the event tick.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub project_id: String,
    pub event_type: String,
    /// Where the event came from: `"trigger"`, `"persona"`, `"api"`, ...
    pub source_type: String,
    pub source_id: Option<String>,
    /// When set, only subscriptions owned by this persona match.
    pub target_persona_id: Option<PersonaId>,
    pub payload: Option<String>,
    pub status: EventStatus,
    pub use_case_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Declarative binding from an event type to a persona.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventSubscription {
    pub id: SubscriptionId,
    pub project_id: String,
    pub persona_id: PersonaId,
    pub event_type: String,
    /// Exact source ID, or a prefix when it ends in `*`.
    pub source_filter: Option<String>,
    pub enabled: bool,
}

/// Kinds of time- or rule-based event sources.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Manual,
    Schedule,
    /// Reserved for connector polling; the scheduler tick skips these.
    Polling,
    Webhook,
    Chain,
}

impl TriggerType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Schedule => "schedule",
            Self::Polling => "polling",
            Self::Webhook => "webhook",
            Self::Chain => "chain",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(Self::Manual),
            "schedule" => Some(Self::Schedule),
            "polling" => Some(Self::Polling),
            "webhook" => Some(Self::Webhook),
            "chain" => Some(Self::Chain),
            _ => None,
        }
    }
}

/// A time- or rule-based event source.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Trigger {
    pub id: TriggerId,
    pub project_id: String,
    pub persona_id: PersonaId,
    pub trigger_type: TriggerType,
    /// Opaque JSON: `{"cron": "every 10s"}` / `{"interval_seconds": 60}` /
    /// `{"event_type": "...", "payload": {...}}`.
    pub config: Option<String>,
    pub enabled: bool,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub next_trigger_at: Option<DateTime<Utc>>,
    pub use_case_id: Option<String>,
}

/// Lifecycle of one execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether this status is terminal (no further transitions).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Map a worker-reported completion status onto an execution status.
    /// Anything unrecognized is treated as a failure.
    pub fn from_completion(s: &str) -> Self {
        match s {
            "completed" => Self::Completed,
            "cancelled" => Self::Cancelled,
            _ => Self::Failed,
        }
    }
}

/// Persisted record of one execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub project_id: String,
    pub persona_id: PersonaId,
    pub status: ExecutionStatus,
    pub input_data: Option<String>,
    /// Accumulated stdout/stderr chunks, newline-joined.
    pub output_data: Option<String>,
    /// Session identifier reported by the worker's CLI on completion.
    pub session_id: Option<String>,
    pub cost_usd: Option<f64>,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// An execution request as submitted by HTTP, the bus, or the event tick.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecRequest {
    pub execution_id: ExecutionId,
    pub persona_id: PersonaId,
    #[serde(default = "default_project")]
    pub project_id: String,
    /// Caller-supplied prompt; replaced by the assembled prompt when the
    /// persona exists in the store.
    pub prompt: String,
    #[serde(default)]
    pub input_data: Option<serde_json::Value>,
    /// Overrides the default execution timeout when set.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_project() -> String {
    crate::DEFAULT_PROJECT.to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_status_roundtrip() {
        for s in [
            EventStatus::Pending,
            EventStatus::Processing,
            EventStatus::Delivered,
            EventStatus::Partial,
            EventStatus::Failed,
            EventStatus::Skipped,
        ] {
            assert_eq!(EventStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(EventStatus::parse("bogus"), None);
    }

    #[test]
    fn execution_status_roundtrip() {
        for s in [
            ExecutionStatus::Queued,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert_eq!(ExecutionStatus::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Queued.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
    }

    #[test]
    fn completion_mapping() {
        assert_eq!(
            ExecutionStatus::from_completion("completed"),
            ExecutionStatus::Completed
        );
        assert_eq!(
            ExecutionStatus::from_completion("cancelled"),
            ExecutionStatus::Cancelled
        );
        assert_eq!(
            ExecutionStatus::from_completion("error"),
            ExecutionStatus::Failed
        );
        assert_eq!(
            ExecutionStatus::from_completion(""),
            ExecutionStatus::Failed
        );
    }

    #[test]
    fn trigger_type_roundtrip() {
        for t in [
            TriggerType::Manual,
            TriggerType::Schedule,
            TriggerType::Polling,
            TriggerType::Webhook,
            TriggerType::Chain,
        ] {
            assert_eq!(TriggerType::parse(t.as_str()), Some(t));
        }
        assert_eq!(TriggerType::parse("cron"), None);
    }

    #[test]
    fn status_serde_is_lowercase() {
        let json = serde_json::to_string(&ExecutionStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
        let json = serde_json::to_string(&EventStatus::Partial).unwrap();
        assert_eq!(json, "\"partial\"");
    }

    #[test]
    fn model_profile_parses_known_shape() {
        let persona = persona_with_profile(Some(
            r#"{"provider":"ollama","model":"llama3","base_url":"http://localhost:11434"}"#,
        ));
        let profile = persona.parsed_model_profile().unwrap();
        assert_eq!(profile.provider, "ollama");
        assert_eq!(profile.base_url.as_deref(), Some("http://localhost:11434"));
        assert!(profile.api_key.is_none());
    }

    #[test]
    fn model_profile_bad_json_is_none() {
        let persona = persona_with_profile(Some("{not json"));
        assert!(persona.parsed_model_profile().is_none());
    }

    #[test]
    fn model_profile_absent_is_none() {
        let persona = persona_with_profile(None);
        assert!(persona.parsed_model_profile().is_none());
    }

    #[test]
    fn exec_request_defaults_project() {
        let req: ExecRequest = serde_json::from_str(
            r#"{"execution_id":"e1","persona_id":"p1","prompt":"go"}"#,
        )
        .unwrap();
        assert_eq!(req.project_id, "default");
        assert!(req.input_data.is_none());
        assert!(req.timeout_ms.is_none());
    }

    fn persona_with_profile(profile: Option<&str>) -> Persona {
        Persona {
            id: PersonaId::from("p1"),
            project_id: "default".into(),
            name: "Reviewer".into(),
            description: None,
            system_prompt: "You review merge requests.".into(),
            structured_prompt: None,
            enabled: true,
            max_concurrent: 1,
            timeout_ms: 300_000,
            model_profile: profile.map(Into::into),
            max_budget_usd: None,
            max_turns: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}
