//! Shared fixtures for repository tests.

use chrono::Utc;

use troupe_core::{
    Credential, CredentialId, Event, EventId, EventStatus, EventSubscription, ExecutionId,
    ExecutionRecord, ExecutionStatus, Persona, PersonaId, SubscriptionId, ToolDefinition, ToolId,
    Trigger, TriggerId, TriggerType,
};

use crate::connection::{new_in_memory, ConnectionConfig, ConnectionPool};
use crate::migrations;

pub(crate) fn migrated_pool() -> ConnectionPool {
    let pool = new_in_memory(&ConnectionConfig::default()).unwrap();
    {
        let conn = pool.get().unwrap();
        migrations::run(&conn).unwrap();
    }
    pool
}

pub(crate) fn sample_persona(id: &str) -> Persona {
    Persona {
        id: PersonaId::from(id),
        project_id: "default".into(),
        name: format!("persona-{id}"),
        description: Some("Watches merge requests".into()),
        system_prompt: "You are a careful reviewer.".into(),
        structured_prompt: None,
        enabled: true,
        max_concurrent: 1,
        timeout_ms: 300_000,
        model_profile: None,
        max_budget_usd: None,
        max_turns: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub(crate) fn sample_tool(id: &str, name: &str) -> ToolDefinition {
    ToolDefinition {
        id: ToolId::from(id),
        name: name.into(),
        category: "vcs".into(),
        description: "Posts a comment on a merge request".into(),
        script_path: "/opt/tools/mr_comment.sh".into(),
        implementation_guide: None,
        input_schema: Some(r#"{"type":"object","properties":{"body":{"type":"string"}}}"#.into()),
        requires_credential_type: Some("gitlab".into()),
    }
}

pub(crate) fn sample_credential(id: &str, persona_id: &str, name: &str) -> Credential {
    Credential {
        id: CredentialId::from(id),
        persona_id: PersonaId::from(persona_id),
        name: name.into(),
        service_type: name.into(),
        ciphertext: "AAAA".into(),
        iv: "BBBB".into(),
        auth_tag: "CCCC".into(),
        last_used_at: None,
        created_at: Utc::now(),
    }
}

pub(crate) fn sample_event(id: &str, event_type: &str) -> Event {
    Event {
        id: EventId::from(id),
        project_id: "default".into(),
        event_type: event_type.into(),
        source_type: "api".into(),
        source_id: None,
        target_persona_id: None,
        payload: None,
        status: EventStatus::Pending,
        use_case_id: None,
        error_message: None,
        created_at: Utc::now(),
        processed_at: None,
    }
}

pub(crate) fn sample_subscription(id: &str, persona_id: &str, event_type: &str) -> EventSubscription {
    EventSubscription {
        id: SubscriptionId::from(id),
        project_id: "default".into(),
        persona_id: PersonaId::from(persona_id),
        event_type: event_type.into(),
        source_filter: None,
        enabled: true,
    }
}

pub(crate) fn sample_trigger(id: &str, persona_id: &str) -> Trigger {
    Trigger {
        id: TriggerId::from(id),
        project_id: "default".into(),
        persona_id: PersonaId::from(persona_id),
        trigger_type: TriggerType::Schedule,
        config: Some(r#"{"cron":"every 10s","event_type":"tick"}"#.into()),
        enabled: true,
        last_triggered_at: None,
        next_trigger_at: Some(Utc::now()),
        use_case_id: None,
    }
}

pub(crate) fn sample_execution(id: &str, persona_id: &str) -> ExecutionRecord {
    ExecutionRecord {
        id: ExecutionId::from(id),
        project_id: "default".into(),
        persona_id: PersonaId::from(persona_id),
        status: ExecutionStatus::Queued,
        input_data: None,
        output_data: None,
        session_id: None,
        cost_usd: None,
        error_message: None,
        duration_ms: None,
        started_at: None,
        completed_at: None,
        created_at: Utc::now(),
    }
}
