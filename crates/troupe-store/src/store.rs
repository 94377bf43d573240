//! The [`Store`] facade — pooled access to every repository.
//!
//! Cheap to clone; each call checks a connection out of the pool. Callers on
//! async tasks keep calls short (single statements) so the pool never backs
//! up behind a long transaction.

use chrono::{DateTime, Utc};

use troupe_core::{
    Credential, CredentialId, Event, EventId, EventStatus, EventSubscription, ExecutionId,
    ExecutionRecord, ExecutionStatus, Persona, PersonaId, ToolDefinition, ToolId, Trigger,
    TriggerId, DEFAULT_PROJECT,
};

use crate::connection::{ConnectionConfig, ConnectionPool};
use crate::errors::Result;
use crate::migrations;
use crate::repositories::{
    credentials, events, executions, personas, subscriptions, tools, triggers,
};

pub use crate::repositories::executions::Finalize;

/// Persistence facade over the pooled `SQLite` database.
#[derive(Clone)]
pub struct Store {
    pool: ConnectionPool,
}

impl Store {
    /// Open a file-backed store and run migrations.
    pub fn open(path: &str, config: &ConnectionConfig) -> Result<Self> {
        let pool = crate::connection::new_file(path, config)?;
        {
            let conn = pool.get()?;
            migrations::run(&conn)?;
        }
        Ok(Self { pool })
    }

    /// Open an in-memory store and run migrations (tests).
    pub fn open_in_memory() -> Result<Self> {
        let pool = crate::connection::new_in_memory(&ConnectionConfig::default())?;
        {
            let conn = pool.get()?;
            migrations::run(&conn)?;
        }
        Ok(Self { pool })
    }

    // ── Personas ────────────────────────────────────────────────────

    pub fn persona(&self, id: &PersonaId) -> Result<Option<Persona>> {
        personas::get(&*self.pool.get()?, id)
    }

    pub fn insert_persona(&self, persona: &Persona) -> Result<()> {
        personas::insert(&*self.pool.get()?, persona)
    }

    // ── Tools ───────────────────────────────────────────────────────

    pub fn tools_for_persona(&self, persona_id: &PersonaId) -> Result<Vec<ToolDefinition>> {
        tools::for_persona(&*self.pool.get()?, persona_id)
    }

    pub fn insert_tool(&self, tool: &ToolDefinition) -> Result<()> {
        tools::insert(&*self.pool.get()?, tool)
    }

    pub fn bind_tool(&self, persona_id: &PersonaId, tool_id: &ToolId) -> Result<()> {
        tools::bind(&*self.pool.get()?, persona_id, tool_id)
    }

    // ── Credentials ─────────────────────────────────────────────────

    pub fn credentials_for_persona(&self, persona_id: &PersonaId) -> Result<Vec<Credential>> {
        credentials::for_persona(&*self.pool.get()?, persona_id)
    }

    pub fn insert_credential(&self, credential: &Credential) -> Result<()> {
        credentials::insert(&*self.pool.get()?, credential)
    }

    pub fn touch_credential(&self, id: &CredentialId, at: DateTime<Utc>) -> Result<()> {
        credentials::touch_last_used(&*self.pool.get()?, id, at)
    }

    // ── Events ──────────────────────────────────────────────────────

    pub fn insert_event(&self, event: &Event) -> Result<()> {
        events::insert(&*self.pool.get()?, event)
    }

    pub fn event(&self, id: &EventId) -> Result<Option<Event>> {
        events::get(&*self.pool.get()?, id)
    }

    pub fn pending_events(&self, limit: usize) -> Result<Vec<Event>> {
        events::list_pending(&*self.pool.get()?, limit)
    }

    pub fn claim_event(&self, id: &EventId) -> Result<bool> {
        events::mark_processing(&*self.pool.get()?, id)
    }

    pub fn finish_event(
        &self,
        id: &EventId,
        status: EventStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        events::finish(&*self.pool.get()?, id, status, error_message, Utc::now())
    }

    // ── Subscriptions ───────────────────────────────────────────────

    /// Subscriptions for the event's type, narrowed to the event's project
    /// unless it belongs to the default tenancy.
    pub fn subscriptions_for_event(&self, event: &Event) -> Result<Vec<EventSubscription>> {
        let project = if event.project_id == DEFAULT_PROJECT {
            None
        } else {
            Some(event.project_id.as_str())
        };
        subscriptions::for_event_type(&*self.pool.get()?, &event.event_type, project)
    }

    pub fn insert_subscription(&self, sub: &EventSubscription) -> Result<()> {
        subscriptions::insert(&*self.pool.get()?, sub)
    }

    // ── Triggers ────────────────────────────────────────────────────

    pub fn due_triggers(&self, now: DateTime<Utc>) -> Result<Vec<Trigger>> {
        triggers::due(&*self.pool.get()?, now)
    }

    pub fn trigger(&self, id: &TriggerId) -> Result<Option<Trigger>> {
        triggers::get(&*self.pool.get()?, id)
    }

    pub fn insert_trigger(&self, trigger: &Trigger) -> Result<()> {
        triggers::insert(&*self.pool.get()?, trigger)
    }

    pub fn update_trigger_timings(
        &self,
        id: &TriggerId,
        last_triggered_at: DateTime<Utc>,
        next_trigger_at: DateTime<Utc>,
    ) -> Result<()> {
        triggers::update_timings(&*self.pool.get()?, id, last_triggered_at, next_trigger_at)
    }

    // ── Executions ──────────────────────────────────────────────────

    pub fn insert_execution(&self, record: &ExecutionRecord) -> Result<()> {
        executions::insert(&*self.pool.get()?, record)
    }

    pub fn execution(&self, id: &ExecutionId) -> Result<Option<ExecutionRecord>> {
        executions::get(&*self.pool.get()?, id)
    }

    pub fn set_execution_status(&self, id: &ExecutionId, status: ExecutionStatus) -> Result<()> {
        executions::set_status(&*self.pool.get()?, id, status)
    }

    pub fn mark_execution_running(&self, id: &ExecutionId, started_at: DateTime<Utc>) -> Result<()> {
        executions::mark_running(&*self.pool.get()?, id, started_at)
    }

    pub fn finalize_execution(&self, id: &ExecutionId, fin: &Finalize<'_>) -> Result<()> {
        executions::finalize(&*self.pool.get()?, id, fin)
    }

    pub fn append_execution_output(&self, id: &ExecutionId, chunk: &str) -> Result<()> {
        executions::append_output(&*self.pool.get()?, id, chunk)
    }

    pub fn count_running_executions(&self, persona_id: &PersonaId) -> Result<i64> {
        executions::count_running(&*self.pool.get()?, persona_id)
    }

    /// Fail executions orphaned by a previous process. Call once at boot,
    /// before the dispatcher starts.
    pub fn recover_stale_executions(&self, message: &str) -> Result<usize> {
        executions::fail_stale(&*self.pool.get()?, message, Utc::now())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_event, sample_execution, sample_persona, sample_subscription};

    #[test]
    fn facade_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let persona = sample_persona("p1");
        store.insert_persona(&persona).unwrap();
        assert!(store.persona(&persona.id).unwrap().is_some());
    }

    #[test]
    fn subscriptions_for_default_project_see_everything() {
        let store = Store::open_in_memory().unwrap();
        store.insert_persona(&sample_persona("p1")).unwrap();

        let mut scoped = sample_subscription("s1", "p1", "tick");
        scoped.project_id = "acme".into();
        store.insert_subscription(&scoped).unwrap();
        store
            .insert_subscription(&sample_subscription("s2", "p1", "tick"))
            .unwrap();

        let default_event = sample_event("e1", "tick");
        assert_eq!(store.subscriptions_for_event(&default_event).unwrap().len(), 2);

        let mut acme_event = sample_event("e2", "tick");
        acme_event.project_id = "acme".into();
        assert_eq!(store.subscriptions_for_event(&acme_event).unwrap().len(), 1);
    }

    #[test]
    fn recover_marks_inflight_failed() {
        let store = Store::open_in_memory().unwrap();
        let record = sample_execution("e1", "p1");
        store.insert_execution(&record).unwrap();
        store.mark_execution_running(&record.id, Utc::now()).unwrap();

        let n = store.recover_stale_executions("restarted").unwrap();
        assert_eq!(n, 1);
        let loaded = store.execution(&record.id).unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Failed);
        assert_eq!(loaded.error_message.as_deref(), Some("restarted"));
    }

    #[test]
    fn store_clones_share_the_pool() {
        let store = Store::open_in_memory().unwrap();
        let clone = store.clone();
        store.insert_persona(&sample_persona("p1")).unwrap();
        assert!(clone.persona(&PersonaId::from("p1")).unwrap().is_some());
    }
}
