//! Consolidated idempotent schema migration.

use rusqlite::Connection;

use crate::errors::Result;

/// Run the schema migration. Safe to call on every boot.
pub fn run(conn: &Connection) -> Result<()> {
    tracing::debug!("running database migrations");
    conn.execute_batch(SCHEMA)?;
    tracing::info!("database migrations complete");
    Ok(())
}

const SCHEMA: &str = r#"

-- ============================================================================
-- Personas
-- ============================================================================

CREATE TABLE IF NOT EXISTS personas (
    id                TEXT PRIMARY KEY,
    project_id        TEXT NOT NULL DEFAULT 'default',
    name              TEXT NOT NULL,
    description       TEXT,
    system_prompt     TEXT NOT NULL,
    structured_prompt TEXT,
    enabled           INTEGER NOT NULL DEFAULT 1,
    max_concurrent    INTEGER NOT NULL DEFAULT 1,
    timeout_ms        INTEGER NOT NULL DEFAULT 300000,
    model_profile     TEXT,
    max_budget_usd    REAL,
    max_turns         INTEGER,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_personas_enabled ON personas(enabled);
CREATE INDEX IF NOT EXISTS idx_personas_project ON personas(project_id);

-- ============================================================================
-- Tool Definitions
-- ============================================================================

CREATE TABLE IF NOT EXISTS persona_tool_definitions (
    id                       TEXT PRIMARY KEY,
    name                     TEXT NOT NULL UNIQUE,
    category                 TEXT NOT NULL,
    description              TEXT NOT NULL,
    script_path              TEXT NOT NULL,
    implementation_guide     TEXT,
    input_schema             TEXT,
    requires_credential_type TEXT,
    created_at               TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ptd_category ON persona_tool_definitions(category);

-- ============================================================================
-- Persona <-> Tool Assignments
-- ============================================================================

CREATE TABLE IF NOT EXISTS persona_tools (
    id         TEXT PRIMARY KEY,
    persona_id TEXT NOT NULL REFERENCES personas(id) ON DELETE CASCADE,
    tool_id    TEXT NOT NULL REFERENCES persona_tool_definitions(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    UNIQUE(persona_id, tool_id)
);
CREATE INDEX IF NOT EXISTS idx_pt_persona ON persona_tools(persona_id);

-- ============================================================================
-- Credentials
-- ============================================================================

CREATE TABLE IF NOT EXISTS persona_credentials (
    id           TEXT PRIMARY KEY,
    persona_id   TEXT NOT NULL REFERENCES personas(id) ON DELETE CASCADE,
    name         TEXT NOT NULL,
    service_type TEXT NOT NULL,
    ciphertext   TEXT NOT NULL,
    iv           TEXT NOT NULL,
    auth_tag     TEXT NOT NULL,
    last_used_at TEXT,
    created_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pc_persona ON persona_credentials(persona_id);

-- ============================================================================
-- Events
-- ============================================================================

CREATE TABLE IF NOT EXISTS persona_events (
    id                TEXT PRIMARY KEY,
    project_id        TEXT NOT NULL DEFAULT 'default',
    event_type        TEXT NOT NULL,
    source_type       TEXT NOT NULL,
    source_id         TEXT,
    target_persona_id TEXT,
    payload           TEXT,
    status            TEXT NOT NULL DEFAULT 'pending'
                      CHECK(status IN ('pending', 'processing', 'delivered', 'partial', 'failed', 'skipped')),
    use_case_id       TEXT,
    error_message     TEXT,
    created_at        TEXT NOT NULL,
    processed_at      TEXT
);
CREATE INDEX IF NOT EXISTS idx_pev_status  ON persona_events(status);
CREATE INDEX IF NOT EXISTS idx_pev_project ON persona_events(project_id);
CREATE INDEX IF NOT EXISTS idx_pev_type    ON persona_events(event_type);
CREATE INDEX IF NOT EXISTS idx_pev_created ON persona_events(created_at);

-- ============================================================================
-- Event Subscriptions
-- ============================================================================

CREATE TABLE IF NOT EXISTS persona_event_subscriptions (
    id            TEXT PRIMARY KEY,
    project_id    TEXT NOT NULL DEFAULT 'default',
    persona_id    TEXT NOT NULL REFERENCES personas(id) ON DELETE CASCADE,
    event_type    TEXT NOT NULL,
    source_filter TEXT,
    enabled       INTEGER NOT NULL DEFAULT 1,
    created_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pes_event_type ON persona_event_subscriptions(event_type);
CREATE INDEX IF NOT EXISTS idx_pes_project    ON persona_event_subscriptions(project_id);

-- ============================================================================
-- Triggers
-- ============================================================================

CREATE TABLE IF NOT EXISTS persona_triggers (
    id                TEXT PRIMARY KEY,
    project_id        TEXT NOT NULL DEFAULT 'default',
    persona_id        TEXT NOT NULL REFERENCES personas(id) ON DELETE CASCADE,
    trigger_type      TEXT NOT NULL CHECK(trigger_type IN ('manual', 'schedule', 'polling', 'webhook', 'chain')),
    config            TEXT,
    enabled           INTEGER NOT NULL DEFAULT 1,
    last_triggered_at TEXT,
    next_trigger_at   TEXT,
    use_case_id       TEXT,
    created_at        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ptr_next    ON persona_triggers(next_trigger_at);
CREATE INDEX IF NOT EXISTS idx_ptr_enabled ON persona_triggers(enabled);

-- ============================================================================
-- Executions
-- ============================================================================

CREATE TABLE IF NOT EXISTS persona_executions (
    id            TEXT PRIMARY KEY,
    project_id    TEXT NOT NULL DEFAULT 'default',
    persona_id    TEXT NOT NULL,
    status        TEXT NOT NULL DEFAULT 'queued'
                  CHECK(status IN ('queued', 'running', 'completed', 'failed', 'cancelled')),
    input_data    TEXT,
    output_data   TEXT,
    session_id    TEXT,
    cost_usd      REAL,
    error_message TEXT,
    duration_ms   INTEGER,
    started_at    TEXT,
    completed_at  TEXT,
    created_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pe_persona ON persona_executions(persona_id);
CREATE INDEX IF NOT EXISTS idx_pe_status  ON persona_executions(status);
CREATE INDEX IF NOT EXISTS idx_pe_created ON persona_executions(created_at DESC);

"#;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
