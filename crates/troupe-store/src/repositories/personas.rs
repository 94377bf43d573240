//! Persona rows. Created and updated by external CRUD; the core only reads.

use rusqlite::{params, Connection, OptionalExtension, Row};

use troupe_core::{Persona, PersonaId};

use crate::errors::Result;

pub fn insert(conn: &Connection, persona: &Persona) -> Result<()> {
    let _ = conn.execute(
        "INSERT INTO personas (id, project_id, name, description, system_prompt,
                               structured_prompt, enabled, max_concurrent, timeout_ms,
                               model_profile, max_budget_usd, max_turns, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            persona.id.as_str(),
            persona.project_id,
            persona.name,
            persona.description,
            persona.system_prompt,
            persona.structured_prompt,
            persona.enabled,
            persona.max_concurrent,
            persona.timeout_ms,
            persona.model_profile,
            persona.max_budget_usd,
            persona.max_turns,
            persona.created_at,
            persona.updated_at,
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: &PersonaId) -> Result<Option<Persona>> {
    let persona = conn
        .query_row(
            "SELECT id, project_id, name, description, system_prompt, structured_prompt,
                    enabled, max_concurrent, timeout_ms, model_profile, max_budget_usd,
                    max_turns, created_at, updated_at
             FROM personas WHERE id = ?1",
            [id.as_str()],
            map_row,
        )
        .optional()?;
    Ok(persona)
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<Persona> {
    Ok(Persona {
        id: PersonaId::from(row.get::<_, String>(0)?),
        project_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        system_prompt: row.get(4)?,
        structured_prompt: row.get(5)?,
        enabled: row.get(6)?,
        max_concurrent: row.get(7)?,
        timeout_ms: row.get(8)?,
        model_profile: row.get(9)?,
        max_budget_usd: row.get(10)?,
        max_turns: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
