//! Tool definitions and the persona↔tool many-to-many link.

use chrono::Utc;
use rusqlite::{params, Connection, Row};

use troupe_core::{PersonaId, ToolDefinition, ToolId};

use crate::errors::Result;

pub fn insert(conn: &Connection, tool: &ToolDefinition) -> Result<()> {
    let _ = conn.execute(
        "INSERT INTO persona_tool_definitions
             (id, name, category, description, script_path, implementation_guide,
              input_schema, requires_credential_type, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            tool.id.as_str(),
            tool.name,
            tool.category,
            tool.description,
            tool.script_path,
            tool.implementation_guide,
            tool.input_schema,
            tool.requires_credential_type,
            Utc::now(),
        ],
    )?;
    Ok(())
}

/// Bind a tool to a persona. Duplicate bindings are rejected by the schema.
pub fn bind(conn: &Connection, persona_id: &PersonaId, tool_id: &ToolId) -> Result<()> {
    let link_id = format!("{persona_id}:{tool_id}");
    let _ = conn.execute(
        "INSERT INTO persona_tools (id, persona_id, tool_id, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![link_id, persona_id.as_str(), tool_id.as_str(), Utc::now()],
    )?;
    Ok(())
}

/// All tools bound to a persona, in stable name order.
pub fn for_persona(conn: &Connection, persona_id: &PersonaId) -> Result<Vec<ToolDefinition>> {
    let mut stmt = conn.prepare(
        "SELECT d.id, d.name, d.category, d.description, d.script_path,
                d.implementation_guide, d.input_schema, d.requires_credential_type
         FROM persona_tool_definitions d
         JOIN persona_tools pt ON pt.tool_id = d.id
         WHERE pt.persona_id = ?1
         ORDER BY d.name",
    )?;
    let rows = stmt.query_map([persona_id.as_str()], map_row)?;
    let mut tools = Vec::new();
    for tool in rows {
        tools.push(tool?);
    }
    Ok(tools)
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<ToolDefinition> {
    Ok(ToolDefinition {
        id: ToolId::from(row.get::<_, String>(0)?),
        name: row.get(1)?,
        category: row.get(2)?,
        description: row.get(3)?,
        script_path: row.get(4)?,
        implementation_guide: row.get(5)?,
        input_schema: row.get(6)?,
        requires_credential_type: row.get(7)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
