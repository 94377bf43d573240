//! Pending event rows and their status lifecycle.
//!
//! Status only ever moves pending → processing → one terminal state. The
//! transition to `processing` is a compare-and-set so concurrent processors
//! cannot pick up the same event twice.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use troupe_core::{Event, EventId, EventStatus, PersonaId};

use crate::errors::Result;
use crate::row::bad_column;

pub fn insert(conn: &Connection, event: &Event) -> Result<()> {
    let _ = conn.execute(
        "INSERT INTO persona_events
             (id, project_id, event_type, source_type, source_id, target_persona_id,
              payload, status, use_case_id, error_message, created_at, processed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            event.id.as_str(),
            event.project_id,
            event.event_type,
            event.source_type,
            event.source_id,
            event.target_persona_id.as_ref().map(|p| p.as_str()),
            event.payload,
            event.status.as_str(),
            event.use_case_id,
            event.error_message,
            event.created_at,
            event.processed_at,
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: &EventId) -> Result<Option<Event>> {
    let event = conn
        .query_row(
            &format!("{SELECT_COLUMNS} WHERE id = ?1"),
            [id.as_str()],
            map_row,
        )
        .optional()?;
    Ok(event)
}

/// Oldest pending events first, up to `limit`.
pub fn list_pending(conn: &Connection, limit: usize) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_COLUMNS} WHERE status = 'pending' ORDER BY created_at ASC LIMIT ?1"
    ))?;
    let rows = stmt.query_map([limit as i64], map_row)?;
    let mut events = Vec::new();
    for event in rows {
        events.push(event?);
    }
    Ok(events)
}

/// Claim a pending event for processing.
///
/// Returns `false` when the event was already claimed (or is no longer
/// pending), in which case the caller must skip it.
pub fn mark_processing(conn: &Connection, id: &EventId) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE persona_events SET status = 'processing' WHERE id = ?1 AND status = 'pending'",
        [id.as_str()],
    )?;
    Ok(changed == 1)
}

/// Move a claimed event to its terminal status.
pub fn finish(
    conn: &Connection,
    id: &EventId,
    status: EventStatus,
    error_message: Option<&str>,
    processed_at: DateTime<Utc>,
) -> Result<()> {
    let _ = conn.execute(
        "UPDATE persona_events
         SET status = ?2, error_message = ?3, processed_at = ?4
         WHERE id = ?1",
        params![id.as_str(), status.as_str(), error_message, processed_at],
    )?;
    Ok(())
}

const SELECT_COLUMNS: &str = "SELECT id, project_id, event_type, source_type, source_id,
        target_persona_id, payload, status, use_case_id, error_message,
        created_at, processed_at
 FROM persona_events";

fn map_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    let status_raw: String = row.get(7)?;
    let status = EventStatus::parse(&status_raw)
        .ok_or_else(|| bad_column(7, format!("unknown event status '{status_raw}'")))?;
    Ok(Event {
        id: EventId::from(row.get::<_, String>(0)?),
        project_id: row.get(1)?,
        event_type: row.get(2)?,
        source_type: row.get(3)?,
        source_id: row.get(4)?,
        target_persona_id: row
            .get::<_, Option<String>>(5)?
            .map(PersonaId::from),
        payload: row.get(6)?,
        status,
        use_case_id: row.get(8)?,
        error_message: row.get(9)?,
        created_at: row.get(10)?,
        processed_at: row.get(11)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
