//! Event subscriptions. Pure configuration; the core only reads.

use chrono::Utc;
use rusqlite::{params, Connection, Row};

use troupe_core::{EventSubscription, PersonaId, SubscriptionId};

use crate::errors::Result;

pub fn insert(conn: &Connection, sub: &EventSubscription) -> Result<()> {
    let _ = conn.execute(
        "INSERT INTO persona_event_subscriptions
             (id, project_id, persona_id, event_type, source_filter, enabled, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            sub.id.as_str(),
            sub.project_id,
            sub.persona_id.as_str(),
            sub.event_type,
            sub.source_filter,
            sub.enabled,
            Utc::now(),
        ],
    )?;
    Ok(())
}

/// Subscriptions for an event type, optionally narrowed to one project.
///
/// `project` is `None` for the `"default"` tenancy, which sees every
/// subscription of the matching type.
pub fn for_event_type(
    conn: &Connection,
    event_type: &str,
    project: Option<&str>,
) -> Result<Vec<EventSubscription>> {
    let mut subs = Vec::new();
    match project {
        Some(project_id) => {
            let mut stmt = conn.prepare(
                "SELECT id, project_id, persona_id, event_type, source_filter, enabled
                 FROM persona_event_subscriptions
                 WHERE event_type = ?1 AND project_id = ?2
                 ORDER BY created_at",
            )?;
            let rows = stmt.query_map(params![event_type, project_id], map_row)?;
            for sub in rows {
                subs.push(sub?);
            }
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT id, project_id, persona_id, event_type, source_filter, enabled
                 FROM persona_event_subscriptions
                 WHERE event_type = ?1
                 ORDER BY created_at",
            )?;
            let rows = stmt.query_map([event_type], map_row)?;
            for sub in rows {
                subs.push(sub?);
            }
        }
    }
    Ok(subs)
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<EventSubscription> {
    Ok(EventSubscription {
        id: SubscriptionId::from(row.get::<_, String>(0)?),
        project_id: row.get(1)?,
        persona_id: PersonaId::from(row.get::<_, String>(2)?),
        event_type: row.get(3)?,
        source_filter: row.get(4)?,
        enabled: row.get(5)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
