//! Time- and rule-based triggers.
//!
//! The scheduler tick owns `last_triggered_at`/`next_trigger_at`; everything
//! else is external CRUD configuration.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use troupe_core::{PersonaId, Trigger, TriggerId, TriggerType};

use crate::errors::Result;
use crate::row::bad_column;

pub fn insert(conn: &Connection, trigger: &Trigger) -> Result<()> {
    let _ = conn.execute(
        "INSERT INTO persona_triggers
             (id, project_id, persona_id, trigger_type, config, enabled,
              last_triggered_at, next_trigger_at, use_case_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            trigger.id.as_str(),
            trigger.project_id,
            trigger.persona_id.as_str(),
            trigger.trigger_type.as_str(),
            trigger.config,
            trigger.enabled,
            trigger.last_triggered_at,
            trigger.next_trigger_at,
            trigger.use_case_id,
            Utc::now(),
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: &TriggerId) -> Result<Option<Trigger>> {
    let trigger = conn
        .query_row(
            &format!("{SELECT_COLUMNS} WHERE id = ?1"),
            [id.as_str()],
            map_row,
        )
        .optional()?;
    Ok(trigger)
}

/// Enabled triggers whose next fire time has passed.
pub fn due(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<Trigger>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_COLUMNS}
         WHERE enabled = 1
           AND next_trigger_at IS NOT NULL
           AND datetime(next_trigger_at) <= datetime(?1)
         ORDER BY next_trigger_at"
    ))?;
    let rows = stmt.query_map([now], map_row)?;
    let mut triggers = Vec::new();
    for trigger in rows {
        triggers.push(trigger?);
    }
    Ok(triggers)
}

/// Persist a fire: stamp `last_triggered_at` and schedule the next one.
pub fn update_timings(
    conn: &Connection,
    id: &TriggerId,
    last_triggered_at: DateTime<Utc>,
    next_trigger_at: DateTime<Utc>,
) -> Result<()> {
    let _ = conn.execute(
        "UPDATE persona_triggers SET last_triggered_at = ?2, next_trigger_at = ?3 WHERE id = ?1",
        params![id.as_str(), last_triggered_at, next_trigger_at],
    )?;
    Ok(())
}

const SELECT_COLUMNS: &str = "SELECT id, project_id, persona_id, trigger_type, config, enabled,
        last_triggered_at, next_trigger_at, use_case_id
 FROM persona_triggers";

fn map_row(row: &Row<'_>) -> rusqlite::Result<Trigger> {
    let type_raw: String = row.get(3)?;
    let trigger_type = TriggerType::parse(&type_raw)
        .ok_or_else(|| bad_column(3, format!("unknown trigger type '{type_raw}'")))?;
    Ok(Trigger {
        id: TriggerId::from(row.get::<_, String>(0)?),
        project_id: row.get(1)?,
        persona_id: PersonaId::from(row.get::<_, String>(2)?),
        trigger_type,
        config: row.get(4)?,
        enabled: row.get(5)?,
        last_triggered_at: row.get(6)?,
        next_trigger_at: row.get(7)?,
        use_case_id: row.get(8)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::personas;
    use crate::test_support::{migrated_pool, sample_persona, sample_trigger};
    use chrono::Duration;

    #[test]
    fn overdue_triggers_are_due() {
        let pool = migrated_pool();
        let conn = pool.get().unwrap();
        personas::insert(&conn, &sample_persona("p1")).unwrap();
        let now = Utc::now();

        let mut overdue = sample_trigger("t1", "p1");
        overdue.next_trigger_at = Some(now - Duration::seconds(5));
        insert(&conn, &overdue).unwrap();

        let mut future = sample_trigger("t2", "p1");
        future.next_trigger_at = Some(now + Duration::hours(1));
        insert(&conn, &future).unwrap();

        let due_now = due(&conn, now).unwrap();
        assert_eq!(due_now.len(), 1);
        assert_eq!(due_now[0].id.as_str(), "t1");
    }

    #[test]
    fn disabled_triggers_never_fire() {
        let pool = migrated_pool();
        let conn = pool.get().unwrap();
        personas::insert(&conn, &sample_persona("p1")).unwrap();
        let now = Utc::now();

        let mut trigger = sample_trigger("t1", "p1");
        trigger.enabled = false;
        trigger.next_trigger_at = Some(now - Duration::seconds(5));
        insert(&conn, &trigger).unwrap();

        assert!(due(&conn, now).unwrap().is_empty());
    }

    #[test]
    fn unscheduled_triggers_are_not_due() {
        let pool = migrated_pool();
        let conn = pool.get().unwrap();
        personas::insert(&conn, &sample_persona("p1")).unwrap();

        let mut trigger = sample_trigger("t1", "p1");
        trigger.next_trigger_at = None;
        insert(&conn, &trigger).unwrap();

        assert!(due(&conn, Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn update_timings_reschedules() {
        let pool = migrated_pool();
        let conn = pool.get().unwrap();
        personas::insert(&conn, &sample_persona("p1")).unwrap();
        let now = Utc::now();

        let mut trigger = sample_trigger("t1", "p1");
        trigger.next_trigger_at = Some(now - Duration::seconds(1));
        insert(&conn, &trigger).unwrap();

        let next = now + Duration::seconds(10);
        update_timings(&conn, &trigger.id, now, next).unwrap();

        let loaded = get(&conn, &trigger.id).unwrap().unwrap();
        assert!(loaded.last_triggered_at.is_some());
        // Rescheduled into the future, so no longer due.
        assert!(due(&conn, now).unwrap().is_empty());
    }

    #[test]
    fn trigger_type_roundtrips_through_storage() {
        let pool = migrated_pool();
        let conn = pool.get().unwrap();
        personas::insert(&conn, &sample_persona("p1")).unwrap();

        let mut trigger = sample_trigger("t1", "p1");
        trigger.trigger_type = TriggerType::Polling;
        insert(&conn, &trigger).unwrap();

        let loaded = get(&conn, &trigger.id).unwrap().unwrap();
        assert_eq!(loaded.trigger_type, TriggerType::Polling);
    }
}
