//! Execution records. Created at submit, mutated on state transitions,
//! authoritative once the in-memory record has been reaped.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use troupe_core::{ExecutionId, ExecutionRecord, ExecutionStatus, PersonaId};

use crate::errors::Result;
use crate::row::bad_column;

pub fn insert(conn: &Connection, record: &ExecutionRecord) -> Result<()> {
    let _ = conn.execute(
        "INSERT INTO persona_executions
             (id, project_id, persona_id, status, input_data, output_data, session_id,
              cost_usd, error_message, duration_ms, started_at, completed_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            record.id.as_str(),
            record.project_id,
            record.persona_id.as_str(),
            record.status.as_str(),
            record.input_data,
            record.output_data,
            record.session_id,
            record.cost_usd,
            record.error_message,
            record.duration_ms,
            record.started_at,
            record.completed_at,
            record.created_at,
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: &ExecutionId) -> Result<Option<ExecutionRecord>> {
    let record = conn
        .query_row(
            &format!("{SELECT_COLUMNS} WHERE id = ?1"),
            [id.as_str()],
            map_row,
        )
        .optional()?;
    Ok(record)
}

/// Bare status flip, used to return a failed assignment to `queued`.
pub fn set_status(conn: &Connection, id: &ExecutionId, status: ExecutionStatus) -> Result<()> {
    let _ = conn.execute(
        "UPDATE persona_executions SET status = ?2 WHERE id = ?1",
        params![id.as_str(), status.as_str()],
    )?;
    Ok(())
}

pub fn mark_running(
    conn: &Connection,
    id: &ExecutionId,
    started_at: DateTime<Utc>,
) -> Result<()> {
    let _ = conn.execute(
        "UPDATE persona_executions SET status = 'running', started_at = ?2 WHERE id = ?1",
        params![id.as_str(), started_at],
    )?;
    Ok(())
}

/// Final fields reported by the worker (or synthesized on disconnect).
pub struct Finalize<'a> {
    pub status: ExecutionStatus,
    pub duration_ms: i64,
    pub session_id: Option<&'a str>,
    pub cost_usd: Option<f64>,
    pub error_message: Option<&'a str>,
    pub completed_at: DateTime<Utc>,
}

pub fn finalize(conn: &Connection, id: &ExecutionId, fin: &Finalize<'_>) -> Result<()> {
    let _ = conn.execute(
        "UPDATE persona_executions
         SET status = ?2, duration_ms = ?3, session_id = ?4, cost_usd = ?5,
             error_message = ?6, completed_at = ?7
         WHERE id = ?1",
        params![
            id.as_str(),
            fin.status.as_str(),
            fin.duration_ms,
            fin.session_id,
            fin.cost_usd,
            fin.error_message,
            fin.completed_at,
        ],
    )?;
    Ok(())
}

/// Append a chunk to the accumulated output. Append-only, best effort.
pub fn append_output(conn: &Connection, id: &ExecutionId, chunk: &str) -> Result<()> {
    let _ = conn.execute(
        "UPDATE persona_executions
         SET output_data = COALESCE(output_data, '') || ?2
         WHERE id = ?1",
        params![id.as_str(), chunk],
    )?;
    Ok(())
}

/// How many executions of this persona are currently `running`.
pub fn count_running(conn: &Connection, persona_id: &PersonaId) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM persona_executions WHERE persona_id = ?1 AND status = 'running'",
        [persona_id.as_str()],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Fail every execution still `queued` or `running` from a previous process.
///
/// Returns how many rows were recovered.
pub fn fail_stale(conn: &Connection, message: &str, now: DateTime<Utc>) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE persona_executions
         SET status = 'failed', error_message = ?1, completed_at = ?2
         WHERE status IN ('queued', 'running')",
        params![message, now],
    )?;
    Ok(changed)
}

const SELECT_COLUMNS: &str = "SELECT id, project_id, persona_id, status, input_data, output_data,
        session_id, cost_usd, error_message, duration_ms, started_at,
        completed_at, created_at
 FROM persona_executions";

fn map_row(row: &Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    let status_raw: String = row.get(3)?;
    let status = ExecutionStatus::parse(&status_raw)
        .ok_or_else(|| bad_column(3, format!("unknown execution status '{status_raw}'")))?;
    Ok(ExecutionRecord {
        id: ExecutionId::from(row.get::<_, String>(0)?),
        project_id: row.get(1)?,
        persona_id: PersonaId::from(row.get::<_, String>(2)?),
        status,
        input_data: row.get(4)?,
        output_data: row.get(5)?,
        session_id: row.get(6)?,
        cost_usd: row.get(7)?,
        error_message: row.get(8)?,
        duration_ms: row.get(9)?,
        started_at: row.get(10)?,
        completed_at: row.get(11)?,
        created_at: row.get(12)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{migrated_pool, sample_execution};

    #[test]
    fn lifecycle_queued_running_completed() {
        let pool = migrated_pool();
        let conn = pool.get().unwrap();
        let record = sample_execution("e1", "p1");
        insert(&conn, &record).unwrap();

        mark_running(&conn, &record.id, Utc::now()).unwrap();
        let running = get(&conn, &record.id).unwrap().unwrap();
        assert_eq!(running.status, ExecutionStatus::Running);
        assert!(running.started_at.is_some());

        finalize(
            &conn,
            &record.id,
            &Finalize {
                status: ExecutionStatus::Completed,
                duration_ms: 123,
                session_id: Some("sess-1"),
                cost_usd: Some(0.01),
                error_message: None,
                completed_at: Utc::now(),
            },
        )
        .unwrap();

        let done = get(&conn, &record.id).unwrap().unwrap();
        assert_eq!(done.status, ExecutionStatus::Completed);
        assert_eq!(done.duration_ms, Some(123));
        assert_eq!(done.session_id.as_deref(), Some("sess-1"));
    }

    #[test]
    fn append_output_accumulates() {
        let pool = migrated_pool();
        let conn = pool.get().unwrap();
        let record = sample_execution("e1", "p1");
        insert(&conn, &record).unwrap();

        append_output(&conn, &record.id, "hello\n").unwrap();
        append_output(&conn, &record.id, "[STDERR] oops\n").unwrap();

        let loaded = get(&conn, &record.id).unwrap().unwrap();
        assert_eq!(loaded.output_data.as_deref(), Some("hello\n[STDERR] oops\n"));
    }

    #[test]
    fn count_running_scoped_to_persona() {
        let pool = migrated_pool();
        let conn = pool.get().unwrap();

        let a = sample_execution("e1", "p1");
        insert(&conn, &a).unwrap();
        mark_running(&conn, &a.id, Utc::now()).unwrap();

        let b = sample_execution("e2", "p2");
        insert(&conn, &b).unwrap();
        mark_running(&conn, &b.id, Utc::now()).unwrap();

        let c = sample_execution("e3", "p1");
        insert(&conn, &c).unwrap();

        assert_eq!(count_running(&conn, &PersonaId::from("p1")).unwrap(), 1);
        assert_eq!(count_running(&conn, &PersonaId::from("p2")).unwrap(), 1);
        assert_eq!(count_running(&conn, &PersonaId::from("p3")).unwrap(), 0);
    }

    #[test]
    fn set_status_reverts_to_queued() {
        let pool = migrated_pool();
        let conn = pool.get().unwrap();
        let record = sample_execution("e1", "p1");
        insert(&conn, &record).unwrap();
        mark_running(&conn, &record.id, Utc::now()).unwrap();

        set_status(&conn, &record.id, ExecutionStatus::Queued).unwrap();
        let loaded = get(&conn, &record.id).unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Queued);
    }

    #[test]
    fn fail_stale_recovers_orphans() {
        let pool = migrated_pool();
        let conn = pool.get().unwrap();

        let queued = sample_execution("e1", "p1");
        insert(&conn, &queued).unwrap();

        let running = sample_execution("e2", "p1");
        insert(&conn, &running).unwrap();
        mark_running(&conn, &running.id, Utc::now()).unwrap();

        let mut done = sample_execution("e3", "p1");
        done.status = ExecutionStatus::Completed;
        insert(&conn, &done).unwrap();

        let recovered =
            fail_stale(&conn, "Orchestrator restarted while execution was in flight", Utc::now())
                .unwrap();
        assert_eq!(recovered, 2);

        for id in ["e1", "e2"] {
            let loaded = get(&conn, &ExecutionId::from(id)).unwrap().unwrap();
            assert_eq!(loaded.status, ExecutionStatus::Failed);
        }
        let untouched = get(&conn, &ExecutionId::from("e3")).unwrap().unwrap();
        assert_eq!(untouched.status, ExecutionStatus::Completed);
    }
}
