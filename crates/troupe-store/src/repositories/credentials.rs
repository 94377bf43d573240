//! Encrypted persona credentials.
//!
//! Only ciphertext ever crosses this boundary; decryption happens in the
//! dispatcher's credential materializer, in memory, at assignment time.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use troupe_core::{Credential, CredentialId, PersonaId};

use crate::errors::Result;

pub fn insert(conn: &Connection, credential: &Credential) -> Result<()> {
    let _ = conn.execute(
        "INSERT INTO persona_credentials
             (id, persona_id, name, service_type, ciphertext, iv, auth_tag,
              last_used_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            credential.id.as_str(),
            credential.persona_id.as_str(),
            credential.name,
            credential.service_type,
            credential.ciphertext,
            credential.iv,
            credential.auth_tag,
            credential.last_used_at,
            credential.created_at,
        ],
    )?;
    Ok(())
}

pub fn for_persona(conn: &Connection, persona_id: &PersonaId) -> Result<Vec<Credential>> {
    let mut stmt = conn.prepare(
        "SELECT id, persona_id, name, service_type, ciphertext, iv, auth_tag,
                last_used_at, created_at
         FROM persona_credentials WHERE persona_id = ?1 ORDER BY name",
    )?;
    let rows = stmt.query_map([persona_id.as_str()], map_row)?;
    let mut credentials = Vec::new();
    for credential in rows {
        credentials.push(credential?);
    }
    Ok(credentials)
}

/// Stamp a credential as used. Best effort; callers ignore the error.
pub fn touch_last_used(
    conn: &Connection,
    id: &CredentialId,
    at: DateTime<Utc>,
) -> Result<()> {
    let _ = conn.execute(
        "UPDATE persona_credentials SET last_used_at = ?2 WHERE id = ?1",
        params![id.as_str(), at],
    )?;
    Ok(())
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<Credential> {
    Ok(Credential {
        id: CredentialId::from(row.get::<_, String>(0)?),
        persona_id: PersonaId::from(row.get::<_, String>(1)?),
        name: row.get(2)?,
        service_type: row.get(3)?,
        ciphertext: row.get(4)?,
        iv: row.get(5)?,
        auth_tag: row.get(6)?,
        last_used_at: row.get(7)?,
        created_at: row.get(8)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
