// 🗄️ Database - connection setup, audit trail and shared helpers
//
// Every importer stage ends with one batch save inside a single SQLite
// transaction, followed by one audit event describing what was imported.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;

use crate::error::ImportError;
use crate::schema;

/// Open (or create) the database at `path` and bring its schema up to date
pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery; in-memory databases answer "memory"
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    tracing::debug!(journal_mode = %mode, "database opened");

    conn.pragma_update(None, "foreign_keys", "ON")?;

    schema::migrate(conn)?;

    Ok(())
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

/// One completed import stage ("Every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImportEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl ImportEvent {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn insert_event(conn: &Connection, event: &ImportEvent) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO import_events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Record a finished import stage: what was saved and from which bytes
pub fn record_stage(
    conn: &Connection,
    actor: &str,
    event_type: &str,
    entity: (&str, &str),
    summary: SaveSummary,
    source_url: &str,
    source_digest: &str,
) -> Result<ImportEvent> {
    let (entity_type, entity_id) = entity;
    let event = ImportEvent::new(
        event_type,
        entity_type,
        entity_id,
        serde_json::json!({
            "created": summary.created,
            "updated": summary.updated,
            "source": source_url,
            "sha256": source_digest,
        }),
        actor,
    );

    insert_event(conn, &event)
        .with_context(|| format!("Failed to record {} for {}", event_type, entity_id))?;

    tracing::info!(
        event = event_type,
        entity = entity_id,
        created = summary.created,
        updated = summary.updated,
        "stage saved"
    );

    Ok(event)
}

/// Events recorded for one entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<ImportEvent>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM import_events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let rows = stmt
        .query_map(params![entity_type, entity_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(
            |(event_id, timestamp, event_type, entity_type, entity_id, data, actor)| {
                Ok(ImportEvent {
                    event_id,
                    timestamp: DateTime::parse_from_rfc3339(&timestamp)
                        .context("Invalid event timestamp")?
                        .with_timezone(&Utc),
                    event_type,
                    entity_type,
                    entity_id,
                    data: serde_json::from_str(&data).context("Invalid event payload")?,
                    actor,
                })
            },
        )
        .collect()
}

/// SHA-256 of a downloaded source file, recorded with each import event
pub fn source_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// HELPERS
// ============================================================================

/// Outcome of one batch save
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveSummary {
    pub created: usize,
    pub updated: usize,
}

impl SaveSummary {
    pub fn total(&self) -> usize {
        self.created + self.updated
    }
}

pub fn count_rows(conn: &Connection, table: &str) -> Result<i64> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
        row.get(0)
    })?;

    Ok(count)
}

/// Refuse parent links that would turn a tree table into a cycle.
///
/// Walks up from every id in `start_ids`; meant to run inside the
/// transaction that wrote the links so a failure rolls everything back.
pub fn ensure_acyclic(conn: &Connection, table: &str, start_ids: &[i64]) -> Result<()> {
    let mut stmt = conn.prepare(&format!("SELECT parent_id FROM {} WHERE id = ?1", table))?;

    for &start in start_ids {
        let mut seen = HashSet::new();
        let mut current = Some(start);

        while let Some(id) = current {
            if !seen.insert(id) {
                return Err(ImportError::Hierarchy(format!(
                    "parent chain of {} record {} loops",
                    table, start
                ))
                .into());
            }
            current = stmt
                .query_row([id], |row| row.get::<_, Option<i64>>(0))
                .optional()?
                .flatten();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let regions = count_rows(&conn, "census_region").unwrap();

        // Second run must not duplicate seeded reference data
        setup_database(&conn).unwrap();
        assert_eq!(count_rows(&conn, "census_region").unwrap(), regions);
        assert_eq!(regions, 13);
    }

    #[test]
    fn test_event_log() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let event = ImportEvent::new(
            "places_imported",
            "subdivision",
            "US-UT",
            serde_json::json!({"created": 3, "sha256": source_digest(b"abc")}),
            "import-places",
        );

        insert_event(&conn, &event).unwrap();

        let events = get_events_for_entity(&conn, "subdivision", "US-UT").unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "places_imported");
        assert_eq!(events[0].actor, "import-places");
        assert_eq!(events[0].data["created"], 3);

        println!("✅ Event log test PASSED");
    }

    #[test]
    fn test_record_stage_carries_summary_and_source() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let summary = SaveSummary { created: 2, updated: 5 };
        record_stage(
            &conn,
            "import-rates",
            "taxes_imported",
            ("subdivision", "US-UT"),
            summary,
            "https://rates.example/UT.zip",
            &source_digest(b"rows"),
        )
        .unwrap();

        let events = get_events_for_entity(&conn, "subdivision", "US-UT").unwrap();
        assert_eq!(events[0].data["created"], 2);
        assert_eq!(events[0].data["updated"], 5);
        assert_eq!(events[0].data["source"], "https://rates.example/UT.zip");
        assert_eq!(events[0].data["sha256"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn test_source_digest() {
        let digest = source_digest(b"STATE|STATEFP\n");

        assert_eq!(digest.len(), 64, "SHA-256 hash should be 64 hex characters");
        assert_eq!(digest, source_digest(b"STATE|STATEFP\n"));
        assert_ne!(digest, source_digest(b"STATE|STATEFP"));
    }

    #[test]
    fn test_ensure_acyclic_detects_cycle() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        // D1 -> R1 is a valid chain
        let d1: i64 = conn
            .query_row("SELECT id FROM census_region WHERE code = 'D1'", [], |r| r.get(0))
            .unwrap();
        let r1: i64 = conn
            .query_row("SELECT id FROM census_region WHERE code = 'R1'", [], |r| r.get(0))
            .unwrap();
        ensure_acyclic(&conn, "census_region", &[d1]).unwrap();

        conn.execute("UPDATE census_region SET parent_id = ?1 WHERE id = ?2", [d1, r1])
            .unwrap();
        let err = ensure_acyclic(&conn, "census_region", &[d1]).unwrap_err();
        assert!(err.to_string().contains("loops"));
    }
}
