// 📍 Place Entity - states, counties and incorporated places
//
// Identity: (subdivision, FIPS code)
// The level (state/county/place) is never stored: it is read off the length
// of the FIPS code every time it is needed.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::db::{ensure_acyclic, SaveSummary};

// ============================================================================
// PLACE LEVEL
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaceLevel {
    State,
    County,
    Place,
    Unknown,
}

impl PlaceLevel {
    pub fn from_fips(code_fips: &str) -> Self {
        match code_fips.len() {
            2 => PlaceLevel::State,
            3 => PlaceLevel::County,
            5 => PlaceLevel::Place,
            _ => PlaceLevel::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlaceLevel::State => "state",
            PlaceLevel::County => "county",
            PlaceLevel::Place => "place",
            PlaceLevel::Unknown => "unknown",
        }
    }
}

// ============================================================================
// PLACE ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    /// None until the first save
    pub id: Option<i64>,

    pub country_id: i64,
    pub subdivision_id: i64,

    /// Subdivision code (`US-UT`), half of the natural key
    pub subdivision_code: String,

    pub name: String,

    /// GNIS feature id
    pub code_gnis: Option<i64>,

    pub code_fips: String,
    pub class_code_id: Option<i64>,
    pub region_id: Option<i64>,
    pub parent_id: Option<i64>,
    pub active: bool,
}

impl Place {
    pub fn new(
        country_id: i64,
        subdivision_id: i64,
        subdivision_code: &str,
        code_fips: &str,
    ) -> Self {
        Place {
            id: None,
            country_id,
            subdivision_id,
            subdivision_code: subdivision_code.to_string(),
            name: String::new(),
            code_gnis: None,
            code_fips: code_fips.to_string(),
            class_code_id: None,
            region_id: None,
            parent_id: None,
            active: true,
        }
    }

    pub fn level(&self) -> PlaceLevel {
        PlaceLevel::from_fips(&self.code_fips)
    }

    /// Natural key
    pub fn key(&self) -> (String, String) {
        (self.subdivision_code.clone(), self.code_fips.clone())
    }

    /// Display name: `Salt Lake City (67000)`
    pub fn rec_name(&self) -> String {
        if self.code_fips.is_empty() {
            self.name.clone()
        } else {
            format!("{} ({})", self.name, self.code_fips)
        }
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Place {
            id: row.get(0)?,
            country_id: row.get(1)?,
            subdivision_id: row.get(2)?,
            subdivision_code: row.get(3)?,
            name: row.get(4)?,
            code_gnis: row.get(5)?,
            code_fips: row.get(6)?,
            class_code_id: row.get(7)?,
            region_id: row.get(8)?,
            parent_id: row.get(9)?,
            active: row.get(10)?,
        })
    }
}

const SELECT_PLACES: &str = "SELECT p.id, p.country_id, p.subdivision_id, s.code, p.name,
        p.code_gnis, p.code_fips, p.class_code_id, p.region_id, p.parent_id, p.active
     FROM census_place p
     JOIN country_subdivision s ON s.id = p.subdivision_id";

fn query_places(conn: &Connection, filter: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Place>> {
    let sql = format!(
        "{} {} ORDER BY s.code, p.code_fips",
        SELECT_PLACES, filter
    );
    let mut stmt = conn.prepare(&sql)?;

    let places = stmt
        .query_map(args, Place::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(places)
}

// ============================================================================
// LOOKUPS
// ============================================================================

/// State-level places of a country keyed by FIPS code
pub fn states_by_fips(conn: &Connection, country_id: i64) -> Result<HashMap<String, Place>> {
    let places = query_places(
        conn,
        "WHERE p.country_id = ?1 AND length(p.code_fips) = 2",
        &[&country_id],
    )?;

    Ok(places
        .into_iter()
        .map(|p| (p.code_fips.clone(), p))
        .collect())
}

/// Places of one subdivision keyed by (subdivision code, FIPS code)
pub fn places_by_key(
    conn: &Connection,
    subdivision_code: &str,
) -> Result<HashMap<(String, String), Place>> {
    let places = query_places(conn, "WHERE s.code = ?1", &[&subdivision_code])?;

    Ok(places.into_iter().map(|p| (p.key(), p)).collect())
}

/// Places of one subdivision keyed by FIPS code alone (state, counties and places)
pub fn places_by_fips(conn: &Connection, subdivision_code: &str) -> Result<HashMap<String, Place>> {
    let places = query_places(conn, "WHERE s.code = ?1", &[&subdivision_code])?;

    Ok(places
        .into_iter()
        .map(|p| (p.code_fips.clone(), p))
        .collect())
}

pub fn children_of(conn: &Connection, parent_id: i64) -> Result<Vec<Place>> {
    query_places(conn, "WHERE p.parent_id = ?1", &[&parent_id])
}

/// Record-name search on FIPS code or name
pub fn search_places(conn: &Connection, pattern: &str) -> Result<Vec<Place>> {
    let code_pattern = pattern.trim_start_matches('%');
    query_places(
        conn,
        "WHERE p.code_fips LIKE ?1 OR p.name LIKE ?2",
        &[&code_pattern, &pattern],
    )
}

// ============================================================================
// BATCH SAVE
// ============================================================================

/// Insert new places and update existing ones in one transaction.
///
/// Newly created records get their `id` filled in.
pub fn save_places(conn: &Connection, records: &mut [Place]) -> Result<SaveSummary> {
    let tx = conn.unchecked_transaction()?;
    let mut summary = SaveSummary::default();
    let mut linked = Vec::new();

    {
        let mut insert = tx.prepare(
            "INSERT INTO census_place (
                country_id, subdivision_id, name, code_gnis, code_fips,
                class_code_id, region_id, parent_id, active
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        let mut update = tx.prepare(
            "UPDATE census_place SET
                country_id = ?1, subdivision_id = ?2, name = ?3, code_gnis = ?4,
                code_fips = ?5, class_code_id = ?6, region_id = ?7, parent_id = ?8,
                active = ?9
             WHERE id = ?10",
        )?;

        for record in records.iter_mut() {
            match record.id {
                Some(id) => {
                    update
                        .execute(params![
                            record.country_id,
                            record.subdivision_id,
                            record.name,
                            record.code_gnis,
                            record.code_fips,
                            record.class_code_id,
                            record.region_id,
                            record.parent_id,
                            record.active,
                            id,
                        ])
                        .with_context(|| format!("Failed to update place {}", record.rec_name()))?;
                    summary.updated += 1;
                }
                None => {
                    insert
                        .execute(params![
                            record.country_id,
                            record.subdivision_id,
                            record.name,
                            record.code_gnis,
                            record.code_fips,
                            record.class_code_id,
                            record.region_id,
                            record.parent_id,
                            record.active,
                        ])
                        .with_context(|| format!("Failed to insert place {}", record.rec_name()))?;
                    record.id = Some(tx.last_insert_rowid());
                    summary.created += 1;
                }
            }

            if record.parent_id.is_some() {
                linked.extend(record.id);
            }
        }
    }

    ensure_acyclic(&tx, "census_place", &linked)?;
    tx.commit()?;

    Ok(summary)
}
