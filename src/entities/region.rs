// 🗺️ Census Region - the four regions and nine divisions
//
// Regions are a two-level tree: R1..R4 at the top, D1..D9 below them.
// Every state place is attached to exactly one division through DIVISIONS.

use anyhow::Result;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// STATIC TABLES
// ============================================================================

/// (code, name, parent code) seeded by the schema migration
pub const DEFAULT_REGIONS: &[(&str, &str, Option<&str>)] = &[
    ("R1", "Northeast", None),
    ("R2", "Midwest", None),
    ("R3", "South", None),
    ("R4", "West", None),
    ("D1", "New England", Some("R1")),
    ("D2", "Middle Atlantic", Some("R1")),
    ("D3", "East North Central", Some("R2")),
    ("D4", "West North Central", Some("R2")),
    ("D5", "South Atlantic", Some("R3")),
    ("D6", "East South Central", Some("R3")),
    ("D7", "West South Central", Some("R3")),
    ("D8", "Mountain", Some("R4")),
    ("D9", "Pacific", Some("R4")),
];

/// Census division → state FIPS codes
pub const DIVISIONS: &[(&str, &[&str])] = &[
    ("D1", &["09", "23", "25", "33", "44", "50"]),
    ("D2", &["34", "36", "42"]),
    ("D3", &["17", "18", "26", "39", "55"]),
    ("D4", &["19", "20", "27", "29", "31", "38", "46"]),
    ("D5", &["10", "11", "12", "13", "24", "37", "45", "51", "54"]),
    ("D6", &["01", "21", "28", "47"]),
    ("D7", &["05", "22", "40", "48"]),
    ("D8", &["04", "08", "16", "30", "32", "35", "49", "56"]),
    ("D9", &["02", "06", "15", "41", "53"]),
];

/// Division code of a state FIPS code; territories have none
pub fn division_for_state(code_fips: &str) -> Option<&'static str> {
    DIVISIONS
        .iter()
        .find(|(_, states)| states.contains(&code_fips))
        .map(|(division, _)| *division)
}

// ============================================================================
// REGION ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: i64,
    pub code: Option<String>,
    pub name: String,
    pub parent_id: Option<i64>,
}

impl Region {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Region {
            id: row.get(0)?,
            code: row.get(1)?,
            name: row.get(2)?,
            parent_id: row.get(3)?,
        })
    }
}

/// All regions keyed by code, used to attach states to their division
pub fn regions_by_code(conn: &Connection) -> Result<HashMap<String, Region>> {
    let mut stmt =
        conn.prepare("SELECT id, code, name, parent_id FROM census_region ORDER BY code")?;

    let regions = stmt
        .query_map([], Region::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(regions
        .into_iter()
        .filter_map(|r| r.code.clone().map(|code| (code, r)))
        .collect())
}

/// Divisions of a region, ordered by code
pub fn divisions_of(conn: &Connection, region_id: i64) -> Result<Vec<Region>> {
    let mut stmt = conn.prepare(
        "SELECT id, code, name, parent_id FROM census_region
         WHERE parent_id = ?1 ORDER BY code",
    )?;

    let divisions = stmt
        .query_map([region_id], Region::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(divisions)
}

/// Record-name search: matches the name or the code.
///
/// A leading `%` on the pattern is ignored for codes, which are short and
/// always anchored at the start.
pub fn search_regions(conn: &Connection, pattern: &str) -> Result<Vec<Region>> {
    let code_pattern = pattern.trim_start_matches('%');

    let mut stmt = conn.prepare(
        "SELECT id, code, name, parent_id FROM census_region
         WHERE name LIKE ?1 OR code LIKE ?2
         ORDER BY code",
    )?;

    let regions = stmt
        .query_map(params![pattern, code_pattern], Region::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(regions)
}
