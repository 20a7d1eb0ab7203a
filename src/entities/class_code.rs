// 🏷️ Class Code - Census FIPS class codes (C1, H1, U1, ...)

use anyhow::Result;
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// (code, description) seeded by the schema migration
pub const DEFAULT_CLASS_CODES: &[(&str, &str)] = &[
    ("C1", "Active incorporated place that does not serve as a county subdivision equivalent"),
    ("C2", "Active incorporated place legally coextensive with a county subdivision but treated as independent of any county subdivision"),
    ("C3", "Consolidated city"),
    ("C4", "Alternate authority within a consolidated city"),
    ("C5", "Active incorporated place that is independent of any county subdivision and serves as a county subdivision equivalent"),
    ("C6", "Active incorporated place that is partially independent of any county subdivision"),
    ("C7", "Incorporated place that is independent of any county"),
    ("C8", "Balance of a consolidated city excluding the separately incorporated places within it"),
    ("C9", "Inactive or nonfunctioning incorporated place"),
    ("H1", "Active county or equivalent feature"),
    ("H4", "Legally defined inactive or nonfunctioning county or equivalent feature"),
    ("H5", "Census areas in Alaska, a statistical county equivalent entity"),
    ("H6", "County or equivalent feature coextensive with an incorporated place or consolidated city"),
    ("M2", "Military or other defense installation entirely within a place"),
    ("U1", "Census designated place with an official federally recognized name"),
    ("U2", "Census designated place without an official federally recognized name"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassCode {
    pub id: i64,
    pub code: String,
    pub description: String,
    pub active: bool,
}

impl ClassCode {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ClassCode {
            id: row.get(0)?,
            code: row.get(1)?,
            description: row.get(2)?,
            active: row.get(3)?,
        })
    }

    /// Display name: `[C1] Active incorporated place...`
    pub fn rec_name(&self) -> String {
        format!("[{}] {}", self.code, self.description)
    }
}

/// Every class code keyed by code, deactivated ones included
pub fn class_codes_by_code(conn: &Connection) -> Result<HashMap<String, ClassCode>> {
    let mut stmt = conn.prepare(
        "SELECT id, code, description, active FROM census_class_code ORDER BY code",
    )?;

    let codes = stmt
        .query_map([], ClassCode::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(codes.into_iter().map(|c| (c.code.clone(), c)).collect())
}
