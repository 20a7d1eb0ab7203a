// ERP lookup records - owned by other modules, only read by the importers
//
// Countries, subdivisions, companies, accounts and tax groups must already
// exist; a missing one aborts the import. The insert helpers exist for
// provisioning a fresh database.

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ImportError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Country {
    pub id: i64,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subdivision {
    pub id: i64,
    pub country_id: i64,
    /// ISO 3166-2 code, e.g. `US-UT`
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub company_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxGroup {
    pub id: i64,
    pub code: String,
    pub name: String,
}

/// `ut` → `US-UT`; codes already carrying a country prefix are only upper-cased
pub fn subdivision_code(country: &str, code: &str) -> String {
    let code = code.trim().to_ascii_uppercase();
    if code.contains('-') {
        code
    } else {
        format!("{}-{}", country.to_ascii_uppercase(), code)
    }
}

// ============================================================================
// LOOKUPS
// ============================================================================

/// Country by ISO code; missing is fatal
pub fn get_country(conn: &Connection, code: &str) -> Result<Country> {
    conn.query_row(
        "SELECT id, code, name FROM country WHERE code = ?1",
        [code],
        |row| {
            Ok(Country {
                id: row.get(0)?,
                code: row.get(1)?,
                name: row.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| ImportError::missing_record("country", format!("code {}", code)).into())
}

pub fn find_subdivision(conn: &Connection, code: &str) -> Result<Option<Subdivision>> {
    let subdivision = conn
        .query_row(
            "SELECT id, country_id, code, name FROM country_subdivision WHERE code = ?1",
            [code],
            |row| {
                Ok(Subdivision {
                    id: row.get(0)?,
                    country_id: row.get(1)?,
                    code: row.get(2)?,
                    name: row.get(3)?,
                })
            },
        )
        .optional()?;

    Ok(subdivision)
}

/// The company owning the imported taxes; exactly one must exist
pub fn get_company(conn: &Connection) -> Result<Company> {
    let mut stmt = conn.prepare("SELECT id, name FROM company ORDER BY id")?;
    let mut companies = stmt
        .query_map([], |row| {
            Ok(Company {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    match companies.len() {
        1 => Ok(companies.remove(0)),
        0 => Err(ImportError::missing_record("company", "any name").into()),
        n => Err(anyhow::anyhow!("Expected a single company, found {}", n)),
    }
}

/// Account of `company_id` with exactly this name; missing is fatal
pub fn get_account(conn: &Connection, company_id: i64, name: &str) -> Result<Account> {
    conn.query_row(
        "SELECT id, company_id, name FROM account_account
         WHERE company_id = ?1 AND name = ?2
         ORDER BY id LIMIT 1",
        params![company_id, name],
        |row| {
            Ok(Account {
                id: row.get(0)?,
                company_id: row.get(1)?,
                name: row.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| ImportError::missing_record("account", format!("name {}", name)).into())
}

pub fn tax_groups_by_code(conn: &Connection) -> Result<HashMap<String, TaxGroup>> {
    let mut stmt = conn.prepare("SELECT id, code, name FROM account_tax_group")?;

    let groups = stmt
        .query_map([], |row| {
            Ok(TaxGroup {
                id: row.get(0)?,
                code: row.get(1)?,
                name: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(groups.into_iter().map(|g| (g.code.clone(), g)).collect())
}

// ============================================================================
// PROVISIONING
// ============================================================================

pub fn insert_country(conn: &Connection, code: &str, name: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO country (code, name) VALUES (?1, ?2)",
        params![code, name],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_subdivision(conn: &Connection, country_id: i64, code: &str, name: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO country_subdivision (country_id, code, name) VALUES (?1, ?2, ?3)",
        params![country_id, code, name],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_company(conn: &Connection, name: &str) -> Result<i64> {
    conn.execute("INSERT INTO company (name) VALUES (?1)", [name])?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_account(conn: &Connection, company_id: i64, name: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO account_account (company_id, name) VALUES (?1, ?2)",
        params![company_id, name],
    )?;
    Ok(conn.last_insert_rowid())
}
