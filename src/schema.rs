// 📐 Schema - tables of the census and tax extension plus the ERP tables it reads
//
// Applied on every open. All statements are idempotent, so running the
// migration against an up-to-date database changes nothing.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use crate::entities::class_code::DEFAULT_CLASS_CODES;
use crate::entities::region::DEFAULT_REGIONS;
use crate::entities::JurisdictionType;

const TABLES: &str = "
    -- ERP tables owned by other modules
    CREATE TABLE IF NOT EXISTS country (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        code TEXT UNIQUE NOT NULL,
        name TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS country_subdivision (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        country_id INTEGER NOT NULL REFERENCES country(id) ON DELETE CASCADE,
        code TEXT UNIQUE NOT NULL,
        name TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS company (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS account_account (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        company_id INTEGER NOT NULL REFERENCES company(id),
        name TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS account_tax_group (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        code TEXT UNIQUE NOT NULL,
        name TEXT NOT NULL
    );

    -- Census
    CREATE TABLE IF NOT EXISTS census_region (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        code TEXT UNIQUE CHECK (length(code) <= 2),
        name TEXT NOT NULL,
        parent_id INTEGER REFERENCES census_region(id)
    );

    CREATE TABLE IF NOT EXISTS census_class_code (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        code TEXT UNIQUE NOT NULL CHECK (length(code) = 2),
        description TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1
    );

    CREATE TABLE IF NOT EXISTS census_place (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        country_id INTEGER NOT NULL REFERENCES country(id) ON DELETE CASCADE,
        subdivision_id INTEGER NOT NULL REFERENCES country_subdivision(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        code_gnis INTEGER,
        code_fips TEXT NOT NULL,
        class_code_id INTEGER REFERENCES census_class_code(id),
        region_id INTEGER REFERENCES census_region(id),
        parent_id INTEGER REFERENCES census_place(id),
        active INTEGER NOT NULL DEFAULT 1,
        UNIQUE (subdivision_id, code_fips)
    );

    -- Sales tax
    CREATE TABLE IF NOT EXISTS account_jurisdiction (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        code TEXT UNIQUE NOT NULL,
        authority_id INTEGER NOT NULL REFERENCES census_place(id),
        place_id INTEGER REFERENCES census_place(id),
        type TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1
    );

    CREATE TABLE IF NOT EXISTS account_tax (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        description TEXT NOT NULL,
        type TEXT NOT NULL,
        rate TEXT,
        start_date TEXT,
        end_date TEXT,
        group_id INTEGER REFERENCES account_tax_group(id),
        parent_id INTEGER REFERENCES account_tax(id),
        invoice_account_id INTEGER REFERENCES account_account(id),
        credit_note_account_id INTEGER REFERENCES account_account(id),
        authority_id INTEGER REFERENCES census_place(id),
        jurisdiction_id INTEGER REFERENCES account_jurisdiction(id),
        active INTEGER NOT NULL DEFAULT 1
    );

    -- Audit trail
    CREATE TABLE IF NOT EXISTS import_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id TEXT UNIQUE NOT NULL,
        timestamp TEXT NOT NULL,
        event_type TEXT NOT NULL,
        entity_type TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        data TEXT NOT NULL,
        actor TEXT NOT NULL,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    );

    -- Indexes
    CREATE INDEX IF NOT EXISTS idx_place_parent ON census_place(parent_id);
    CREATE INDEX IF NOT EXISTS idx_place_country ON census_place(country_id);
    CREATE INDEX IF NOT EXISTS idx_tax_name_start ON account_tax(name, start_date);
    CREATE INDEX IF NOT EXISTS idx_tax_authority ON account_tax(authority_id);
    CREATE INDEX IF NOT EXISTS idx_events_entity ON import_events(entity_type, entity_id);
";

/// Create every table and seed the reference data this module owns
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(TABLES).context("Failed to create schema")?;

    seed_regions(conn)?;
    seed_class_codes(conn)?;
    seed_tax_groups(conn)?;

    Ok(())
}

fn seed_regions(conn: &Connection) -> Result<()> {
    // Parents come first in DEFAULT_REGIONS so the subquery always resolves
    for (code, name, parent) in DEFAULT_REGIONS {
        conn.execute(
            "INSERT OR IGNORE INTO census_region (code, name, parent_id)
             VALUES (?1, ?2, (SELECT id FROM census_region WHERE code = ?3))",
            params![code, name, parent],
        )?;
    }
    Ok(())
}

fn seed_class_codes(conn: &Connection) -> Result<()> {
    for (code, description) in DEFAULT_CLASS_CODES {
        conn.execute(
            "INSERT OR IGNORE INTO census_class_code (code, description) VALUES (?1, ?2)",
            params![code, description],
        )?;
    }
    Ok(())
}

fn seed_tax_groups(conn: &Connection) -> Result<()> {
    for jurisdiction_type in JurisdictionType::ALL {
        conn.execute(
            "INSERT OR IGNORE INTO account_tax_group (code, name) VALUES (?1, ?2)",
            params![jurisdiction_type.code(), jurisdiction_type.name()],
        )?;
    }
    Ok(())
}
