// 💰 Tax Entity - sales-tax records imported from the SSTP rate tables
//
// Identity: (name, start_date)
// A `none` tax carries no rate and no start date; it groups the dated
// percentage taxes of one jurisdiction, which point at it through `parent`.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use crate::db::{ensure_acyclic, SaveSummary};

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaxType {
    None,
    Percentage,
    Fixed,
}

impl TaxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaxType::None => "none",
            TaxType::Percentage => "percentage",
            TaxType::Fixed => "fixed",
        }
    }

    pub fn from_code(value: &str) -> Option<Self> {
        match value {
            "none" => Some(TaxType::None),
            "percentage" => Some(TaxType::Percentage),
            "fixed" => Some(TaxType::Fixed),
            _ => None,
        }
    }
}

/// Natural key of a tax
pub type TaxKey = (String, Option<NaiveDate>);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tax {
    pub id: Option<i64>,
    pub name: String,
    pub description: String,
    pub tax_type: TaxType,
    pub rate: Option<Decimal>,
    pub start_date: Option<NaiveDate>,

    /// None means open-ended
    pub end_date: Option<NaiveDate>,

    pub group_id: Option<i64>,
    pub parent_id: Option<i64>,
    pub invoice_account_id: Option<i64>,
    pub credit_note_account_id: Option<i64>,

    /// Top-level place administering the tax
    pub authority_id: Option<i64>,

    pub jurisdiction_id: Option<i64>,
    pub active: bool,
}

impl Tax {
    pub fn new(name: &str) -> Self {
        Tax {
            id: None,
            name: name.to_string(),
            description: String::new(),
            tax_type: TaxType::Percentage,
            rate: None,
            start_date: None,
            end_date: None,
            group_id: None,
            parent_id: None,
            invoice_account_id: None,
            credit_note_account_id: None,
            authority_id: None,
            jurisdiction_id: None,
            active: true,
        }
    }

    pub fn key(&self) -> TaxKey {
        (self.name.clone(), self.start_date)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let tax_type: String = row.get(3)?;
        let rate: Option<String> = row.get(4)?;
        let start_date: Option<String> = row.get(5)?;
        let end_date: Option<String> = row.get(6)?;

        Ok(Tax {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            tax_type: TaxType::from_code(&tax_type)
                .ok_or_else(|| conversion_error(3, format!("unknown tax type {}", tax_type)))?,
            rate: rate
                .map(|r| Decimal::from_str(&r).map_err(|e| conversion_error(4, e.to_string())))
                .transpose()?,
            start_date: start_date.map(|d| parse_date(5, &d)).transpose()?,
            end_date: end_date.map(|d| parse_date(6, &d)).transpose()?,
            group_id: row.get(7)?,
            parent_id: row.get(8)?,
            invoice_account_id: row.get(9)?,
            credit_note_account_id: row.get(10)?,
            authority_id: row.get(11)?,
            jurisdiction_id: row.get(12)?,
            active: row.get(13)?,
        })
    }
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, message.into())
}

fn parse_date(column: usize, value: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|e| conversion_error(column, e.to_string()))
}

fn format_date(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format(DATE_FORMAT).to_string())
}

const SELECT_TAXES: &str = "SELECT t.id, t.name, t.description, t.type, t.rate, t.start_date,
        t.end_date, t.group_id, t.parent_id, t.invoice_account_id, t.credit_note_account_id,
        t.authority_id, t.jurisdiction_id, t.active
     FROM account_tax t";

// ============================================================================
// LOOKUPS
// ============================================================================

/// Taxes administered from one subdivision, keyed by (name, start_date)
pub fn taxes_by_key(conn: &Connection, subdivision_code: &str) -> Result<HashMap<TaxKey, Tax>> {
    let sql = format!(
        "{} JOIN census_place a ON a.id = t.authority_id
            JOIN country_subdivision s ON s.id = a.subdivision_id
         WHERE s.code = ?1",
        SELECT_TAXES
    );
    let mut stmt = conn.prepare(&sql)?;

    let taxes = stmt
        .query_map([subdivision_code], Tax::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(taxes.into_iter().map(|t| (t.key(), t)).collect())
}

pub fn children_of(conn: &Connection, parent_id: i64) -> Result<Vec<Tax>> {
    let sql = format!("{} WHERE t.parent_id = ?1 ORDER BY t.name, t.start_date", SELECT_TAXES);
    let mut stmt = conn.prepare(&sql)?;

    let taxes = stmt
        .query_map([parent_id], Tax::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(taxes)
}

// ============================================================================
// BATCH SAVE
// ============================================================================

pub fn save_taxes(conn: &Connection, records: &mut [Tax]) -> Result<SaveSummary> {
    let tx = conn.unchecked_transaction()?;
    let mut summary = SaveSummary::default();
    let mut linked = Vec::new();

    {
        let mut insert = tx.prepare(
            "INSERT INTO account_tax (
                name, description, type, rate, start_date, end_date, group_id, parent_id,
                invoice_account_id, credit_note_account_id, authority_id, jurisdiction_id, active
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )?;
        let mut update = tx.prepare(
            "UPDATE account_tax SET
                name = ?1, description = ?2, type = ?3, rate = ?4, start_date = ?5,
                end_date = ?6, group_id = ?7, parent_id = ?8, invoice_account_id = ?9,
                credit_note_account_id = ?10, authority_id = ?11, jurisdiction_id = ?12,
                active = ?13
             WHERE id = ?14",
        )?;

        for record in records.iter_mut() {
            let rate = record.rate.map(|r| r.to_string());
            let start_date = format_date(record.start_date);
            let end_date = format_date(record.end_date);

            match record.id {
                Some(id) => {
                    update
                        .execute(params![
                            record.name,
                            record.description,
                            record.tax_type.as_str(),
                            rate,
                            start_date,
                            end_date,
                            record.group_id,
                            record.parent_id,
                            record.invoice_account_id,
                            record.credit_note_account_id,
                            record.authority_id,
                            record.jurisdiction_id,
                            record.active,
                            id,
                        ])
                        .with_context(|| format!("Failed to update tax {}", record.name))?;
                    summary.updated += 1;
                }
                None => {
                    insert
                        .execute(params![
                            record.name,
                            record.description,
                            record.tax_type.as_str(),
                            rate,
                            start_date,
                            end_date,
                            record.group_id,
                            record.parent_id,
                            record.invoice_account_id,
                            record.credit_note_account_id,
                            record.authority_id,
                            record.jurisdiction_id,
                            record.active,
                        ])
                        .with_context(|| format!("Failed to insert tax {}", record.name))?;
                    record.id = Some(tx.last_insert_rowid());
                    summary.created += 1;
                }
            }

            if record.parent_id.is_some() {
                linked.extend(record.id);
            }
        }
    }

    ensure_acyclic(&tx, "account_tax", &linked)?;
    tx.commit()?;

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{count_rows, setup_database};

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_tax_type_round_trip() {
        for t in [TaxType::None, TaxType::Percentage, TaxType::Fixed] {
            assert_eq!(TaxType::from_code(t.as_str()), Some(t));
        }
        assert_eq!(TaxType::from_code("bogus"), None);
    }

    #[test]
    fn test_save_and_reload_keeps_rate_and_dates() {
        let conn = test_db();

        let mut parent = Tax::new("035");
        parent.tax_type = TaxType::None;
        let mut records = vec![parent];
        save_taxes(&conn, &mut records).unwrap();
        let parent_id = records[0].id.unwrap();

        let mut child = Tax::new("035 general_rate_intrastate");
        child.rate = Some(Decimal::from_str("0.0235").unwrap());
        child.start_date = NaiveDate::from_ymd_opt(2024, 1, 1);
        child.parent_id = Some(parent_id);
        let mut records = vec![child];
        let summary = save_taxes(&conn, &mut records).unwrap();
        assert_eq!(summary.created, 1);

        let children = children_of(&conn, parent_id).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].rate, Some(Decimal::from_str("0.0235").unwrap()));
        assert_eq!(children[0].start_date, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(children[0].end_date, None);
        assert_eq!(children[0].tax_type, TaxType::Percentage);
        assert_eq!(count_rows(&conn, "account_tax").unwrap(), 2);
    }

    #[test]
    fn test_key_distinguishes_start_dates() {
        let mut a = Tax::new("035 food_rate_interstate");
        let mut b = a.clone();
        a.start_date = NaiveDate::from_ymd_opt(2023, 1, 1);
        b.start_date = NaiveDate::from_ymd_opt(2024, 1, 1);

        assert_ne!(a.key(), b.key());
        assert_eq!(Tax::new("035").key(), ("035".to_string(), None));
    }
}
