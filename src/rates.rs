// 💰 Rate import - SSTP sales-tax rates, one state at a time
//
// Per state:
//   1. jurisdictions  (one per distinct jurisdiction FIPS code)
//   2. taxes          (a `none` parent per FIPS + four dated rates per row)
//   3. parent links   (every rate points at the `none` tax of its FIPS code)

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;

use crate::config::Settings;
use crate::db::{record_stage, source_digest, SaveSummary};
use crate::entities::erp::{get_account, get_company, subdivision_code, tax_groups_by_code};
use crate::entities::jurisdiction::{jurisdictions_by_code, save_jurisdictions};
use crate::entities::place::places_by_fips;
use crate::entities::tax::{save_taxes, taxes_by_key};
use crate::entities::{Jurisdiction, JurisdictionType, Place, PlaceLevel, Tax, TaxKey, TaxType};
use crate::error::ImportError;
use crate::fetch::{fetch_rate_file, Fetched, Fetcher};
use crate::parser::{parse_rates, RateRow, RateType};
use crate::progress::Progress;
use crate::reconciliation::Upsert;

pub const ACTOR: &str = "import-rates";

#[derive(Debug, Default, Clone, Serialize)]
pub struct RatesReport {
    pub subdivision: String,
    pub jurisdictions: SaveSummary,
    pub taxes: SaveSummary,

    /// Rates whose parent link was set or changed
    pub linked: usize,
}

pub struct RateImporter<'a> {
    conn: &'a Connection,
    fetcher: &'a dyn Fetcher,
    settings: &'a Settings,
}

impl<'a> RateImporter<'a> {
    pub fn new(conn: &'a Connection, fetcher: &'a dyn Fetcher, settings: &'a Settings) -> Self {
        RateImporter {
            conn,
            fetcher,
            settings,
        }
    }

    /// Accepted for compatibility; every rate in the file is imported
    pub fn active(self, active: bool) -> Self {
        if active {
            tracing::debug!("--active has no effect, importing every rate");
        }
        self
    }

    pub fn run(&self, codes: &[String]) -> Result<Vec<RatesReport>> {
        codes.iter().map(|code| self.import_state(code)).collect()
    }

    /// Import the rate file of one state (`ut` or `US-UT`)
    pub fn import_state(&self, code: &str) -> Result<RatesReport> {
        let subdivision = subdivision_code(&self.settings.country, code);
        tracing::info!(subdivision = %subdivision, "importing rates");

        let taxes = self.get_taxes(&subdivision)?;
        let (mut records, mut report) = self.update_taxes(&subdivision, taxes)?;
        report.linked = self.update_taxes_parent(&mut records)?;

        Ok(report)
    }

    /// Existing taxes administered from the subdivision, keyed by (name, start date)
    pub fn get_taxes(&self, subdivision: &str) -> Result<HashMap<TaxKey, Tax>> {
        taxes_by_key(self.conn, subdivision)
    }

    pub fn update_taxes(
        &self,
        subdivision: &str,
        existing: HashMap<TaxKey, Tax>,
    ) -> Result<(Vec<Tax>, RatesReport)> {
        let places = places_by_fips(self.conn, subdivision)?;
        let groups = tax_groups_by_code(self.conn)?;
        let company = get_company(self.conn)?;
        let account = get_account(self.conn, company.id, &self.settings.sstp.tax_account)?;

        let state_code = subdivision.rsplit('-').next().unwrap_or(subdivision);
        let fetched = fetch_rate_file(self.fetcher, &self.settings.sstp.rates_url, state_code)?;
        let rows = parse_rates(&fetched.data)
            .with_context(|| format!("Failed to parse {}", fetched.url))?;

        let (jurisdictions, jurisdiction_summary) =
            self.update_jurisdictions(subdivision, &places, &rows, &fetched)?;
        let mut report = RatesReport {
            subdivision: subdivision.to_string(),
            jurisdictions: jurisdiction_summary,
            ..RatesReport::default()
        };

        let mut taxes = Upsert::new(existing);
        let progress = Progress::bar(self.settings.progress, rows.len() as u64, "Rates");
        for row in &rows {
            progress.inc();

            let authority_id = authority_of(subdivision, &places, row)?;
            let group = groups.get(&row.jurisdiction_type).ok_or_else(|| {
                ImportError::missing_record("tax group", format!("code {}", row.jurisdiction_type))
            })?;
            let code = Jurisdiction::code_for(&row.state, &row.jurisdiction_fips);
            let jurisdiction_id = jurisdictions.get(&code).and_then(|j| j.id);

            let fips = &row.jurisdiction_fips;
            let label = places
                .get(fips)
                .map(|p| p.name.as_str())
                .unwrap_or(fips.as_str());

            // First row of a FIPS code creates its parent, later rows leave it alone
            let parent_key = (fips.clone(), None);
            if !taxes.contains(&parent_key) {
                let parent = taxes.entry(parent_key, || Tax::new(fips));
                parent.tax_type = TaxType::None;
                parent.rate = None;
                parent.end_date = None;
                parent.description = format!("{} tax", label);
                parent.group_id = Some(group.id);
                parent.authority_id = Some(authority_id);
                parent.jurisdiction_id = jurisdiction_id;
            }

            for rate_type in RateType::ALL {
                let name = format!("{} {}", fips, rate_type.as_str());
                let rate = row.rate(rate_type);

                let record = taxes.entry((name.clone(), Some(row.start_date)), || Tax::new(&name));
                record.tax_type = TaxType::Percentage;
                record.description = format!("{} tax ({})", label, rate);
                record.rate = Some(rate);
                record.start_date = Some(row.start_date);
                record.end_date = row.end_date;
                record.group_id = Some(group.id);
                record.authority_id = Some(authority_id);
                record.jurisdiction_id = jurisdiction_id;
                record.invoice_account_id = Some(account.id);
                record.credit_note_account_id = Some(account.id);
            }
        }
        progress.finish();

        let mut records = taxes.into_records();
        report.taxes = save_taxes(self.conn, &mut records)?;
        record_stage(
            self.conn,
            ACTOR,
            "taxes_imported",
            ("subdivision", subdivision),
            report.taxes,
            &fetched.url,
            &source_digest(&fetched.data),
        )?;

        Ok((records, report))
    }

    fn update_jurisdictions(
        &self,
        subdivision: &str,
        places: &HashMap<String, Place>,
        rows: &[RateRow],
        fetched: &Fetched,
    ) -> Result<(HashMap<String, Jurisdiction>, SaveSummary)> {
        let mut existing = HashMap::new();
        for state in places.values().filter(|p| p.level() == PlaceLevel::State) {
            if let Some(id) = state.id {
                existing.extend(jurisdictions_by_code(self.conn, id)?);
            }
        }

        let mut jurisdictions = Upsert::new(existing);
        for row in rows {
            let authority_id = authority_of(subdivision, places, row)?;
            let jurisdiction_type = JurisdictionType::from_code(&row.jurisdiction_type)
                .ok_or_else(|| ImportError::missing_key("jurisdiction type", &row.jurisdiction_type))?;

            let code = Jurisdiction::code_for(&row.state, &row.jurisdiction_fips);
            let record = jurisdictions.entry(code.clone(), || {
                Jurisdiction::new(&code, authority_id, jurisdiction_type)
            });
            record.authority_id = authority_id;
            record.jurisdiction_type = jurisdiction_type;
            record.place_id = places.get(&row.jurisdiction_fips).and_then(|p| p.id);
        }

        let mut records = jurisdictions.into_records();
        let summary = save_jurisdictions(self.conn, &mut records)?;
        record_stage(
            self.conn,
            ACTOR,
            "jurisdictions_imported",
            ("subdivision", subdivision),
            summary,
            &fetched.url,
            &source_digest(&fetched.data),
        )?;

        let by_code = records.into_iter().map(|j| (j.code.clone(), j)).collect();
        Ok((by_code, summary))
    }

    /// Point every rate at the `none` tax of its FIPS code; returns the links changed
    pub fn update_taxes_parent(&self, records: &mut [Tax]) -> Result<usize> {
        let parents: HashMap<String, i64> = records
            .iter()
            .filter(|t| t.tax_type == TaxType::None)
            .filter_map(|t| t.id.map(|id| (t.name.clone(), id)))
            .collect();

        let mut changed = Vec::new();
        let progress = Progress::bar(self.settings.progress, records.len() as u64, "Parents");
        for record in records.iter_mut() {
            progress.inc();
            if record.tax_type == TaxType::None {
                continue;
            }

            let fips = record.name.split(' ').next().unwrap_or_default();
            let parent_id = *parents
                .get(fips)
                .ok_or_else(|| ImportError::missing_key("parent tax", fips))?;

            if record.parent_id != Some(parent_id) {
                record.parent_id = Some(parent_id);
                changed.push(record.clone());
            }
        }
        progress.finish();

        save_taxes(self.conn, &mut changed)?;
        tracing::info!(linked = changed.len(), "taxes linked to parents");

        Ok(changed.len())
    }
}

/// The state place administering a rate row; missing is fatal
fn authority_of(subdivision: &str, places: &HashMap<String, Place>, row: &RateRow) -> Result<i64> {
    places
        .get(&row.state)
        .and_then(|p| p.id)
        .ok_or_else(|| ImportError::missing_key("state", format!("{} {}", subdivision, row.state)).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{count_rows, get_events_for_entity, setup_database};
    use crate::entities::erp::{
        insert_account, insert_company, insert_country, insert_subdivision,
    };
    use crate::entities::place::save_places;
    use crate::entities::tax::children_of;
    use crate::fetch::testing::{zip_with, MemoryFetcher};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    const LISTING: &str = r#"<html><body>
        <a href="ALR2024Q1JAN.zip">ALR2024Q1JAN.zip</a>
        <a href="UTR2024Q1JAN.zip">UTR2024Q1JAN.zip</a>
    </body></html>"#;

    const RATES: &str = "\
49|45|49|0.0485|0.0485|0.0175|0.0175|20240101|99991231
49|00|035|0.0235|0.0235|0.0125|0.0125|20230401|20231231
49|00|035|0.0245|0.0245|0.0125|0.0125|20240101|99991231
49|01|67000|0.01|0.01|0.01|0.01|20240101|99991231
49|07|90001|0.001|0.001|0|0|20240101|99991231
";

    fn settings() -> Settings {
        Settings {
            progress: false,
            ..Settings::default()
        }
    }

    fn fetcher(settings: &Settings) -> MemoryFetcher {
        let base = &settings.sstp.rates_url;
        MemoryFetcher::default().with(base, LISTING).with(
            &format!("{}UTR2024Q1JAN.zip", base),
            zip_with("UTR2024Q1JAN.csv", RATES.as_bytes()),
        )
    }

    /// Database holding Utah, one county and one city, plus the tax account
    fn test_db(with_account: bool) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let us = insert_country(&conn, "US", "United States").unwrap();
        let ut = insert_subdivision(&conn, us, "US-UT", "Utah").unwrap();
        let company = insert_company(&conn, "Acme").unwrap();
        if with_account {
            insert_account(&conn, company, "Main Tax").unwrap();
        }

        let mut state = vec![Place::new(us, ut, "US-UT", "49")];
        state[0].name = "Utah".to_string();
        save_places(&conn, &mut state).unwrap();

        let mut county = Place::new(us, ut, "US-UT", "035");
        county.name = "Salt Lake County".to_string();
        county.parent_id = state[0].id;
        let mut counties = vec![county];
        save_places(&conn, &mut counties).unwrap();

        let mut city = Place::new(us, ut, "US-UT", "67000");
        city.name = "Salt Lake City".to_string();
        city.parent_id = counties[0].id;
        save_places(&conn, &mut [city]).unwrap();

        conn
    }

    fn decimal(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    fn none_taxes(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM account_tax WHERE type = 'none'", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_one_parent_per_jurisdiction_fips() {
        let conn = test_db(true);
        let settings = settings();
        let fetcher = fetcher(&settings);

        let reports = RateImporter::new(&conn, &fetcher, &settings)
            .run(&["ut".to_string()])
            .unwrap();

        assert_eq!(reports[0].subdivision, "US-UT");
        assert_eq!(reports[0].taxes.created, 4 + 5 * 4);
        assert_eq!(reports[0].linked, 20);
        assert_eq!(none_taxes(&conn), 4);
        assert_eq!(count_rows(&conn, "account_tax").unwrap(), 24);

        // Two dated rows of the county share one parent
        let taxes = taxes_by_key(&conn, "US-UT").unwrap();
        let county = &taxes[&("035".to_string(), None)];
        assert_eq!(county.tax_type, TaxType::None);
        assert_eq!(county.rate, None);
        assert_eq!(county.description, "Salt Lake County tax");
        assert_eq!(children_of(&conn, county.id.unwrap()).unwrap().len(), 8);

        println!("✅ One parent per FIPS test PASSED");
    }

    #[test]
    fn test_rates_dates_and_accounts() {
        let conn = test_db(true);
        let settings = settings();
        let fetcher = fetcher(&settings);

        RateImporter::new(&conn, &fetcher, &settings)
            .import_state("UT")
            .unwrap();

        let taxes = taxes_by_key(&conn, "US-UT").unwrap();
        let jan_2024 = NaiveDate::from_ymd_opt(2024, 1, 1);

        let state = &taxes[&("49 general_rate_intrastate".to_string(), jan_2024)];
        assert_eq!(state.rate, Some(decimal("0.0485")));
        assert_eq!(state.end_date, None);
        assert_eq!(state.description, "Utah tax (0.0485)");
        assert!(state.invoice_account_id.is_some());
        assert_eq!(state.invoice_account_id, state.credit_note_account_id);

        let closed = &taxes[&(
            "035 food_rate_interstate".to_string(),
            NaiveDate::from_ymd_opt(2023, 4, 1),
        )];
        assert_eq!(closed.rate, Some(decimal("0.0125")));
        assert_eq!(closed.end_date, NaiveDate::from_ymd_opt(2023, 12, 31));

        // No census place for the school district: the FIPS code names it
        let school = &taxes[&("90001 general_rate_interstate".to_string(), jan_2024)];
        assert_eq!(school.description, "90001 tax (0.001)");

        let groups = tax_groups_by_code(&conn).unwrap();
        assert_eq!(closed.group_id, Some(groups["00"].id));
        assert_eq!(school.group_id, Some(groups["07"].id));
    }

    #[test]
    fn test_jurisdictions_link_known_places() {
        let conn = test_db(true);
        let settings = settings();
        let fetcher = fetcher(&settings);

        let report = RateImporter::new(&conn, &fetcher, &settings)
            .import_state("UT")
            .unwrap();
        assert_eq!(report.jurisdictions.created, 4);

        let places = places_by_fips(&conn, "US-UT").unwrap();
        let state_id = places["49"].id.unwrap();
        let jurisdictions = jurisdictions_by_code(&conn, state_id).unwrap();

        assert_eq!(jurisdictions.len(), 4);
        assert_eq!(jurisdictions["49-67000"].place_id, places["67000"].id);
        assert_eq!(jurisdictions["49-67000"].jurisdiction_type, JurisdictionType::City);
        assert_eq!(jurisdictions["49-90001"].place_id, None);
        assert_eq!(
            jurisdictions["49-90001"].jurisdiction_type,
            JurisdictionType::SchoolDistrict
        );

        let taxes = taxes_by_key(&conn, "US-UT").unwrap();
        assert_eq!(
            taxes[&("035".to_string(), None)].jurisdiction_id,
            jurisdictions["49-035"].id
        );
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let conn = test_db(true);
        let settings = settings();
        let fetcher = fetcher(&settings);
        let importer = RateImporter::new(&conn, &fetcher, &settings).active(true);

        importer.import_state("UT").unwrap();
        let report = importer.import_state("US-UT").unwrap();

        assert_eq!(report.taxes, SaveSummary { created: 0, updated: 24 });
        assert_eq!(report.jurisdictions.created, 0);
        assert_eq!(report.linked, 0);
        assert_eq!(count_rows(&conn, "account_tax").unwrap(), 24);
        assert_eq!(count_rows(&conn, "account_jurisdiction").unwrap(), 4);

        let events = get_events_for_entity(&conn, "subdivision", "US-UT").unwrap();
        assert_eq!(events.len(), 4);
    }

    #[test]
    fn test_missing_tax_account_is_fatal() {
        let conn = test_db(false);
        let settings = settings();
        let fetcher = fetcher(&settings);

        let err = RateImporter::new(&conn, &fetcher, &settings)
            .import_state("UT")
            .unwrap_err();

        assert_eq!(err.to_string(), "Error missing account with name Main Tax");
        assert_eq!(count_rows(&conn, "account_tax").unwrap(), 0);
    }

    #[test]
    fn test_missing_state_place_is_fatal() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let us = insert_country(&conn, "US", "United States").unwrap();
        insert_subdivision(&conn, us, "US-UT", "Utah").unwrap();
        let company = insert_company(&conn, "Acme").unwrap();
        insert_account(&conn, company, "Main Tax").unwrap();
        let settings = settings();
        let fetcher = fetcher(&settings);

        let err = RateImporter::new(&conn, &fetcher, &settings)
            .import_state("UT")
            .unwrap_err();

        assert_eq!(err.to_string(), "No state found for key US-UT 49");
    }

    #[test]
    fn test_state_missing_from_listing() {
        let conn = test_db(true);
        let settings = settings();
        let fetcher = fetcher(&settings);

        let err = RateImporter::new(&conn, &fetcher, &settings)
            .run(&["ut".to_string(), "wa".to_string()])
            .unwrap_err();

        assert_eq!(err.to_string(), "File not found for code: WA");
        // Utah finished before Washington failed
        assert_eq!(none_taxes(&conn), 4);
    }
}
