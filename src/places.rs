// 🗺️ Geography import - Census states, counties and places
//
// Stages:
//   states   (national file, every state the ERP has a subdivision for)
//   counties (requested subdivisions only, parent = state)
//   places   (requested subdivisions only, parent = county)
//
// Each stage reconciles on the natural key, saves once and records an event.

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;

use crate::config::Settings;
use crate::db::{record_stage, source_digest, SaveSummary};
use crate::entities::class_code::class_codes_by_code;
use crate::entities::erp::{find_subdivision, get_country, subdivision_code};
use crate::entities::place::{places_by_key, save_places, states_by_fips};
use crate::entities::region::{division_for_state, regions_by_code};
use crate::entities::{Country, Place, Subdivision};
use crate::error::ImportError;
use crate::fetch::Fetcher;
use crate::parser::{parse_census, CountyRow, PlaceRow, StateRow};
use crate::progress::Progress;
use crate::reconciliation::{ClassCodeResolver, Upsert};

pub const ACTOR: &str = "import-places";

/// A parsed Census file and where it came from
pub struct Source<T> {
    pub url: String,
    pub digest: String,
    pub rows: Vec<T>,
}

/// Places touched by one stage, keyed by FIPS code
#[derive(Debug, Default)]
pub struct Stage {
    pub places: HashMap<String, Place>,
    pub summary: SaveSummary,
}

impl Stage {
    fn from_records(records: Vec<Place>, summary: SaveSummary) -> Self {
        let places = records
            .into_iter()
            .map(|p| (p.code_fips.clone(), p))
            .collect();
        Stage { places, summary }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct PlacesReport {
    pub states: SaveSummary,
    pub counties: SaveSummary,
    pub places: SaveSummary,
    pub unknown_class_codes: Vec<String>,
}

pub struct PlaceImporter<'a> {
    conn: &'a Connection,
    fetcher: &'a dyn Fetcher,
    settings: &'a Settings,
}

impl<'a> PlaceImporter<'a> {
    pub fn new(conn: &'a Connection, fetcher: &'a dyn Fetcher, settings: &'a Settings) -> Self {
        PlaceImporter {
            conn,
            fetcher,
            settings,
        }
    }

    /// Import every state, then counties and places of each code (`ut`, `US-UT`)
    pub fn run(&self, codes: &[String]) -> Result<PlacesReport> {
        let mut report = PlacesReport::default();

        let country = get_country(self.conn, &self.settings.country)?;
        let states = self.update_states(&country)?;
        report.states = states.summary;

        if codes.is_empty() {
            return Ok(report);
        }

        let county_source: Source<CountyRow> = self.load(&self.settings.census.county_url)?;
        let place_source: Source<PlaceRow> = self.load(&self.settings.census.place_url)?;
        let mut classes = ClassCodeResolver::new(class_codes_by_code(self.conn)?);

        for code in codes {
            let code = subdivision_code(&country.code, code);
            tracing::info!(subdivision = %code, "importing subdivision");

            let subdivision = find_subdivision(self.conn, &code)?
                .ok_or_else(|| ImportError::missing_record("subdivision", format!("code {}", code)))?;
            let state = states
                .places
                .values()
                .find(|p| p.subdivision_code == subdivision.code)
                .ok_or_else(|| ImportError::missing_key("state", &subdivision.code))?;

            let counties = self.update_counties(&subdivision, state, &county_source, &mut classes)?;
            report.counties.created += counties.summary.created;
            report.counties.updated += counties.summary.updated;

            let places =
                self.update_places(&subdivision, state, &counties.places, &place_source, &mut classes)?;
            report.places.created += places.summary.created;
            report.places.updated += places.summary.updated;
        }

        report.unknown_class_codes = classes.unknown_codes();
        Ok(report)
    }

    fn load<T: DeserializeOwned>(&self, url: &str) -> Result<Source<T>> {
        let fetched = self.fetcher.fetch(url)?;
        let rows = parse_census(&fetched.data)
            .with_context(|| format!("Failed to parse {}", fetched.url))?;

        Ok(Source {
            digest: source_digest(&fetched.data),
            url: fetched.url,
            rows,
        })
    }

    /// Existing state places of the country keyed by FIPS code
    pub fn get_states(&self, country: &Country) -> Result<HashMap<String, Place>> {
        states_by_fips(self.conn, country.id)
    }

    pub fn update_states(&self, country: &Country) -> Result<Stage> {
        let source: Source<StateRow> = self.load(&self.settings.census.state_url)?;
        let regions = regions_by_code(self.conn)?;
        let mut upsert = Upsert::new(self.get_states(country)?);

        let progress = Progress::bar(self.settings.progress, source.rows.len() as u64, "States");
        for row in &source.rows {
            progress.inc();

            let code = subdivision_code(&country.code, &row.state);
            let Some(subdivision) = find_subdivision(self.conn, &code)? else {
                tracing::debug!(subdivision = %code, "no subdivision, state skipped");
                continue;
            };

            let record = upsert.entry(row.state_fips.clone(), || {
                Place::new(country.id, subdivision.id, &subdivision.code, &row.state_fips)
            });
            record.name = row.name.clone();
            record.code_gnis = Some(row.gnis);
            record.subdivision_id = subdivision.id;
            record.subdivision_code = subdivision.code.clone();
            record.region_id = division_for_state(&row.state_fips)
                .and_then(|division| regions.get(division))
                .map(|region| region.id);
        }
        progress.finish();

        let mut records = upsert.into_records();
        let summary = save_places(self.conn, &mut records)?;
        record_stage(
            self.conn,
            ACTOR,
            "states_imported",
            ("country", &country.code),
            summary,
            &source.url,
            &source.digest,
        )?;

        Ok(Stage::from_records(records, summary))
    }

    pub fn update_counties(
        &self,
        subdivision: &Subdivision,
        state: &Place,
        source: &Source<CountyRow>,
        classes: &mut ClassCodeResolver,
    ) -> Result<Stage> {
        let rows: Vec<&CountyRow> = source
            .rows
            .iter()
            .filter(|row| row.state_fips == state.code_fips)
            .collect();
        let mut upsert = Upsert::new(places_by_key(self.conn, &subdivision.code)?);

        let progress = Progress::bar(self.settings.progress, rows.len() as u64, "Counties");
        for row in rows {
            progress.inc();

            let key = (subdivision.code.clone(), row.county_fips.clone());
            let record = upsert.entry(key, || {
                Place::new(state.country_id, subdivision.id, &subdivision.code, &row.county_fips)
            });
            record.name = row.name.clone();
            record.code_gnis = Some(row.gnis);
            record.class_code_id = classes.resolve(&row.class_code);
            record.region_id = state.region_id;
            record.parent_id = state.id;
        }
        progress.finish();

        let mut records = upsert.into_records();
        let summary = save_places(self.conn, &mut records)?;
        record_stage(
            self.conn,
            ACTOR,
            "counties_imported",
            ("subdivision", &subdivision.code),
            summary,
            &source.url,
            &source.digest,
        )?;

        Ok(Stage::from_records(records, summary))
    }

    /// Places of one subdivision; `counties` are that subdivision's counties by FIPS
    pub fn update_places(
        &self,
        subdivision: &Subdivision,
        state: &Place,
        counties: &HashMap<String, Place>,
        source: &Source<PlaceRow>,
        classes: &mut ClassCodeResolver,
    ) -> Result<Stage> {
        let rows: Vec<&PlaceRow> = source
            .rows
            .iter()
            .filter(|row| row.state_fips == state.code_fips)
            .collect();
        let mut upsert = Upsert::new(places_by_key(self.conn, &subdivision.code)?);

        let progress = Progress::bar(self.settings.progress, rows.len() as u64, "Places");
        for row in rows {
            progress.inc();

            let county = counties.get(&row.county_fips).ok_or_else(|| {
                ImportError::missing_key("county", format!("{} {}", subdivision.code, row.county_fips))
            })?;

            let key = (subdivision.code.clone(), row.place_fips.clone());
            let record = upsert.entry(key, || {
                Place::new(county.country_id, subdivision.id, &subdivision.code, &row.place_fips)
            });
            // Places spanning counties end up under the last one listed
            record.name = row.name.clone();
            record.code_gnis = Some(row.gnis);
            record.class_code_id = classes.resolve(&row.class_code);
            record.region_id = county.region_id;
            record.parent_id = county.id;
        }
        progress.finish();

        let mut records = upsert.into_records();
        let summary = save_places(self.conn, &mut records)?;
        record_stage(
            self.conn,
            ACTOR,
            "places_imported",
            ("subdivision", &subdivision.code),
            summary,
            &source.url,
            &source.digest,
        )?;

        Ok(Stage::from_records(records, summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{count_rows, get_events_for_entity, setup_database};
    use crate::entities::erp::{insert_country, insert_subdivision};
    use crate::entities::place::{children_of, places_by_fips};
    use crate::fetch::testing::MemoryFetcher;

    const STATES: &str = "\
STATE|STATEFP|STATENS|STATE_NAME
AL|01|01779775|Alabama
UT|49|01455989|Utah
PR|72|01779808|Puerto Rico
";

    const COUNTIES: &str = "\
STATE|STATEFP|COUNTYFP|COUNTYNS|COUNTYNAME|CLASSFP|FUNCSTAT
AL|01|001|00161526|Autauga County|H1|A
UT|49|035|01448032|Salt Lake County|H1|A
UT|49|049|01448039|Utah County|H1|A
";

    const PLACES: &str = "\
STATE|STATEFP|COUNTYFP|COUNTYNAME|PLACEFP|PLACENS|PLACENAME|TYPE|CLASSFP|FUNCSTAT
AL|01|001|Autauga County|62328|02404608|Prattville city|INCORPORATED PLACE|C1|A
UT|49|035|Salt Lake County|67000|02411771|Salt Lake City city|INCORPORATED PLACE|C1|A
UT|49|035|Salt Lake County|20120|02410345|Draper city|INCORPORATED PLACE|C1|A
UT|49|035|Salt Lake County|65330|02411811|Sandy city|INCORPORATED PLACE|Z9|A
UT|49|049|Utah County|62470|02411496|Provo city|INCORPORATED PLACE|C1|A
UT|49|049|Utah County|20120|02410345|Draper city|INCORPORATED PLACE|C1|A
UT|49|049|Utah County|50150|02411212|Mapleton city|INCORPORATED PLACE|Z9|A
";

    fn settings() -> Settings {
        Settings {
            progress: false,
            ..Settings::default()
        }
    }

    fn fetcher(settings: &Settings, places: &str) -> MemoryFetcher {
        MemoryFetcher::default()
            .with(&settings.census.state_url, STATES)
            .with(&settings.census.county_url, COUNTIES)
            .with(&settings.census.place_url, places)
    }

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let us = insert_country(&conn, "US", "United States").unwrap();
        insert_subdivision(&conn, us, "US-AL", "Alabama").unwrap();
        insert_subdivision(&conn, us, "US-UT", "Utah").unwrap();
        conn
    }

    fn codes(codes: &[&str]) -> Vec<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_import_builds_hierarchy() {
        let conn = test_db();
        let settings = settings();
        let fetcher = fetcher(&settings, PLACES);

        let report = PlaceImporter::new(&conn, &fetcher, &settings)
            .run(&codes(&["ut"]))
            .unwrap();

        // Puerto Rico has no subdivision and is skipped
        assert_eq!(report.states.created, 2);
        assert_eq!(report.counties.created, 2);
        assert_eq!(report.places.created, 5);
        assert_eq!(count_rows(&conn, "census_place").unwrap(), 9);

        let utah = places_by_fips(&conn, "US-UT").unwrap();
        let d8: i64 = conn
            .query_row("SELECT id FROM census_region WHERE code = 'D8'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(utah["49"].region_id, Some(d8));
        assert_eq!(utah["49"].code_gnis, Some(1455989));
        assert_eq!(utah["035"].parent_id, utah["49"].id);
        assert_eq!(utah["035"].region_id, Some(d8));
        assert_eq!(utah["67000"].parent_id, utah["035"].id);
        assert_eq!(utah["67000"].name, "Salt Lake City city");

        // Alabama counties were not requested
        let alabama = places_by_fips(&conn, "US-AL").unwrap();
        assert_eq!(alabama.len(), 1);
        assert!(children_of(&conn, alabama["01"].id.unwrap()).unwrap().is_empty());

        println!("✅ Geography import test PASSED");
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let conn = test_db();
        let settings = settings();
        let fetcher = fetcher(&settings, PLACES);
        let importer = PlaceImporter::new(&conn, &fetcher, &settings);

        importer.run(&codes(&["UT"])).unwrap();
        let rows = count_rows(&conn, "census_place").unwrap();

        let report = importer.run(&codes(&["US-UT"])).unwrap();

        assert_eq!(count_rows(&conn, "census_place").unwrap(), rows);
        assert_eq!(report.states, SaveSummary { created: 0, updated: 2 });
        assert_eq!(report.places.created, 0);
        assert_eq!(report.places.updated, 5);
    }

    #[test]
    fn test_place_in_two_counties_keeps_last_county() {
        let conn = test_db();
        let settings = settings();
        let fetcher = fetcher(&settings, PLACES);

        PlaceImporter::new(&conn, &fetcher, &settings)
            .run(&codes(&["UT"]))
            .unwrap();

        let utah = places_by_fips(&conn, "US-UT").unwrap();
        assert_eq!(utah["20120"].parent_id, utah["049"].id);
    }

    #[test]
    fn test_unknown_class_code_reported_once() {
        let conn = test_db();
        let settings = settings();
        let fetcher = fetcher(&settings, PLACES);

        let report = PlaceImporter::new(&conn, &fetcher, &settings)
            .run(&codes(&["UT"]))
            .unwrap();

        assert_eq!(report.unknown_class_codes, vec!["Z9"]);
        let utah = places_by_fips(&conn, "US-UT").unwrap();
        assert!(utah["65330"].class_code_id.is_none());
        assert!(utah["67000"].class_code_id.is_some());
    }

    #[test]
    fn test_place_with_unknown_county_is_fatal() {
        let conn = test_db();
        let settings = settings();
        let places = format!(
            "{}UT|49|011|Davis County|43660|02411025|Layton city|INCORPORATED PLACE|C1|A\n",
            PLACES
        );
        let fetcher = fetcher(&settings, &places);

        let err = PlaceImporter::new(&conn, &fetcher, &settings)
            .run(&codes(&["UT"]))
            .unwrap_err();

        assert_eq!(err.to_string(), "No county found for key US-UT 011");
        // The failed stage saved nothing
        assert!(!places_by_fips(&conn, "US-UT").unwrap().contains_key("67000"));
    }

    #[test]
    fn test_unreachable_source_is_fatal() {
        let conn = test_db();
        let settings = settings();
        let fetcher = MemoryFetcher::default();

        let err = PlaceImporter::new(&conn, &fetcher, &settings)
            .run(&[])
            .unwrap_err();

        assert!(err.to_string().starts_with("Error downloading"));
        assert!(err.to_string().contains("national_state2020.txt"));
    }

    #[test]
    fn test_missing_country_and_subdivision_are_fatal() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let settings = settings();
        let fetcher = fetcher(&settings, PLACES);

        let err = PlaceImporter::new(&conn, &fetcher, &settings)
            .run(&[])
            .unwrap_err();
        assert_eq!(err.to_string(), "Error missing country with code US");

        let conn = test_db();
        let err = PlaceImporter::new(&conn, &fetcher, &settings)
            .run(&codes(&["WY"]))
            .unwrap_err();
        assert_eq!(err.to_string(), "Error missing subdivision with code US-WY");
    }

    #[test]
    fn test_each_stage_is_recorded() {
        let conn = test_db();
        let settings = settings();
        let fetcher = fetcher(&settings, PLACES);

        PlaceImporter::new(&conn, &fetcher, &settings)
            .run(&codes(&["UT"]))
            .unwrap();

        let country = get_events_for_entity(&conn, "country", "US").unwrap();
        assert_eq!(country.len(), 1);
        assert_eq!(country[0].event_type, "states_imported");
        assert_eq!(country[0].data["sha256"], source_digest(STATES.as_bytes()));

        let utah = get_events_for_entity(&conn, "subdivision", "US-UT").unwrap();
        let mut types: Vec<_> = utah.iter().map(|e| e.event_type.as_str()).collect();
        types.sort();
        assert_eq!(types, vec!["counties_imported", "places_imported"]);
    }
}
