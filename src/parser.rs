// 🏗️ Parsers - Census reference files and SSTP rate files
//
// Census files: pipe-delimited with a header row, parsed through serde.
// Rate files: no header, fixed field order agreed with the publisher.

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use csv::{ReaderBuilder, StringRecord, Trim};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ImportError;

// ============================================================================
// CENSUS ROWS
// ============================================================================

/// Row of `national_state2020.txt`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StateRow {
    /// USPS abbreviation (`UT`)
    #[serde(rename = "STATE")]
    pub state: String,

    #[serde(rename = "STATEFP")]
    pub state_fips: String,

    #[serde(rename = "STATENS")]
    pub gnis: i64,

    #[serde(rename = "STATE_NAME")]
    pub name: String,
}

/// Row of `national_county2020.txt`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CountyRow {
    #[serde(rename = "STATE")]
    pub state: String,

    #[serde(rename = "STATEFP")]
    pub state_fips: String,

    #[serde(rename = "COUNTYFP")]
    pub county_fips: String,

    #[serde(rename = "COUNTYNS")]
    pub gnis: i64,

    #[serde(rename = "COUNTYNAME")]
    pub name: String,

    #[serde(rename = "CLASSFP")]
    pub class_code: String,
}

/// Row of `national_place_by_county2020.txt`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PlaceRow {
    #[serde(rename = "STATE")]
    pub state: String,

    #[serde(rename = "STATEFP")]
    pub state_fips: String,

    #[serde(rename = "COUNTYFP")]
    pub county_fips: String,

    #[serde(rename = "PLACEFP")]
    pub place_fips: String,

    #[serde(rename = "PLACENS")]
    pub gnis: i64,

    #[serde(rename = "PLACENAME")]
    pub name: String,

    #[serde(rename = "CLASSFP")]
    pub class_code: String,
}

/// Parse a pipe-delimited Census reference file with a header row
pub fn parse_census<T: DeserializeOwned>(data: &[u8]) -> Result<Vec<T>> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(b'|')
        .trim(Trim::All)
        .from_reader(data);

    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let row: T = result.context("Failed to deserialize census row")?;
        rows.push(row);
    }

    Ok(rows)
}

// ============================================================================
// RATE ROWS
// ============================================================================

/// Field order of the SSTP rate file
pub const RATE_FIELDS: [&str; 9] = [
    "state",
    "jurisdiction_type",
    "jurisdiction_fips_code",
    "general_rate_intrastate",
    "general_rate_interstate",
    "food_rate_intrastate",
    "food_rate_interstate",
    "start_date",
    "end_date",
];

/// The four rate columns, each imported as its own tax
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RateType {
    GeneralIntrastate,
    GeneralInterstate,
    FoodIntrastate,
    FoodInterstate,
}

impl RateType {
    pub const ALL: [RateType; 4] = [
        RateType::GeneralIntrastate,
        RateType::GeneralInterstate,
        RateType::FoodIntrastate,
        RateType::FoodInterstate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RateType::GeneralIntrastate => "general_rate_intrastate",
            RateType::GeneralInterstate => "general_rate_interstate",
            RateType::FoodIntrastate => "food_rate_intrastate",
            RateType::FoodInterstate => "food_rate_interstate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateRow {
    /// State FIPS code
    pub state: String,
    pub jurisdiction_type: String,
    pub jurisdiction_fips: String,
    pub general_intrastate: Decimal,
    pub general_interstate: Decimal,
    pub food_intrastate: Decimal,
    pub food_interstate: Decimal,
    pub start_date: NaiveDate,

    /// None when the file carries the open-ended sentinel
    pub end_date: Option<NaiveDate>,
}

impl RateRow {
    pub fn rate(&self, rate_type: RateType) -> Decimal {
        match rate_type {
            RateType::GeneralIntrastate => self.general_intrastate,
            RateType::GeneralInterstate => self.general_interstate,
            RateType::FoodIntrastate => self.food_intrastate,
            RateType::FoodInterstate => self.food_interstate,
        }
    }

    fn from_record(record: &StringRecord, line: u64) -> Result<Self, ImportError> {
        if record.len() < RATE_FIELDS.len() {
            return Err(ImportError::Parse {
                line,
                reason: format!(
                    "expected {} fields, found {}",
                    RATE_FIELDS.len(),
                    record.len()
                ),
            });
        }

        let field = |i: usize| record.get(i).unwrap_or_default();
        let rate = |i: usize| {
            Decimal::from_str(field(i)).map_err(|e| ImportError::Parse {
                line,
                reason: format!("{} {:?}: {}", RATE_FIELDS[i], field(i), e),
            })
        };
        let date = |i: usize| {
            parse_rate_date(field(i)).map_err(|e| ImportError::Parse {
                line,
                reason: format!("{} {:?}: {}", RATE_FIELDS[i], field(i), e),
            })
        };

        Ok(RateRow {
            state: field(0).to_string(),
            jurisdiction_type: field(1).to_string(),
            jurisdiction_fips: field(2).to_string(),
            general_intrastate: rate(3)?,
            general_interstate: rate(4)?,
            food_intrastate: rate(5)?,
            food_interstate: rate(6)?,
            start_date: date(7)?,
            end_date: open_ended(date(8)?),
        })
    }
}

/// `YYYYMMDD`
pub fn parse_rate_date(value: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(value, "%Y%m%d")
}

/// The publisher writes the maximum date for "no end date"
pub fn is_open_end(date: NaiveDate) -> bool {
    (date.year(), date.month(), date.day()) == (9999, 12, 31)
}

/// Map the sentinel end date to None, any other date passes through
pub fn open_ended(date: NaiveDate) -> Option<NaiveDate> {
    if is_open_end(date) {
        None
    } else {
        Some(date)
    }
}

/// `|` when the first line has one, `,` otherwise
pub fn detect_delimiter(data: &[u8]) -> u8 {
    let first_line = data.split(|&b| b == b'\n').next().unwrap_or_default();
    if first_line.contains(&b'|') {
        b'|'
    } else {
        b','
    }
}

/// Parse a headerless SSTP rate file
pub fn parse_rates(data: &[u8]) -> Result<Vec<RateRow>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .delimiter(detect_delimiter(data))
        .flexible(true)
        .trim(Trim::All)
        .from_reader(data);

    let mut rows = Vec::new();
    for (index, result) in rdr.records().enumerate() {
        let record = result.context("Failed to read rate row")?;
        let line = record
            .position()
            .map(|p| p.line())
            .unwrap_or(index as u64 + 1);

        // Trailing blank lines
        if record.iter().all(str::is_empty) {
            continue;
        }

        rows.push(RateRow::from_record(&record, line)?);
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATES: &str = "\
STATE|STATEFP|STATENS|STATE_NAME
AL|01|01779775|Alabama
UT|49|01455989|Utah
";

    const COUNTIES: &str = "\
STATE|STATEFP|COUNTYFP|COUNTYNS|COUNTYNAME|CLASSFP|FUNCSTAT
UT|49|035|01448032|Salt Lake County|H1|A
";

    const PLACES: &str = "\
STATE|STATEFP|COUNTYFP|COUNTYNAME|PLACEFP|PLACENS|PLACENAME|TYPE|CLASSFP|FUNCSTAT
UT|49|035|Salt Lake County|67000|02411771|Salt Lake City city|INCORPORATED PLACE|C1|A
";

    #[test]
    fn test_parse_states() {
        let rows: Vec<StateRow> = parse_census(STATES.as_bytes()).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].state, "UT");
        assert_eq!(rows[1].state_fips, "49");
        assert_eq!(rows[1].gnis, 1455989);
        assert_eq!(rows[1].name, "Utah");
    }

    #[test]
    fn test_parse_counties_and_places_ignore_extra_columns() {
        let counties: Vec<CountyRow> = parse_census(COUNTIES.as_bytes()).unwrap();
        assert_eq!(counties[0].county_fips, "035");
        assert_eq!(counties[0].class_code, "H1");

        let places: Vec<PlaceRow> = parse_census(PLACES.as_bytes()).unwrap();
        assert_eq!(places[0].place_fips, "67000");
        assert_eq!(places[0].county_fips, "035");
        assert_eq!(places[0].gnis, 2411771);
    }

    #[test]
    fn test_parse_rates_pipe_delimited() {
        let data = b"49|45|49|0.0485|0.0485|0.0175|0.0175|20240101|99991231\n\
49|00|035|0.0235|0.0235|0.0125|0.0125|20230401|20231231\n";

        let rows = parse_rates(data).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].jurisdiction_type, "45");
        assert_eq!(rows[0].rate(RateType::GeneralIntrastate), Decimal::from_str("0.0485").unwrap());
        assert_eq!(rows[0].rate(RateType::FoodInterstate), Decimal::from_str("0.0175").unwrap());
        assert_eq!(rows[0].end_date, None);
        assert_eq!(rows[1].start_date, NaiveDate::from_ymd_opt(2023, 4, 1).unwrap());
        assert_eq!(rows[1].end_date, NaiveDate::from_ymd_opt(2023, 12, 31));
    }

    #[test]
    fn test_parse_rates_comma_delimited() {
        let data = b"49,01,67000,0.0775,0.0775,0.03,0.03,20240101,99991231\r\n\r\n";

        let rows = parse_rates(data).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].jurisdiction_fips, "67000");
    }

    #[test]
    fn test_short_rate_row_is_rejected() {
        let err = parse_rates(b"49|45|49|0.0485\n").unwrap_err();
        assert!(err.to_string().contains("expected 9 fields"));
    }

    #[test]
    fn test_bad_rate_date_names_the_field() {
        let err = parse_rates(b"49|45|49|0.0485|0.0485|0.0175|0.0175|2024-01-01|99991231\n")
            .unwrap_err();
        assert!(err.to_string().contains("start_date"));
    }

    #[test]
    fn test_sentinel_end_date_is_open_ended() {
        let max = NaiveDate::from_ymd_opt(9999, 12, 31).unwrap();
        assert_eq!(open_ended(max), None);

        for date in [
            NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
            NaiveDate::from_ymd_opt(9999, 12, 30).unwrap(),
            NaiveDate::from_ymd_opt(2999, 12, 31).unwrap(),
        ] {
            assert_eq!(open_ended(date), Some(date));
        }
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter(b"a|b|c\n1,2"), b'|');
        assert_eq!(detect_delimiter(b"a,b,c\n1|2"), b',');
        assert_eq!(detect_delimiter(b""), b',');
    }
}
