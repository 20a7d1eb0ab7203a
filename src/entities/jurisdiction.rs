// ⚖️ Jurisdiction Entity - an area levying its own sales-tax rate
//
// Identity: code (`<state fips>-<jurisdiction fips>`)
// The type comes from the fixed SST enumeration below; its two-digit code is
// what the rate file carries and what the matching tax group is keyed by.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::db::SaveSummary;

// ============================================================================
// JURISDICTION TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JurisdictionType {
    State,
    County,
    City,
    Town,
    Village,
    Borough,
    Township,
    OtherMunicipality,
    SchoolDistrict,
    JuniorCollege,
    SpecialPurposeDistrict,
    LocalImprovementDistrict,
    CommunityRedevelopmentDistrict,
    TransportationDistrict,
    WaterDistrict,
    WaterCommissionDistrict,
    FireDistrict,
    ParkDistrict,
    PoliceDistrict,
    LibraryDistrict,
    HospitalDistrict,
    SanitationDistrict,
    SewerDistrict,
    MosquitoAbatementDistrict,
    CemeteryDistrict,
    BondAuthority,
    BusinessImprovementDistrict,
    TourismDistrict,
    MetropolitanTransitAuthority,
    RegionalTransportationAuthority,
    PublicSafetyDistrict,
    EmergencyCommunicationsDistrict,
    HousingAuthority,
    TribalReservation,
    UnorganizedTerritory,
}

impl JurisdictionType {
    pub const ALL: [JurisdictionType; 35] = [
        JurisdictionType::State,
        JurisdictionType::County,
        JurisdictionType::City,
        JurisdictionType::Town,
        JurisdictionType::Village,
        JurisdictionType::Borough,
        JurisdictionType::Township,
        JurisdictionType::OtherMunicipality,
        JurisdictionType::SchoolDistrict,
        JurisdictionType::JuniorCollege,
        JurisdictionType::SpecialPurposeDistrict,
        JurisdictionType::LocalImprovementDistrict,
        JurisdictionType::CommunityRedevelopmentDistrict,
        JurisdictionType::TransportationDistrict,
        JurisdictionType::WaterDistrict,
        JurisdictionType::WaterCommissionDistrict,
        JurisdictionType::FireDistrict,
        JurisdictionType::ParkDistrict,
        JurisdictionType::PoliceDistrict,
        JurisdictionType::LibraryDistrict,
        JurisdictionType::HospitalDistrict,
        JurisdictionType::SanitationDistrict,
        JurisdictionType::SewerDistrict,
        JurisdictionType::MosquitoAbatementDistrict,
        JurisdictionType::CemeteryDistrict,
        JurisdictionType::BondAuthority,
        JurisdictionType::BusinessImprovementDistrict,
        JurisdictionType::TourismDistrict,
        JurisdictionType::MetropolitanTransitAuthority,
        JurisdictionType::RegionalTransportationAuthority,
        JurisdictionType::PublicSafetyDistrict,
        JurisdictionType::EmergencyCommunicationsDistrict,
        JurisdictionType::HousingAuthority,
        JurisdictionType::TribalReservation,
        JurisdictionType::UnorganizedTerritory,
    ];

    /// Code used in the rate file `jurisdiction_type` column
    pub fn code(&self) -> &'static str {
        match self {
            JurisdictionType::State => "45",
            JurisdictionType::County => "00",
            JurisdictionType::City => "01",
            JurisdictionType::Town => "02",
            JurisdictionType::Village => "03",
            JurisdictionType::Borough => "04",
            JurisdictionType::Township => "05",
            JurisdictionType::OtherMunicipality => "06",
            JurisdictionType::SchoolDistrict => "07",
            JurisdictionType::JuniorCollege => "08",
            JurisdictionType::SpecialPurposeDistrict => "09",
            JurisdictionType::LocalImprovementDistrict => "10",
            JurisdictionType::CommunityRedevelopmentDistrict => "11",
            JurisdictionType::TransportationDistrict => "12",
            JurisdictionType::WaterDistrict => "13",
            JurisdictionType::WaterCommissionDistrict => "14",
            JurisdictionType::FireDistrict => "15",
            JurisdictionType::ParkDistrict => "16",
            JurisdictionType::PoliceDistrict => "17",
            JurisdictionType::LibraryDistrict => "18",
            JurisdictionType::HospitalDistrict => "19",
            JurisdictionType::SanitationDistrict => "20",
            JurisdictionType::SewerDistrict => "21",
            JurisdictionType::MosquitoAbatementDistrict => "22",
            JurisdictionType::CemeteryDistrict => "23",
            JurisdictionType::BondAuthority => "24",
            JurisdictionType::BusinessImprovementDistrict => "25",
            JurisdictionType::TourismDistrict => "26",
            JurisdictionType::MetropolitanTransitAuthority => "27",
            JurisdictionType::RegionalTransportationAuthority => "28",
            JurisdictionType::PublicSafetyDistrict => "29",
            JurisdictionType::EmergencyCommunicationsDistrict => "30",
            JurisdictionType::HousingAuthority => "31",
            JurisdictionType::TribalReservation => "32",
            JurisdictionType::UnorganizedTerritory => "33",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            JurisdictionType::State => "State",
            JurisdictionType::County => "County",
            JurisdictionType::City => "City",
            JurisdictionType::Town => "Town",
            JurisdictionType::Village => "Village",
            JurisdictionType::Borough => "Borough",
            JurisdictionType::Township => "Township",
            JurisdictionType::OtherMunicipality => "Other Municipality",
            JurisdictionType::SchoolDistrict => "School District",
            JurisdictionType::JuniorCollege => "Junior College",
            JurisdictionType::SpecialPurposeDistrict => "Special Purpose District",
            JurisdictionType::LocalImprovementDistrict => "Local Improvement District",
            JurisdictionType::CommunityRedevelopmentDistrict => "Community Redevelopment District",
            JurisdictionType::TransportationDistrict => "Transportation District",
            JurisdictionType::WaterDistrict => "Water District",
            JurisdictionType::WaterCommissionDistrict => "Water Commission District",
            JurisdictionType::FireDistrict => "Fire District",
            JurisdictionType::ParkDistrict => "Park District",
            JurisdictionType::PoliceDistrict => "Police District",
            JurisdictionType::LibraryDistrict => "Library District",
            JurisdictionType::HospitalDistrict => "Hospital District",
            JurisdictionType::SanitationDistrict => "Sanitation District",
            JurisdictionType::SewerDistrict => "Sewer District",
            JurisdictionType::MosquitoAbatementDistrict => "Mosquito Abatement District",
            JurisdictionType::CemeteryDistrict => "Cemetery District",
            JurisdictionType::BondAuthority => "Bond Authority",
            JurisdictionType::BusinessImprovementDistrict => "Business Improvement District",
            JurisdictionType::TourismDistrict => "Tourism District",
            JurisdictionType::MetropolitanTransitAuthority => "Metropolitan Transit Authority",
            JurisdictionType::RegionalTransportationAuthority => "Regional Transportation Authority",
            JurisdictionType::PublicSafetyDistrict => "Public Safety District",
            JurisdictionType::EmergencyCommunicationsDistrict => "Emergency Communications District",
            JurisdictionType::HousingAuthority => "Housing Authority",
            JurisdictionType::TribalReservation => "Reservation / Tribal",
            JurisdictionType::UnorganizedTerritory => "Unorganized Territory",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.code() == code)
    }
}

// ============================================================================
// JURISDICTION ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jurisdiction {
    pub id: Option<i64>,
    pub code: String,

    /// Top-level place administering the tax (the state)
    pub authority_id: i64,

    /// Geographic place of the jurisdiction, when the census knows it
    pub place_id: Option<i64>,

    pub jurisdiction_type: JurisdictionType,
    pub active: bool,
}

impl Jurisdiction {
    pub fn new(code: &str, authority_id: i64, jurisdiction_type: JurisdictionType) -> Self {
        Jurisdiction {
            id: None,
            code: code.to_string(),
            authority_id,
            place_id: None,
            jurisdiction_type,
            active: true,
        }
    }

    /// Natural key from the rate file columns
    pub fn code_for(state_fips: &str, jurisdiction_fips: &str) -> String {
        format!("{}-{}", state_fips, jurisdiction_fips)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let type_code: String = row.get(4)?;
        let jurisdiction_type = JurisdictionType::from_code(&type_code).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("unknown jurisdiction type {}", type_code).into(),
            )
        })?;

        Ok(Jurisdiction {
            id: row.get(0)?,
            code: row.get(1)?,
            authority_id: row.get(2)?,
            place_id: row.get(3)?,
            jurisdiction_type,
            active: row.get(5)?,
        })
    }
}

/// Jurisdictions administered by `authority_id`, keyed by code
pub fn jurisdictions_by_code(
    conn: &Connection,
    authority_id: i64,
) -> Result<HashMap<String, Jurisdiction>> {
    let mut stmt = conn.prepare(
        "SELECT id, code, authority_id, place_id, type, active
         FROM account_jurisdiction WHERE authority_id = ?1",
    )?;

    let jurisdictions = stmt
        .query_map([authority_id], Jurisdiction::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(jurisdictions
        .into_iter()
        .map(|j| (j.code.clone(), j))
        .collect())
}

pub fn save_jurisdictions(conn: &Connection, records: &mut [Jurisdiction]) -> Result<SaveSummary> {
    let tx = conn.unchecked_transaction()?;
    let mut summary = SaveSummary::default();

    {
        let mut insert = tx.prepare(
            "INSERT INTO account_jurisdiction (code, authority_id, place_id, type, active)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        let mut update = tx.prepare(
            "UPDATE account_jurisdiction
             SET code = ?1, authority_id = ?2, place_id = ?3, type = ?4, active = ?5
             WHERE id = ?6",
        )?;

        for record in records.iter_mut() {
            let type_code = record.jurisdiction_type.code();
            match record.id {
                Some(id) => {
                    update
                        .execute(params![
                            record.code,
                            record.authority_id,
                            record.place_id,
                            type_code,
                            record.active,
                            id,
                        ])
                        .with_context(|| format!("Failed to update jurisdiction {}", record.code))?;
                    summary.updated += 1;
                }
                None => {
                    insert
                        .execute(params![
                            record.code,
                            record.authority_id,
                            record.place_id,
                            type_code,
                            record.active,
                        ])
                        .with_context(|| format!("Failed to insert jurisdiction {}", record.code))?;
                    record.id = Some(tx.last_insert_rowid());
                    summary.created += 1;
                }
            }
        }
    }

    tx.commit()?;
    Ok(summary)
}
