// US SSTP Import - Core Library
// Census geography and sales-tax rate importers, shared by both binaries

pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod parser;
pub mod places;         // Geography importer: states, counties, places
pub mod progress;
pub mod rates;          // Rate importer: jurisdictions, taxes, parent links
pub mod reconciliation; // Find-or-create by natural key
pub mod schema;

// Re-export commonly used types
pub use config::Settings;
pub use db::{
    ImportEvent, SaveSummary,
    open_database, setup_database, insert_event, get_events_for_entity, source_digest,
};
pub use entities::{
    ClassCode, Jurisdiction, JurisdictionType, Place, PlaceLevel, Region, Tax, TaxType,
};
pub use error::ImportError;
pub use fetch::{Fetcher, HttpFetcher};
pub use places::{PlaceImporter, PlacesReport};
pub use rates::{RateImporter, RatesReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
