// Entity Models - census geography and sales-tax records
//
// Each entity has:
// - A natural key the importers reconcile on
// - Keyed lookups returning HashMaps for the find-or-create pass
// - A batch save running in a single transaction

pub mod class_code;
pub mod erp;
pub mod jurisdiction;
pub mod place;
pub mod region;
pub mod tax;

pub use class_code::ClassCode;
pub use erp::{Account, Company, Country, Subdivision, TaxGroup};
pub use jurisdiction::{Jurisdiction, JurisdictionType};
pub use place::{Place, PlaceLevel};
pub use region::{Region, DIVISIONS};
pub use tax::{Tax, TaxKey, TaxType};
