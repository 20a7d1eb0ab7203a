// Import errors - every variant is fatal for the running importer
//
// The one non-fatal condition (unknown class code) never becomes an error,
// see reconciliation::ClassCodeResolver.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    /// Network or HTTP status failure while downloading a reference file
    #[error("Error downloading {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// The SSTP directory listing has no file for the requested state
    #[error("File not found for code: {0}")]
    FileNotFound(String),

    /// A lookup record the ERP must already hold (country, company, account...)
    #[error("Error missing {entity} with {key}")]
    MissingRecord { entity: &'static str, key: String },

    /// A row references a natural key that was not built by an earlier stage
    #[error("No {entity} found for key {key}")]
    MissingKey { entity: &'static str, key: String },

    #[error("Invalid row {line}: {reason}")]
    Parse { line: u64, reason: String },

    #[error("Invalid archive: {0}")]
    Archive(String),

    #[error("Invalid hierarchy: {0}")]
    Hierarchy(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] figment::Error),
}

impl ImportError {
    pub fn missing_record(entity: &'static str, key: impl Into<String>) -> Self {
        ImportError::MissingRecord {
            entity,
            key: key.into(),
        }
    }

    pub fn missing_key(entity: &'static str, key: impl Into<String>) -> Self {
        ImportError::MissingKey {
            entity,
            key: key.into(),
        }
    }
}
