// Importer configuration
//
// Sources, highest priority last:
// 1. Built-in defaults
// 2. TOML file passed with --config
// 3. Environment variables (SSTP_ prefix, __ separates sections)
//
// Example: SSTP_CENSUS__STATE_URL overrides census.state_url

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

const CENSUS_BASE: &str = "https://www2.census.gov/geo/docs/reference/codes2020";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CensusSources {
    pub state_url: String,
    pub county_url: String,
    pub place_url: String,
}

impl Default for CensusSources {
    fn default() -> Self {
        CensusSources {
            state_url: format!("{}/national_state2020.txt", CENSUS_BASE),
            county_url: format!("{}/national_county2020.txt", CENSUS_BASE),
            place_url: format!("{}/national_place_by_county2020.txt", CENSUS_BASE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SstpSources {
    /// Directory listing holding one rate file per state
    pub rates_url: String,

    /// Account assigned to every imported rate
    pub tax_account: String,
}

impl Default for SstpSources {
    fn default() -> Self {
        SstpSources {
            rates_url: "https://www.streamlinedsalestax.org/ratesandboundry/Rates/".to_string(),
            tax_account: "Main Tax".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// ISO code of the country owning every imported place
    pub country: String,

    /// Show progress bars on stderr
    pub progress: bool,

    pub user_agent: String,

    #[serde(default)]
    pub census: CensusSources,

    #[serde(default)]
    pub sstp: SstpSources,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            country: "US".to_string(),
            progress: true,
            user_agent: format!("us-sstp-import/{}", env!("CARGO_PKG_VERSION")),
            census: CensusSources::default(),
            sstp: SstpSources::default(),
        }
    }
}

impl Settings {
    /// Load settings from defaults, an optional TOML file and the environment
    pub fn load(config_file: Option<&Path>) -> Result<Self, figment::Error> {
        Self::figment(config_file).extract()
    }

    pub fn figment(config_file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));

        if let Some(path) = config_file {
            figment = figment.merge(Toml::file(path));
        }

        figment.merge(Env::prefixed("SSTP_").split("__"))
    }
}
