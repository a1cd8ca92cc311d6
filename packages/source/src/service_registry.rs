//! Compile-time registry of external provider configurations.
//!
//! Each provider the pipeline talks to is defined in a TOML file under
//! `services/`. The registry embeds these at compile time and exposes
//! them via [`all_services`] and [`service`].

use std::time::Duration;

use serde::Deserialize;

/// An external provider configuration loaded from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderService {
    /// Unique identifier (e.g., `"census_geocoder"`, `"census_acs"`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Whether this provider may be used.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Upper bound on one logical call, retries included.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Provider-specific configuration.
    pub provider: ProviderConfig,
}

/// Provider-specific configuration, tagged by `type` in TOML.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Census Bureau geocoder, `geographies/coordinates` endpoint.
    CensusGeocoder {
        /// API base URL (e.g., `"https://geocoding.geo.census.gov/geocoder"`).
        base_url: String,
        /// Benchmark name (e.g., `"Public_AR_Current"`).
        benchmark: String,
        /// Geography vintage (e.g., `"Current_Current"`).
        vintage: String,
        /// Geography layer holding tracts (e.g., `"Census Tracts"`).
        layer: String,
    },
    /// Census Bureau data API for American Community Survey tables.
    CensusAcs {
        /// API base URL (e.g., `"https://api.census.gov/data"`).
        base_url: String,
        /// Survey year.
        vintage: String,
        /// Dataset path (e.g., `"acs/acs5"`).
        dataset: String,
    },
    /// `TIGERweb` `ArcGIS` REST map service.
    Tigerweb {
        /// Map service URL.
        base_url: String,
        /// Layer number of the tract features.
        layer: u32,
    },
}

const fn default_true() -> bool {
    true
}

const fn default_timeout_secs() -> u64 {
    8
}

impl ProviderService {
    /// Returns the provider's base URL regardless of variant.
    #[must_use]
    pub fn base_url(&self) -> &str {
        match &self.provider {
            ProviderConfig::CensusGeocoder { base_url, .. }
            | ProviderConfig::CensusAcs { base_url, .. }
            | ProviderConfig::Tigerweb { base_url, .. } => base_url,
        }
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ── Compile-time embedded TOML files ────────────────────────────────

const SERVICE_TOMLS: &[(&str, &str)] = &[
    (
        "census_geocoder",
        include_str!("../services/census_geocoder.toml"),
    ),
    ("census_acs", include_str!("../services/census_acs.toml")),
    (
        "tigerweb_tracts",
        include_str!("../services/tigerweb_tracts.toml"),
    ),
];

#[cfg(test)]
const EXPECTED_SERVICE_COUNT: usize = 3;

/// Returns all provider configurations (enabled and disabled).
///
/// # Panics
///
/// Panics if any TOML config is malformed (the configs are embedded, so
/// this surfaces on first use in any test run).
#[must_use]
pub fn all_services() -> Vec<ProviderService> {
    SERVICE_TOMLS
        .iter()
        .map(|(name, toml_str)| {
            toml::de::from_str(toml_str)
                .unwrap_or_else(|e| panic!("Failed to parse provider service '{name}': {e}"))
        })
        .collect()
}

/// Looks up an enabled provider by id.
#[must_use]
pub fn service(id: &str) -> Option<ProviderService> {
    all_services()
        .into_iter()
        .find(|s| s.id == id && s.enabled)
}
