//! American Community Survey + `TIGERweb` demographics provider.
//!
//! Two Census Bureau endpoints are combined per tract:
//!
//! - ACS 5-year detailed tables for income, home value, population, and
//!   tenure: `GET {base}/{vintage}/{dataset}?get=..&for=tract:{t}&in=state:{s} county:{c}`
//! - `TIGERweb` tract layer for the internal point used as the centroid:
//!   `GET {base}/{layer}/query?where=GEOID='..'&outFields=CENTLAT,CENTLON&f=json`
//!
//! The centroid is best-effort: a `TIGERweb` failure is logged and the
//! snapshot is built from the ACS figures alone.
//!
//! No API key is required for light use; set `CENSUS_API_KEY` to lift
//! the anonymous rate limit.

use async_trait::async_trait;
use canvass_area_models::{AreaId, Coordinate};
use canvass_source::retry::{self, RetryPolicy};
use canvass_source::service_registry::{ProviderConfig, ProviderService};

use crate::{DemographicsFetchError, DemographicsProvider, RawDemographics};

/// Median household income in the past 12 months.
const MEDIAN_INCOME: &str = "B19013_001E";
/// Median value of owner-occupied housing units.
const MEDIAN_HOME_VALUE: &str = "B25077_001E";
/// Total population.
const TOTAL_POPULATION: &str = "B01003_001E";
/// Occupied housing units (tenure universe).
const OCCUPIED_UNITS: &str = "B25003_001E";
/// Owner-occupied housing units.
const OWNER_OCCUPIED_UNITS: &str = "B25003_002E";

const ACS_VARIABLES: &[&str] = &[
    MEDIAN_INCOME,
    MEDIAN_HOME_VALUE,
    TOTAL_POPULATION,
    OCCUPIED_UNITS,
    OWNER_OCCUPIED_UNITS,
];

/// ACS annotation values (e.g. `-666666666` "estimate not available")
/// are all at or below this.
const ACS_SENTINEL_CEILING: f64 = -222_222_222.0;

/// Reads the optional Census API key from `CENSUS_API_KEY`.
///
/// Returns `None` when the variable is unset or empty.
#[must_use]
pub fn api_key_from_env() -> Option<String> {
    std::env::var("CENSUS_API_KEY").ok().filter(|k| !k.is_empty())
}

/// [`DemographicsProvider`] backed by the Census Bureau data API.
pub struct AcsDemographicsProvider {
    client: reqwest::Client,
    acs_url: String,
    tigerweb_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl AcsDemographicsProvider {
    /// `acs_url` is the full dataset URL (e.g.
    /// `https://api.census.gov/data/2023/acs/acs5`); `tigerweb_url` is the
    /// tract layer URL (e.g. `.../Tracts_Blocks/MapServer/0`).
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        acs_url: impl Into<String>,
        tigerweb_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            acs_url: acs_url.into(),
            tigerweb_url: tigerweb_url.into(),
            api_key: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Builds a provider from `census_acs` and `tigerweb` service entries.
    ///
    /// Returns `None` if either service has the wrong provider type.
    #[must_use]
    pub fn from_services(
        client: reqwest::Client,
        acs: &ProviderService,
        tigerweb: &ProviderService,
    ) -> Option<Self> {
        let ProviderConfig::CensusAcs {
            base_url,
            vintage,
            dataset,
        } = &acs.provider
        else {
            return None;
        };
        let ProviderConfig::Tigerweb {
            base_url: tiger_base,
            layer,
        } = &tigerweb.provider
        else {
            return None;
        };

        Some(Self::new(
            client,
            format!("{base_url}/{vintage}/{dataset}"),
            format!("{tiger_base}/{layer}"),
        ))
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn fetch_acs(
        &self,
        area_id: &AreaId,
        (state, county, tract): (&str, &str, &str),
    ) -> Result<AcsFigures, DemographicsFetchError> {
        let get = ACS_VARIABLES.join(",");
        let for_clause = format!("tract:{tract}");
        let in_clause = format!("state:{state} county:{county}");

        let body = retry::send_text(&self.retry, || {
            let req = self.client.get(&self.acs_url).query(&[
                ("get", get.as_str()),
                ("for", for_clause.as_str()),
                ("in", in_clause.as_str()),
            ]);
            match &self.api_key {
                Some(key) => req.query(&[("key", key.as_str())]),
                None => req,
            }
        })
        .await?;

        // The data API answers 204 with an empty body for unknown tracts.
        if body.trim().is_empty() {
            return Err(DemographicsFetchError::UnknownArea {
                area_id: area_id.to_string(),
            });
        }

        let table: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| DemographicsFetchError::Malformed {
                message: format!("ACS response for {area_id} is not JSON: {e}"),
            })?;

        parse_acs_table(area_id, &table)
    }

    async fn fetch_centroid(&self, area_id: &AreaId) -> Result<Option<Coordinate>, DemographicsFetchError> {
        let url = format!("{}/query", self.tigerweb_url);
        let where_clause = format!("GEOID='{}'", area_id.as_str());

        let body = retry::send_json(&self.retry, || {
            self.client.get(&url).query(&[
                ("where", where_clause.as_str()),
                ("outFields", "GEOID,CENTLAT,CENTLON"),
                ("returnGeometry", "false"),
                ("f", "json"),
            ])
        })
        .await?;

        parse_tigerweb_centroid(&body)
    }
}

#[async_trait]
impl DemographicsProvider for AcsDemographicsProvider {
    fn id(&self) -> &str {
        "census_acs"
    }

    async fn fetch_raw(&self, area_id: &AreaId) -> Result<RawDemographics, DemographicsFetchError> {
        let parts = area_id
            .census_parts()
            .ok_or_else(|| DemographicsFetchError::UnknownArea {
                area_id: area_id.to_string(),
            })?;

        let (figures, centroid) =
            tokio::join!(self.fetch_acs(area_id, parts), self.fetch_centroid(area_id));
        let figures = figures?;
        let centroid = best_effort_centroid(area_id, centroid);

        Ok(RawDemographics {
            median_income: figures.median_income,
            median_home_value: figures.median_home_value,
            population: figures.population,
            homeownership_rate: figures.homeownership_rate(),
            centroid,
        })
    }
}

fn best_effort_centroid(
    area_id: &AreaId,
    result: Result<Option<Coordinate>, DemographicsFetchError>,
) -> Option<Coordinate> {
    match result {
        Ok(centroid) => centroid,
        Err(e) => {
            log::warn!("{area_id}: TIGERweb centroid unavailable: {e}");
            None
        }
    }
}

/// One ACS row, sentinels already mapped to `None`.
#[derive(Debug, Clone, Default, PartialEq)]
struct AcsFigures {
    median_income: Option<f64>,
    median_home_value: Option<f64>,
    population: Option<i64>,
    occupied_units: Option<f64>,
    owner_occupied_units: Option<f64>,
}

impl AcsFigures {
    fn homeownership_rate(&self) -> Option<f64> {
        let occupied = self.occupied_units?;
        let owners = self.owner_occupied_units?;
        (occupied > 0.0).then(|| owners / occupied)
    }
}

/// Parses the ACS array-of-arrays response:
///
/// ```text
/// [["B19013_001E","B25077_001E","B01003_001E","B25003_001E","B25003_002E","state","county","tract"],
///  ["105250","612300","4213","1850","1020","11","001","006202"]]
/// ```
///
/// Columns are located by header name, not position.
fn parse_acs_table(area_id: &AreaId, table: &serde_json::Value) -> Result<AcsFigures, DemographicsFetchError> {
    let rows = table
        .as_array()
        .ok_or_else(|| DemographicsFetchError::Malformed {
            message: "ACS response is not an array".to_string(),
        })?;

    let header = rows
        .first()
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| DemographicsFetchError::Malformed {
            message: "ACS response has no header row".to_string(),
        })?;

    let Some(row) = rows.get(1).and_then(serde_json::Value::as_array) else {
        return Err(DemographicsFetchError::UnknownArea {
            area_id: area_id.to_string(),
        });
    };

    let column = |name: &str| -> Option<f64> {
        let idx = header.iter().position(|h| h.as_str() == Some(name))?;
        row.get(idx).and_then(acs_number)
    };

    #[allow(clippy::cast_possible_truncation)]
    let population = column(TOTAL_POPULATION).map(|p| p.round() as i64);

    Ok(AcsFigures {
        median_income: column(MEDIAN_INCOME),
        median_home_value: column(MEDIAN_HOME_VALUE),
        population,
        occupied_units: column(OCCUPIED_UNITS),
        owner_occupied_units: column(OWNER_OCCUPIED_UNITS),
    })
}

/// Reads an ACS cell, which may be a string, a number, or null.
fn acs_number(cell: &serde_json::Value) -> Option<f64> {
    let value = match cell {
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        serde_json::Value::Number(n) => n.as_f64()?,
        _ => return None,
    };
    (value > ACS_SENTINEL_CEILING).then_some(value)
}

/// Parses a `TIGERweb` query response for the tract's internal point.
///
/// ```text
/// {"features": [{"attributes": {"GEOID": "11001006202", "CENTLAT": "+38.8895", "CENTLON": "-077.0298"}}]}
/// ```
fn parse_tigerweb_centroid(body: &serde_json::Value) -> Result<Option<Coordinate>, DemographicsFetchError> {
    if let Some(error) = body.get("error") {
        let code = error
            .get("code")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(0);
        let msg = error
            .get("message")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown");
        return Err(DemographicsFetchError::Malformed {
            message: format!("ArcGIS error {code}: {msg}"),
        });
    }

    let features = body
        .get("features")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| DemographicsFetchError::Malformed {
            message: "TIGERweb response missing 'features' array".to_string(),
        })?;

    let Some(attributes) = features.first().and_then(|f| f.get("attributes")) else {
        return Ok(None);
    };

    let lat = attributes.get("CENTLAT").and_then(acs_number);
    let lon = attributes.get("CENTLON").and_then(acs_number);

    Ok(match (lat, lon) {
        (Some(lat), Some(lon)) => Some(Coordinate::new(lat, lon)),
        _ => None,
    })
}
