//! US Census Bureau geocoder client for tract lookup.
//!
//! Uses the free `geographies/coordinates` endpoint, which returns every
//! geography layer containing a point. No API key required.
//!
//! - `GET /geographies/coordinates?x={lon}&y={lat}&benchmark=..&vintage=..&layers=..&format=json`
//!
//! See <https://geocoding.geo.census.gov/geocoder/Geocoding_Services_API.html>

use async_trait::async_trait;
use canvass_area_models::{AreaId, Coordinate};
use canvass_source::retry::{self, RetryPolicy};
use canvass_source::service_registry::{ProviderConfig, ProviderService};

use crate::{GeoResolutionError, GeocodingProvider};

/// [`GeocodingProvider`] backed by the Census Bureau geocoder.
pub struct CensusTractGeocoder {
    client: reqwest::Client,
    base_url: String,
    benchmark: String,
    vintage: String,
    layer: String,
    retry: RetryPolicy,
}

impl CensusTractGeocoder {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        benchmark: impl Into<String>,
        vintage: impl Into<String>,
        layer: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            benchmark: benchmark.into(),
            vintage: vintage.into(),
            layer: layer.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Builds a geocoder from a `census_geocoder` service entry.
    ///
    /// Returns `None` if the service is configured for a different
    /// provider type.
    #[must_use]
    pub fn from_service(client: reqwest::Client, service: &ProviderService) -> Option<Self> {
        let ProviderConfig::CensusGeocoder {
            base_url,
            benchmark,
            vintage,
            layer,
        } = &service.provider
        else {
            return None;
        };
        Some(Self::new(
            client,
            base_url.as_str(),
            benchmark.as_str(),
            vintage.as_str(),
            layer.as_str(),
        ))
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl GeocodingProvider for CensusTractGeocoder {
    fn id(&self) -> &str {
        "census_geocoder"
    }

    async fn tract_for(&self, coordinate: Coordinate) -> Result<Option<AreaId>, GeoResolutionError> {
        let url = format!("{}/geographies/coordinates", self.base_url);
        let x = coordinate.longitude.to_string();
        let y = coordinate.latitude.to_string();

        let body = retry::send_json(&self.retry, || {
            self.client.get(&url).query(&[
                ("x", x.as_str()),
                ("y", y.as_str()),
                ("benchmark", self.benchmark.as_str()),
                ("vintage", self.vintage.as_str()),
                ("layers", self.layer.as_str()),
                ("format", "json"),
            ])
        })
        .await?;

        parse_coordinates_response(&body, &self.layer)
    }
}

/// Parses the JSON response from the `geographies/coordinates` endpoint.
///
/// ```text
/// {"result": {"geographies": {"Census Tracts": [{"GEOID": "11001006202", ...}]}}}
/// ```
///
/// An empty layer array means the point is outside Census coverage.
fn parse_coordinates_response(
    body: &serde_json::Value,
    layer: &str,
) -> Result<Option<AreaId>, GeoResolutionError> {
    if let Some(errors) = body.get("errors").and_then(serde_json::Value::as_array) {
        let message = errors
            .iter()
            .filter_map(serde_json::Value::as_str)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(GeoResolutionError::Malformed {
            message: format!("Census geocoder reported errors: {message}"),
        });
    }

    let geographies = body
        .pointer("/result/geographies")
        .and_then(serde_json::Value::as_object)
        .ok_or_else(|| GeoResolutionError::Malformed {
            message: "Missing result.geographies object".to_string(),
        })?;

    let Some(tracts) = geographies.get(layer) else {
        // The layer key is omitted entirely for points outside the US.
        return Ok(None);
    };

    let tracts = tracts
        .as_array()
        .ok_or_else(|| GeoResolutionError::Malformed {
            message: format!("'{layer}' is not an array"),
        })?;

    let Some(first) = tracts.first() else {
        return Ok(None);
    };

    let geoid = first
        .get("GEOID")
        .and_then(serde_json::Value::as_str)
        .filter(|g| !g.is_empty())
        .ok_or_else(|| GeoResolutionError::Malformed {
            message: "Tract missing GEOID".to_string(),
        })?;

    Ok(Some(AreaId::new(geoid)))
}
