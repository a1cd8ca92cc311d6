#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Census tract demographic fetching.
//!
//! A [`DemographicsProvider`] returns whatever raw figures an external
//! service has for a tract; [`acs`] implements it with the Census
//! Bureau's American Community Survey and `TIGERweb`. The
//! [`DemographicsFetcher`] turns raw figures into a validated
//! [`DemographicSnapshot`] under a bounded timeout. It holds no state:
//! caching belongs to `canvass_cache`.

pub mod acs;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use canvass_area_models::{AreaId, Coordinate, DemographicSnapshot, NEUTRAL_HOMEOWNERSHIP_RATE};
use canvass_source::SourceError;
use chrono::Utc;
use thiserror::Error;

/// Errors from fetching a tract's demographics.
///
/// `Clone` so one failed fetch can be reported to every caller that was
/// waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DemographicsFetchError {
    /// The provider could not be reached.
    #[error("Demographics provider unreachable: {message}")]
    Unreachable {
        /// Underlying transport error.
        message: String,
    },

    /// The provider answered with a non-success status.
    #[error("Demographics provider returned HTTP {status}")]
    Status {
        /// Status code returned by the provider.
        status: u16,
    },

    /// The provider has no data for this identifier.
    #[error("No demographic data for area {area_id}")]
    UnknownArea {
        /// The identifier that was looked up.
        area_id: String,
    },

    /// A required field was absent.
    #[error("Demographics response missing required field '{field}'")]
    MissingField {
        /// Name of the absent field.
        field: &'static str,
    },

    /// The response could not be parsed or held an impossible value.
    #[error("Malformed demographics response: {message}")]
    Malformed {
        /// Description of the parsing failure.
        message: String,
    },

    /// The call did not finish within the configured timeout.
    #[error("Demographics fetch timed out after {0:?}")]
    Timeout(Duration),
}

impl From<SourceError> for DemographicsFetchError {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::Status { status } if status < 500 && status != 429 => {
                Self::Status { status }
            }
            e if e.is_unreachable() => Self::Unreachable {
                message: e.to_string(),
            },
            e => Self::Malformed {
                message: e.to_string(),
            },
        }
    }
}

/// Figures as reported by a provider, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDemographics {
    pub median_income: Option<f64>,
    pub median_home_value: Option<f64>,
    pub population: Option<i64>,
    pub homeownership_rate: Option<f64>,
    pub centroid: Option<Coordinate>,
}

/// An external service that reports demographics for a tract.
#[async_trait]
pub trait DemographicsProvider: Send + Sync {
    /// Short identifier used in logs (e.g., `"census_acs"`).
    fn id(&self) -> &str;

    /// Fetches raw figures for one tract.
    ///
    /// # Errors
    ///
    /// Returns [`DemographicsFetchError`] if the provider is unreachable,
    /// answers with an error status, or returns an unparseable body.
    async fn fetch_raw(&self, area_id: &AreaId) -> Result<RawDemographics, DemographicsFetchError>;
}

/// Turns a provider's raw figures into validated snapshots.
pub struct DemographicsFetcher {
    provider: Arc<dyn DemographicsProvider>,
    timeout: Duration,
}

impl DemographicsFetcher {
    #[must_use]
    pub fn new(provider: Arc<dyn DemographicsProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    #[must_use]
    pub fn provider_id(&self) -> &str {
        self.provider.id()
    }

    /// Fetches and validates a snapshot for `area_id`, stamped with the
    /// current time.
    ///
    /// # Errors
    ///
    /// Returns [`DemographicsFetchError::Timeout`] if the provider does not
    /// answer in time, [`DemographicsFetchError::MissingField`] if income,
    /// home value, or population is absent,
    /// [`DemographicsFetchError::Malformed`] for negative or out-of-range
    /// values, or the provider's own error.
    pub async fn fetch(&self, area_id: &AreaId) -> Result<DemographicSnapshot, DemographicsFetchError> {
        let raw = tokio::time::timeout(self.timeout, self.provider.fetch_raw(area_id))
            .await
            .map_err(|_| DemographicsFetchError::Timeout(self.timeout))??;

        let snapshot = validate(area_id, raw)?;
        log::debug!(
            "{}: fetched {area_id} (income={}, home_value={}, population={})",
            self.provider.id(),
            snapshot.median_income,
            snapshot.median_home_value,
            snapshot.population
        );
        Ok(snapshot)
    }
}

fn validate(area_id: &AreaId, raw: RawDemographics) -> Result<DemographicSnapshot, DemographicsFetchError> {
    let median_income = non_negative("median_income", raw.median_income)?;
    let median_home_value = non_negative("median_home_value", raw.median_home_value)?;

    let population = raw
        .population
        .ok_or(DemographicsFetchError::MissingField { field: "population" })?;
    let population = u64::try_from(population).map_err(|_| DemographicsFetchError::Malformed {
        message: format!("population is negative: {population}"),
    })?;

    let homeownership_rate = match raw.homeownership_rate {
        None => NEUTRAL_HOMEOWNERSHIP_RATE,
        Some(rate) if rate.is_finite() && (0.0..=1.0).contains(&rate) => rate,
        Some(rate) => {
            return Err(DemographicsFetchError::Malformed {
                message: format!("homeownership_rate {rate} is outside [0, 1]"),
            });
        }
    };

    let centroid = raw.centroid.filter(|c| {
        if !c.is_valid() {
            log::warn!(
                "{area_id}: dropping invalid centroid ({}, {})",
                c.latitude,
                c.longitude
            );
        }
        c.is_valid()
    });

    Ok(DemographicSnapshot {
        area_id: area_id.clone(),
        median_income,
        median_home_value,
        population,
        homeownership_rate,
        centroid,
        fetched_at: Utc::now(),
    })
}

fn non_negative(field: &'static str, value: Option<f64>) -> Result<f64, DemographicsFetchError> {
    let value = value.ok_or(DemographicsFetchError::MissingField { field })?;
    if !value.is_finite() || value < 0.0 {
        return Err(DemographicsFetchError::Malformed {
            message: format!("{field} must be a non-negative number, got {value}"),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> RawDemographics {
        RawDemographics {
            median_income: Some(120_000.0),
            median_home_value: Some(350_000.0),
            population: Some(5_000),
            homeownership_rate: Some(0.62),
            centroid: Some(Coordinate::new(38.89, -77.03)),
        }
    }

    struct FixedProvider {
        raw: RawDemographics,
        delay: Duration,
    }

    #[async_trait]
    impl DemographicsProvider for FixedProvider {
        fn id(&self) -> &str {
            "fixed"
        }

        async fn fetch_raw(
            &self,
            _area_id: &AreaId,
        ) -> Result<RawDemographics, DemographicsFetchError> {
            tokio::time::sleep(self.delay).await;
            Ok(self.raw.clone())
        }
    }

    #[test]
    fn validates_complete_response() {
        let snap = validate(&AreaId::new("11001006202"), complete()).unwrap();
        assert_eq!(snap.population, 5_000);
        assert!((snap.homeownership_rate - 0.62).abs() < f64::EPSILON);
    }

    #[test]
    fn defaults_missing_homeownership_to_neutral() {
        let raw = RawDemographics {
            homeownership_rate: None,
            ..complete()
        };
        let snap = validate(&AreaId::new("a"), raw).unwrap();
        assert!((snap.homeownership_rate - NEUTRAL_HOMEOWNERSHIP_RATE).abs() < f64::EPSILON);
    }

    #[test]
    fn centroid_is_optional() {
        let raw = RawDemographics {
            homeownership_rate: None,
            centroid: None,
            ..complete()
        };
        let snap = validate(&AreaId::new("11001006202"), raw).unwrap();
        assert_eq!(snap.centroid, None);
        assert!((snap.median_income - 120_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn invalid_centroid_is_dropped() {
        let raw = RawDemographics {
            centroid: Some(Coordinate::new(123.0, -77.03)),
            ..complete()
        };
        let snap = validate(&AreaId::new("11001006202"), raw).unwrap();
        assert_eq!(snap.centroid, None);
    }

    #[test]
    fn rejects_missing_required_fields() {
        let cases = [
            (
                RawDemographics {
                    median_income: None,
                    ..complete()
                },
                "median_income",
            ),
            (
                RawDemographics {
                    median_home_value: None,
                    ..complete()
                },
                "median_home_value",
            ),
            (
                RawDemographics {
                    population: None,
                    ..complete()
                },
                "population",
            ),
        ];
        for (raw, expected) in cases {
            assert_eq!(
                validate(&AreaId::new("a"), raw),
                Err(DemographicsFetchError::MissingField { field: expected })
            );
        }
    }

    #[test]
    fn rejects_negative_values() {
        let raw = RawDemographics {
            median_income: Some(-1.0),
            ..complete()
        };
        assert!(matches!(
            validate(&AreaId::new("a"), raw),
            Err(DemographicsFetchError::Malformed { .. })
        ));

        let raw = RawDemographics {
            population: Some(-5),
            ..complete()
        };
        assert!(matches!(
            validate(&AreaId::new("a"), raw),
            Err(DemographicsFetchError::Malformed { .. })
        ));
    }

    #[test]
    fn rejects_out_of_range_homeownership() {
        let raw = RawDemographics {
            homeownership_rate: Some(1.2),
            ..complete()
        };
        assert!(validate(&AreaId::new("a"), raw).is_err());
    }

    #[test]
    fn maps_source_errors() {
        assert_eq!(
            DemographicsFetchError::from(SourceError::Status { status: 404 }),
            DemographicsFetchError::Status { status: 404 }
        );
        assert!(matches!(
            DemographicsFetchError::from(SourceError::Status { status: 503 }),
            DemographicsFetchError::Unreachable { .. }
        ));
        assert!(matches!(
            DemographicsFetchError::from(SourceError::Decode {
                message: "x".to_string()
            }),
            DemographicsFetchError::Malformed { .. }
        ));
    }

    #[tokio::test]
    async fn fetcher_stamps_and_validates() {
        let fetcher = DemographicsFetcher::new(
            Arc::new(FixedProvider {
                raw: complete(),
                delay: Duration::ZERO,
            }),
            Duration::from_secs(1),
        );
        let before = Utc::now();
        let snap = fetcher.fetch(&AreaId::new("11001006202")).await.unwrap();
        assert_eq!(snap.area_id, AreaId::new("11001006202"));
        assert!(snap.fetched_at >= before);
        assert_eq!(fetcher.provider_id(), "fixed");
    }

    #[tokio::test]
    async fn fetcher_times_out() {
        let fetcher = DemographicsFetcher::new(
            Arc::new(FixedProvider {
                raw: complete(),
                delay: Duration::from_millis(200),
            }),
            Duration::from_millis(20),
        );
        assert_eq!(
            fetcher.fetch(&AreaId::new("a")).await,
            Err(DemographicsFetchError::Timeout(Duration::from_millis(20)))
        );
    }
}
