#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Coordinate to census tract resolution.
//!
//! A [`GeocodingProvider`] answers "which tract contains this point?"
//! against some external service; [`census`] implements it with the US
//! Census Bureau geocoder. [`GeoResolver`] wraps a provider with input
//! validation, a bounded timeout, and a non-expiring memo of every
//! answer, since tract boundaries do not move.

pub mod census;

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use canvass_area_models::{AreaId, Coordinate};
use canvass_source::SourceError;
use thiserror::Error;

/// Errors from resolving a coordinate to a tract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeoResolutionError {
    /// Latitude/longitude is non-finite or out of range.
    #[error("Invalid coordinate: {message}")]
    InvalidCoordinate {
        /// The rejected coordinate, formatted.
        message: String,
    },

    /// The point is not inside any supported (US) tract.
    #[error("Coordinate is outside supported coverage")]
    OutsideCoverage,

    /// The provider could not be reached.
    #[error("Geocoding provider unreachable: {message}")]
    Unreachable {
        /// Underlying transport error.
        message: String,
    },

    /// The provider answered with something unusable.
    #[error("Malformed geocoding response: {message}")]
    Malformed {
        /// Description of the parsing failure.
        message: String,
    },

    /// The call did not finish within the configured timeout.
    #[error("Geocoding timed out after {0:?}")]
    Timeout(Duration),
}

impl From<SourceError> for GeoResolutionError {
    fn from(e: SourceError) -> Self {
        if e.is_unreachable() {
            Self::Unreachable {
                message: e.to_string(),
            }
        } else {
            Self::Malformed {
                message: e.to_string(),
            }
        }
    }
}

/// An external service that maps a point to a tract identifier.
#[async_trait]
pub trait GeocodingProvider: Send + Sync {
    /// Short identifier used in logs (e.g., `"census_geocoder"`).
    fn id(&self) -> &str;

    /// Returns the tract containing `coordinate`, or `None` if the
    /// provider has no tract for it.
    ///
    /// # Errors
    ///
    /// Returns [`GeoResolutionError`] if the provider is unreachable or
    /// its response cannot be parsed.
    async fn tract_for(&self, coordinate: Coordinate) -> Result<Option<AreaId>, GeoResolutionError>;
}

/// Validating, memoizing front for a [`GeocodingProvider`].
///
/// Answers (including "outside coverage") are remembered for the life of
/// the resolver. Transport failures are not remembered.
pub struct GeoResolver {
    provider: Arc<dyn GeocodingProvider>,
    timeout: Duration,
    memo: RwLock<BTreeMap<(u64, u64), Option<AreaId>>>,
}

impl GeoResolver {
    #[must_use]
    pub fn new(provider: Arc<dyn GeocodingProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            memo: RwLock::new(BTreeMap::new()),
        }
    }

    /// Resolves a coordinate to its tract.
    ///
    /// # Errors
    ///
    /// Returns [`GeoResolutionError::InvalidCoordinate`] for out-of-range
    /// input, [`GeoResolutionError::OutsideCoverage`] when no tract
    /// contains the point, [`GeoResolutionError::Timeout`] if the provider
    /// does not answer in time, or the provider's own error.
    pub async fn resolve(&self, coordinate: Coordinate) -> Result<AreaId, GeoResolutionError> {
        if !coordinate.is_valid() {
            return Err(GeoResolutionError::InvalidCoordinate {
                message: format!("({}, {})", coordinate.latitude, coordinate.longitude),
            });
        }

        let key = coordinate.bits();
        let memoized = self
            .memo
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        if let Some(answer) = memoized {
            return answer.ok_or(GeoResolutionError::OutsideCoverage);
        }

        let answer = tokio::time::timeout(self.timeout, self.provider.tract_for(coordinate))
            .await
            .map_err(|_| GeoResolutionError::Timeout(self.timeout))??;

        log::debug!(
            "{}: ({}, {}) -> {}",
            self.provider.id(),
            coordinate.latitude,
            coordinate.longitude,
            answer.as_ref().map_or("no tract", AreaId::as_str)
        );

        self.memo
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, answer.clone());

        answer.ok_or(GeoResolutionError::OutsideCoverage)
    }

    /// Number of coordinates with a remembered answer.
    #[must_use]
    pub fn memoized_len(&self) -> usize {
        self.memo.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Puts everything east of -100° in one tract and everything else
    /// outside coverage.
    struct SplitProvider {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl SplitProvider {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
            })
        }
    }

    #[async_trait]
    impl GeocodingProvider for SplitProvider {
        fn id(&self) -> &str {
            "split"
        }

        async fn tract_for(
            &self,
            coordinate: Coordinate,
        ) -> Result<Option<AreaId>, GeoResolutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok((coordinate.longitude > -100.0).then(|| AreaId::new("11001006202")))
        }
    }

    #[tokio::test]
    async fn memoizes_identical_coordinates() {
        let provider = SplitProvider::new(Duration::ZERO);
        let resolver = GeoResolver::new(provider.clone(), Duration::from_secs(1));
        let point = Coordinate::new(38.89, -77.03);

        for _ in 0..3 {
            assert_eq!(
                resolver.resolve(point).await.unwrap(),
                AreaId::new("11001006202")
            );
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.memoized_len(), 1);
    }

    #[tokio::test]
    async fn remembers_outside_coverage() {
        let provider = SplitProvider::new(Duration::ZERO);
        let resolver = GeoResolver::new(provider.clone(), Duration::from_secs(1));
        let west = Coordinate::new(45.0, -120.0);

        assert_eq!(
            resolver.resolve(west).await,
            Err(GeoResolutionError::OutsideCoverage)
        );
        assert_eq!(
            resolver.resolve(west).await,
            Err(GeoResolutionError::OutsideCoverage)
        );
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejects_invalid_coordinates_without_calling_provider() {
        let provider = SplitProvider::new(Duration::ZERO);
        let resolver = GeoResolver::new(provider.clone(), Duration::from_secs(1));

        let result = resolver.resolve(Coordinate::new(91.0, 0.0)).await;
        assert!(matches!(
            result,
            Err(GeoResolutionError::InvalidCoordinate { .. })
        ));
        let result = resolver.resolve(Coordinate::new(f64::NAN, 0.0)).await;
        assert!(matches!(
            result,
            Err(GeoResolutionError::InvalidCoordinate { .. })
        ));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn times_out_slow_provider_and_does_not_memoize() {
        let provider = SplitProvider::new(Duration::from_millis(200));
        let resolver = GeoResolver::new(provider, Duration::from_millis(20));

        let result = resolver.resolve(Coordinate::new(38.89, -77.03)).await;
        assert!(matches!(result, Err(GeoResolutionError::Timeout(_))));
        assert_eq!(resolver.memoized_len(), 0);
    }

    #[test]
    fn classifies_source_errors() {
        let unreachable: GeoResolutionError = SourceError::Status { status: 503 }.into();
        assert!(matches!(unreachable, GeoResolutionError::Unreachable { .. }));

        let malformed: GeoResolutionError = SourceError::Decode {
            message: "truncated".to_string(),
        }
        .into();
        assert!(matches!(malformed, GeoResolutionError::Malformed { .. }));
    }
}
