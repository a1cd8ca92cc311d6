#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Tract recommendation orchestrator.
//!
//! [`RecommendationService::recommend`] runs the whole pipeline for one
//! request:
//!
//! 1. Resolve every distinct coordinate to a tract.
//! 2. Get (cached or fresh) demographics for every distinct tract.
//! 3. Aggregate the caller's lead outcomes per tract.
//! 4. Score and rank, then keep the top `limit`.
//!
//! Per-coordinate and per-tract failures are counted and skipped, never
//! fatal. Only invalid preferences abort a request.

pub mod sources;

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use canvass_area_models::{
    AreaId, Coordinate, DemographicSnapshot, LeadLocation, LeadRecord, PerformanceStats, ScoreBreakdown,
    TargetPreferences, ValidationError,
};
use canvass_cache::AreaCache;
use canvass_geocoder::{GeoResolutionError, GeoResolver};
use canvass_scoring::engine::meets_homeownership_preference;
use canvass_source::progress::ProgressCallback;
use futures::stream::{self, StreamExt as _};
use serde::Serialize;
use thiserror::Error;

use crate::sources::{InputError, LeadLocationSource, PreferenceStore};

/// Areas returned when the caller does not pass a limit.
pub const DEFAULT_LIMIT: usize = 10;
/// Outbound calls in flight at once unless configured otherwise.
pub const DEFAULT_CONCURRENCY: usize = 8;
/// Hard ceiling on outbound calls in flight at once.
pub const MAX_CONCURRENCY: usize = 16;

/// Errors that abort a recommendation run.
#[derive(Debug, Error)]
pub enum RecommendError {
    #[error("Invalid preferences: {0}")]
    Validation(#[from] ValidationError),

    #[error("Failed to load input: {0}")]
    Input(#[from] InputError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecommendConfig {
    /// Outbound calls in flight at once, clamped to `1..=16`.
    pub concurrency: usize,
    /// Areas returned when a request passes no limit.
    pub default_limit: usize,
}

impl Default for RecommendConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            default_limit: DEFAULT_LIMIT,
        }
    }
}

impl RecommendConfig {
    #[must_use]
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(1, MAX_CONCURRENCY)
    }
}

/// One scored tract.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedArea {
    pub area_id: AreaId,
    pub snapshot: DemographicSnapshot,
    pub breakdown: ScoreBreakdown,
    pub performance: PerformanceStats,
    /// The snapshot is past its validity window because a refresh failed.
    pub stale: bool,
    /// `None` unless the caller set a homeownership preference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meets_homeownership_preference: Option<bool>,
}

/// Ranked tracts plus what had to be left out.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    /// Best first, at most `limit` entries.
    pub areas: Vec<RankedArea>,
    /// Distinct coordinates that could not be resolved to a tract.
    pub skipped_coordinates: usize,
    /// Tracts with no usable demographics, sorted.
    pub failed_areas: Vec<AreaId>,
    /// Ranked tracts (before the limit) scored from stale demographics.
    pub stale_areas: usize,
}

impl Recommendation {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }
}

/// Coordinates resolved for one request.
struct Resolved {
    by_coordinate: BTreeMap<(u64, u64), AreaId>,
    skipped: usize,
}

/// Ranks census tracts for prospecting.
pub struct RecommendationService {
    resolver: Arc<GeoResolver>,
    cache: Arc<AreaCache>,
    config: RecommendConfig,
}

impl RecommendationService {
    #[must_use]
    pub const fn new(resolver: Arc<GeoResolver>, cache: Arc<AreaCache>, config: RecommendConfig) -> Self {
        Self {
            resolver,
            cache,
            config,
        }
    }

    #[must_use]
    pub const fn cache(&self) -> &Arc<AreaCache> {
        &self.cache
    }

    /// Ranks the tracts containing `coordinates`, using `leads` for the
    /// performance sub-score.
    ///
    /// An empty result is not an error: it means there was nothing to
    /// score.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if `preferences` is invalid. Nothing is
    /// resolved or fetched in that case.
    pub async fn recommend(
        &self,
        coordinates: &[Coordinate],
        leads: &[LeadRecord],
        preferences: &TargetPreferences,
        limit: Option<usize>,
        progress: Option<&Arc<dyn ProgressCallback>>,
    ) -> Result<Recommendation, ValidationError> {
        preferences.validate()?;

        let resolved = self.resolve_all(coordinates, progress).await;
        Ok(self.rank(resolved, leads, preferences, limit, progress).await)
    }

    /// Like [`Self::recommend`], but takes leads with coordinates and
    /// attributes each one to the tract its coordinate resolves to.
    ///
    /// Leads whose coordinate cannot be resolved do not count toward any
    /// tract's performance.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if `preferences` is invalid.
    pub async fn recommend_leads(
        &self,
        leads: &[LeadLocation],
        preferences: &TargetPreferences,
        limit: Option<usize>,
        progress: Option<&Arc<dyn ProgressCallback>>,
    ) -> Result<Recommendation, ValidationError> {
        preferences.validate()?;

        let coordinates: Vec<Coordinate> = leads.iter().map(|l| l.coordinate).collect();
        let resolved = self.resolve_all(&coordinates, progress).await;

        let records: Vec<LeadRecord> = leads
            .iter()
            .filter_map(|lead| {
                resolved
                    .by_coordinate
                    .get(&lead.coordinate.bits())
                    .map(|area_id| LeadRecord {
                        lead_id: lead.lead_id.clone(),
                        area_id: area_id.clone(),
                        status: lead.status,
                    })
            })
            .collect();

        Ok(self.rank(resolved, &records, preferences, limit, progress).await)
    }

    /// Loads leads and preferences from their stores, then runs
    /// [`Self::recommend_leads`].
    ///
    /// # Errors
    ///
    /// Returns [`RecommendError`] if either input cannot be loaded or the
    /// preferences are invalid.
    pub async fn recommend_from(
        &self,
        leads: &dyn LeadLocationSource,
        preferences: &dyn PreferenceStore,
        limit: Option<usize>,
        progress: Option<&Arc<dyn ProgressCallback>>,
    ) -> Result<Recommendation, RecommendError> {
        let preferences = preferences.preferences().await?;
        preferences.validate()?;
        let leads = leads.lead_locations().await?;
        log::info!("Loaded {} leads", leads.len());

        Ok(self
            .recommend_leads(&leads, &preferences, limit, progress)
            .await?)
    }

    async fn resolve_all(
        &self,
        coordinates: &[Coordinate],
        progress: Option<&Arc<dyn ProgressCallback>>,
    ) -> Resolved {
        let mut seen = BTreeSet::new();
        let distinct: Vec<Coordinate> = coordinates
            .iter()
            .copied()
            .filter(|c| seen.insert(c.bits()))
            .collect();

        if let Some(p) = progress {
            p.set_message("Resolving coordinates".to_string());
            p.set_total(distinct.len() as u64);
        }

        let results: Vec<(Coordinate, Result<AreaId, GeoResolutionError>)> =
            stream::iter(distinct.into_iter().map(|coordinate| async move {
                let result = self.resolver.resolve(coordinate).await;
                if let Some(p) = progress {
                    p.inc(1);
                }
                (coordinate, result)
            }))
            .buffer_unordered(self.config.effective_concurrency())
            .collect()
            .await;

        let mut by_coordinate = BTreeMap::new();
        let mut skipped = 0;
        for (coordinate, result) in results {
            match result {
                Ok(area_id) => {
                    by_coordinate.insert(coordinate.bits(), area_id);
                }
                Err(GeoResolutionError::OutsideCoverage | GeoResolutionError::InvalidCoordinate { .. }) => {
                    skipped += 1;
                }
                Err(e) => {
                    log::warn!(
                        "Could not resolve ({}, {}): {e}",
                        coordinate.latitude,
                        coordinate.longitude
                    );
                    skipped += 1;
                }
            }
        }

        if skipped > 0 {
            log::info!("Skipped {skipped} coordinates with no resolvable tract");
        }

        Resolved {
            by_coordinate,
            skipped,
        }
    }

    async fn rank(
        &self,
        resolved: Resolved,
        leads: &[LeadRecord],
        preferences: &TargetPreferences,
        limit: Option<usize>,
        progress: Option<&Arc<dyn ProgressCallback>>,
    ) -> Recommendation {
        let areas: BTreeSet<AreaId> = resolved.by_coordinate.into_values().collect();

        if let Some(p) = progress {
            p.set_message("Fetching demographics".to_string());
            p.set_total(areas.len() as u64);
        }

        let lookups: Vec<_> = stream::iter(areas.into_iter().map(|area_id| async move {
            let result = self.cache.get_or_fetch(&area_id).await;
            if let Some(p) = progress {
                p.inc(1);
            }
            (area_id, result)
        }))
        .buffer_unordered(self.config.effective_concurrency())
        .collect()
        .await;

        let mut performance = canvass_scoring::aggregate_all(leads);
        let mut ranked = Vec::with_capacity(lookups.len());
        let mut failed_areas = Vec::new();

        for (area_id, lookup) in lookups {
            let lookup = match lookup {
                Ok(lookup) => lookup,
                Err(e) => {
                    log::warn!("No demographics for {area_id}: {e}");
                    failed_areas.push(area_id);
                    continue;
                }
            };

            let stats = performance
                .remove(&area_id)
                .unwrap_or_else(|| PerformanceStats::empty(area_id.clone()));
            let breakdown = canvass_scoring::score(&lookup.snapshot, preferences, &stats);

            ranked.push(RankedArea {
                meets_homeownership_preference: meets_homeownership_preference(&lookup.snapshot, preferences),
                stale: lookup.is_stale(),
                area_id,
                snapshot: lookup.snapshot,
                breakdown,
                performance: stats,
            });
        }

        ranked.sort_by(rank_order);
        failed_areas.sort();

        let stale_areas = ranked.iter().filter(|a| a.stale).count();
        ranked.truncate(limit.unwrap_or(self.config.default_limit));

        if let Some(p) = progress {
            p.finish(format!("Ranked {} tracts", ranked.len()));
        }

        if !failed_areas.is_empty() {
            log::warn!("{} tracts had no usable demographics", failed_areas.len());
        }

        Recommendation {
            areas: ranked,
            skipped_coordinates: resolved.skipped,
            failed_areas,
            stale_areas,
        }
    }
}

/// Best first: higher total, then higher performance, then smaller
/// population, then identifier.
fn rank_order(a: &RankedArea, b: &RankedArea) -> Ordering {
    b.breakdown
        .total_score
        .total_cmp(&a.breakdown.total_score)
        .then_with(|| {
            b.breakdown
                .performance_score
                .total_cmp(&a.breakdown.performance_score)
        })
        .then_with(|| a.snapshot.population.cmp(&b.snapshot.population))
        .then_with(|| a.area_id.cmp(&b.area_id))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;

    use async_trait::async_trait;
    use canvass_area_models::{LeadStatus, Tier};
    use canvass_cache::ManualClock;
    use canvass_demographics::{DemographicsFetchError, DemographicsFetcher, DemographicsProvider, RawDemographics};
    use canvass_geocoder::GeocodingProvider;
    use chrono::{TimeDelta, Utc};

    use super::*;

    /// Latitude picks the tract: `38.x` is tract `a`, `39.x` tract `b`,
    /// and so on. Negative latitudes are outside coverage.
    struct LatitudeGeocoder;

    #[async_trait]
    impl GeocodingProvider for LatitudeGeocoder {
        fn id(&self) -> &str {
            "latitude"
        }

        async fn tract_for(&self, coordinate: Coordinate) -> Result<Option<AreaId>, GeoResolutionError> {
            if coordinate.latitude < 0.0 {
                return Ok(None);
            }
            let tract = match coordinate.latitude.floor() as i64 {
                38 => "a",
                39 => "b",
                40 => "c",
                41 => "d",
                _ => "unknown",
            };
            Ok(Some(AreaId::new(tract)))
        }
    }

    struct TableProvider {
        rows: BTreeMap<&'static str, RawDemographics>,
        calls: AtomicUsize,
        failing: AtomicBool,
    }

    #[async_trait]
    impl DemographicsProvider for TableProvider {
        fn id(&self) -> &str {
            "table"
        }

        async fn fetch_raw(&self, area_id: &AreaId) -> Result<RawDemographics, DemographicsFetchError> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            if self.failing.load(AtomicOrdering::SeqCst) {
                return Err(DemographicsFetchError::Unreachable {
                    message: "connection refused".to_string(),
                });
            }
            self.rows
                .get(area_id.as_str())
                .cloned()
                .ok_or_else(|| DemographicsFetchError::UnknownArea {
                    area_id: area_id.to_string(),
                })
        }
    }

    fn raw(income: f64, population: i64, home_value: f64) -> RawDemographics {
        RawDemographics {
            median_income: Some(income),
            median_home_value: Some(home_value),
            population: Some(population),
            homeownership_rate: Some(0.65),
            centroid: Some(Coordinate::new(38.9, -77.0)),
        }
    }

    fn service() -> (RecommendationService, Arc<TableProvider>) {
        let (service, provider, _) = service_with_clock();
        (service, provider)
    }

    fn service_with_clock() -> (RecommendationService, Arc<TableProvider>, Arc<ManualClock>) {
        let provider = Arc::new(TableProvider {
            rows: BTreeMap::from([
                // Worked example area A.
                ("a", raw(120_000.0, 5_000, 350_000.0)),
                // Worked example area B.
                ("b", raw(75_000.0, 15_000, 180_000.0)),
                // Scores exactly like a, with a larger population.
                ("c", raw(120_000.0, 6_000, 350_000.0)),
            ]),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        });
        let resolver = Arc::new(GeoResolver::new(Arc::new(LatitudeGeocoder), Duration::from_secs(1)));
        let fetcher = Arc::new(DemographicsFetcher::new(provider.clone(), Duration::from_secs(1)));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = Arc::new(AreaCache::new(fetcher, clock.clone()));
        (
            RecommendationService::new(resolver, cache, RecommendConfig::default()),
            provider,
            clock,
        )
    }

    fn preferences() -> TargetPreferences {
        TargetPreferences::new(100_000.0, 150_000.0, 250_000.0, 500_000.0)
    }

    fn leads() -> Vec<LeadLocation> {
        let mut leads = Vec::new();
        for i in 0..20 {
            leads.push(LeadLocation {
                lead_id: format!("a{i}"),
                coordinate: Coordinate::new(38.5, -77.0 + f64::from(i) * 0.001),
                status: if i < 3 {
                    LeadStatus::Converted
                } else {
                    LeadStatus::NotHome
                },
            });
        }
        leads.push(LeadLocation {
            lead_id: "b0".to_string(),
            coordinate: Coordinate::new(39.5, -77.0),
            status: LeadStatus::Interested,
        });
        leads.push(LeadLocation {
            lead_id: "b1".to_string(),
            coordinate: Coordinate::new(39.5, -77.0),
            status: LeadStatus::NotInterested,
        });
        leads
    }

    #[tokio::test]
    async fn ranks_worked_example() {
        let (service, _) = service();
        let coordinates = [Coordinate::new(38.5, -77.0), Coordinate::new(39.5, -77.0)];
        let result = service
            .recommend(&coordinates, &[], &preferences(), None, None)
            .await
            .unwrap();

        let ids: Vec<&str> = result.areas.iter().map(|a| a.area_id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        // No leads anywhere, so both get the neutral performance score.
        assert!((result.areas[0].breakdown.total_score - 87.5).abs() < 1e-6);
        assert_eq!(result.areas[0].breakdown.tier, Tier::Good);
        assert!((result.areas[1].breakdown.total_score - 56.75).abs() < 1e-6);
        assert_eq!(result.areas[1].breakdown.tier, Tier::Fair);
        assert_eq!(result.skipped_coordinates, 0);
    }

    #[tokio::test]
    async fn lead_outcomes_feed_performance() {
        let (service, provider) = service();
        let result = service
            .recommend_leads(&leads(), &preferences(), None, None)
            .await
            .unwrap();

        let a = &result.areas[0];
        assert_eq!(a.area_id, AreaId::new("a"));
        assert_eq!(a.performance.total_leads, 20);
        assert_eq!(a.performance.converted_leads, 3);
        assert!((a.breakdown.total_score - 92.5).abs() <= 0.5);
        assert_eq!(a.breakdown.tier, Tier::Excellent);

        let b = &result.areas[1];
        assert_eq!(b.performance.total_leads, 2);
        assert_eq!(b.performance.interested_leads, 1);
        assert!(b.breakdown.performance_score.abs() < f64::EPSILON);

        // 21 distinct coordinates, 2 tracts, 2 fetches.
        assert_eq!(provider.calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn repeated_run_is_identical() {
        let (service, provider) = service();
        let coordinates = [
            Coordinate::new(40.5, -77.0),
            Coordinate::new(39.5, -77.0),
            Coordinate::new(38.5, -77.0),
        ];

        let first = service
            .recommend(&coordinates, &[], &preferences(), None, None)
            .await
            .unwrap();
        let second = service
            .recommend(&coordinates, &[], &preferences(), None, None)
            .await
            .unwrap();

        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(provider.calls.load(AtomicOrdering::SeqCst), 3);

        // a and c tie on every score; the smaller tract wins.
        let ids: Vec<&str> = first.areas.iter().map(|a| a.area_id.as_str()).collect();
        assert_eq!(ids, ["a", "c", "b"]);
        assert_eq!(first.areas[0].breakdown, first.areas[1].breakdown);
    }

    #[tokio::test]
    async fn empty_input_is_empty_result() {
        let (service, provider) = service();
        let result = service
            .recommend(&[], &[], &preferences(), None, None)
            .await
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(result, Recommendation::default());
        assert_eq!(provider.calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_preferences_abort_before_any_fetch() {
        let (service, provider) = service();
        let inverted = TargetPreferences::new(150_000.0, 100_000.0, 250_000.0, 500_000.0);
        let result = service
            .recommend(&[Coordinate::new(38.5, -77.0)], &[], &inverted, None, None)
            .await;
        assert!(matches!(result, Err(ValidationError::InvertedRange { .. })));
        assert_eq!(provider.calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failures_are_counted_not_fatal() {
        let (service, _) = service();
        let coordinates = [
            Coordinate::new(38.5, -77.0),
            // Tract d has no demographics.
            Coordinate::new(41.5, -77.0),
            // Outside coverage.
            Coordinate::new(-33.9, 151.2),
            // Invalid.
            Coordinate::new(95.0, 0.0),
            // Duplicate of the first; counted once.
            Coordinate::new(38.5, -77.0),
        ];
        let result = service
            .recommend(&coordinates, &[], &preferences(), None, None)
            .await
            .unwrap();

        assert_eq!(result.areas.len(), 1);
        assert_eq!(result.areas[0].area_id, AreaId::new("a"));
        assert_eq!(result.skipped_coordinates, 2);
        assert_eq!(result.failed_areas, vec![AreaId::new("d")]);
        assert_eq!(result.stale_areas, 0);
    }

    #[tokio::test]
    async fn expired_snapshot_is_served_and_flagged_when_refresh_fails() {
        let (service, provider, clock) = service_with_clock();
        let coordinates = [Coordinate::new(38.5, -77.0), Coordinate::new(39.5, -77.0)];

        let fresh = service
            .recommend(&coordinates, &[], &preferences(), None, None)
            .await
            .unwrap();
        assert_eq!(fresh.stale_areas, 0);
        assert!(fresh.areas.iter().all(|a| !a.stale));

        provider.failing.store(true, AtomicOrdering::SeqCst);
        clock.advance(TimeDelta::days(31));

        let result = service
            .recommend(&coordinates, &[], &preferences(), None, None)
            .await
            .unwrap();

        assert_eq!(result.areas.len(), 2);
        assert!(result.areas[0].stale);
        assert!(result.areas[1].stale);
        assert_eq!(result.stale_areas, 2);
        assert!(result.failed_areas.is_empty());
        assert_eq!(result.areas[0].snapshot, fresh.areas[0].snapshot);
        assert_eq!(provider.calls.load(AtomicOrdering::SeqCst), 4);

        let top = service
            .recommend(&coordinates, &[], &preferences(), Some(1), None)
            .await
            .unwrap();
        assert_eq!(top.areas.len(), 1);
        assert!(top.areas[0].stale);
        assert_eq!(top.stale_areas, 2);
    }

    #[tokio::test]
    async fn limit_truncates_after_sorting() {
        let (service, _) = service();
        let coordinates = [
            Coordinate::new(39.5, -77.0),
            Coordinate::new(40.5, -77.0),
            Coordinate::new(38.5, -77.0),
        ];
        let top = service
            .recommend(&coordinates, &[], &preferences(), Some(1), None)
            .await
            .unwrap();
        assert_eq!(top.areas.len(), 1);
        assert_eq!(top.areas[0].area_id, AreaId::new("a"));

        let none = service
            .recommend(&coordinates, &[], &preferences(), Some(0), None)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn reports_homeownership_preference() {
        let (service, _) = service();
        let prefs = preferences().with_homeownership_preference(0.7);
        let result = service
            .recommend(&[Coordinate::new(38.5, -77.0)], &[], &prefs, None, None)
            .await
            .unwrap();
        assert_eq!(result.areas[0].meets_homeownership_preference, Some(false));
    }

    #[tokio::test]
    async fn loads_inputs_from_stores() {
        let (service, _) = service();
        let result = service
            .recommend_from(&leads(), &preferences(), Some(1), None)
            .await
            .unwrap();
        assert_eq!(result.areas.len(), 1);
        assert_eq!(result.areas[0].performance.total_leads, 20);
    }

    #[test]
    fn concurrency_is_clamped() {
        let config = RecommendConfig {
            concurrency: 0,
            default_limit: DEFAULT_LIMIT,
        };
        assert_eq!(config.effective_concurrency(), 1);
        let config = RecommendConfig {
            concurrency: 64,
            default_limit: DEFAULT_LIMIT,
        };
        assert_eq!(config.effective_concurrency(), MAX_CONCURRENCY);
        assert_eq!(RecommendConfig::default().effective_concurrency(), DEFAULT_CONCURRENCY);
    }
}
