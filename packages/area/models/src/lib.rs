#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Census tract, demographic snapshot, preference, and score types.
//!
//! These types flow one way through the prospecting pipeline:
//! coordinates resolve to [`AreaId`]s, area ids key cached
//! [`DemographicSnapshot`]s and per-area [`PerformanceStats`], and the
//! two are combined only at scoring time into a [`ScoreBreakdown`].

pub mod preferences;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use preferences::{TargetPreferences, ValidationError};

/// Number of days a fetched snapshot stays valid.
pub const SNAPSHOT_VALIDITY_DAYS: i64 = 30;

/// Homeownership rate assumed when the provider does not report one.
pub const NEUTRAL_HOMEOWNERSHIP_RATE: f64 = 0.5;

/// A WGS84 point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinate {
    /// Latitude in degrees, `[-90, 90]`.
    pub latitude: f64,
    /// Longitude in degrees, `[-180, 180]`.
    pub longitude: f64,
}

impl Coordinate {
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Returns `true` if both components are finite and inside their
    /// degree ranges.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Exact bit-level key for memoizing lookups of identical coordinates.
    #[must_use]
    pub const fn bits(&self) -> (u64, u64) {
        (self.latitude.to_bits(), self.longitude.to_bits())
    }
}

/// Stable identifier for a census tract.
///
/// For Census Bureau data this is the 11-digit GEOID (state FIPS +
/// county FIPS + tract code, e.g. `"11001006202"`), but the pipeline
/// treats it as opaque apart from [`AreaId::census_parts`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AreaId(String);

impl AreaId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits an 11-digit tract GEOID into `(state, county, tract)`.
    ///
    /// Returns `None` if the identifier is not an 11-digit numeric GEOID.
    #[must_use]
    pub fn census_parts(&self) -> Option<(&str, &str, &str)> {
        let id = self.0.as_str();
        if id.len() != 11 || !id.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some((&id[..2], &id[2..5], &id[5..]))
    }
}

impl std::fmt::Display for AreaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AreaId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// One fetched-and-timestamped set of demographic attributes for a tract.
///
/// Immutable once created; a refresh builds a new snapshot that replaces
/// the previous one wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DemographicSnapshot {
    /// The tract this snapshot describes.
    pub area_id: AreaId,
    /// Median household income in dollars.
    pub median_income: f64,
    /// Median owner-occupied home value in dollars.
    pub median_home_value: f64,
    /// Total resident population.
    pub population: u64,
    /// Owner-occupied share of occupied housing units, `[0, 1]`.
    pub homeownership_rate: f64,
    /// Tract centroid, when the boundary service reported one. Scoring
    /// never reads it.
    pub centroid: Option<Coordinate>,
    /// When the data was fetched from the provider.
    pub fetched_at: DateTime<Utc>,
}

impl DemographicSnapshot {
    /// The validity window measured from [`Self::fetched_at`].
    #[must_use]
    pub fn validity() -> TimeDelta {
        TimeDelta::days(SNAPSHOT_VALIDITY_DAYS)
    }

    /// Returns `true` while `now - fetched_at` is strictly below the
    /// validity window.
    #[must_use]
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.fetched_at) < Self::validity()
    }

    /// The instant this snapshot becomes stale.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.fetched_at + Self::validity()
    }
}

/// Outcome recorded for a door-to-door lead.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LeadStatus {
    /// Knocked, nobody answered.
    NotHome,
    /// Spoke with someone who declined.
    NotInterested,
    /// Expressed interest but has not signed.
    Interested,
    /// Asked to be contacted again later.
    FollowUp,
    /// Signed / purchased.
    Converted,
}

impl LeadStatus {
    #[must_use]
    pub const fn is_converted(self) -> bool {
        matches!(self, Self::Converted)
    }

    /// Interested covers warm leads that have not converted yet.
    #[must_use]
    pub const fn is_interested(self) -> bool {
        matches!(self, Self::Interested | Self::FollowUp)
    }
}

/// A first-party lead whose location is not yet resolved to a tract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadLocation {
    /// Caller-assigned lead identifier.
    pub lead_id: String,
    /// Where the lead was knocked.
    pub coordinate: Coordinate,
    /// Latest outcome.
    pub status: LeadStatus,
}

/// A first-party lead attributed to a resolved tract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadRecord {
    /// Caller-assigned lead identifier.
    pub lead_id: String,
    /// Tract the lead's coordinate resolved to.
    pub area_id: AreaId,
    /// Latest outcome.
    pub status: LeadStatus,
}

/// The operator's own conversion statistics for one tract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceStats {
    pub area_id: AreaId,
    /// Leads attempted in the tract.
    pub total_leads: u64,
    /// Leads that converted. Never exceeds `total_leads`.
    pub converted_leads: u64,
    /// Leads that expressed interest. Never exceeds `total_leads`.
    pub interested_leads: u64,
}

impl PerformanceStats {
    /// Stats for a tract with no recorded leads.
    #[must_use]
    pub const fn empty(area_id: AreaId) -> Self {
        Self {
            area_id,
            total_leads: 0,
            converted_leads: 0,
            interested_leads: 0,
        }
    }

    /// `converted / total`, or `None` when there is no evidence.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn conversion_rate(&self) -> Option<f64> {
        if self.total_leads == 0 {
            return None;
        }
        Some(self.converted_leads as f64 / self.total_leads as f64)
    }
}

/// Qualitative bucket derived from a total score.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Tier {
    /// Total below 45.
    Poor,
    /// Total in `[45, 60)`.
    Fair,
    /// Total in `[60, 90)`.
    Good,
    /// Total of 90 or more.
    Excellent,
}

impl Tier {
    /// Buckets a total score. Each boundary belongs to the higher tier.
    #[must_use]
    pub fn for_score(total: f64) -> Self {
        if total >= 90.0 {
            Self::Excellent
        } else if total >= 60.0 {
            Self::Good
        } else if total >= 45.0 {
            Self::Fair
        } else {
            Self::Poor
        }
    }
}

/// Composite score for one tract with every sub-score retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub income_score: f64,
    pub density_score: f64,
    pub home_value_score: f64,
    pub performance_score: f64,
    /// Weighted sum of the four sub-scores, clamped to `[0, 100]`.
    pub total_score: f64,
    pub tier: Tier,
}
