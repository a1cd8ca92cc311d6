//! Caller-supplied scoring targets.
//!
//! [`TargetPreferences`] is a plain value passed into every scoring
//! request. Named presets live in the caller; this module only knows
//! how to check that a value is usable.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lowest income bound a caller may request.
pub const INCOME_FLOOR: f64 = 20_000.0;
/// Highest income bound a caller may request.
pub const INCOME_CEILING: f64 = 500_000.0;
/// Lowest home value bound a caller may request.
pub const HOME_VALUE_FLOOR: f64 = 50_000.0;
/// Highest home value bound a caller may request.
pub const HOME_VALUE_CEILING: f64 = 2_000_000.0;

/// Target household profile for a prospecting run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetPreferences {
    pub income_min: f64,
    pub income_max: f64,
    pub home_value_min: f64,
    pub home_value_max: f64,
    /// Minimum owner-occupied share the caller is looking for, `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homeownership_weight_preference: Option<f64>,
}

/// Why a [`TargetPreferences`] value was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// A bound is NaN or infinite.
    #[error("{field} must be a finite number")]
    NonFinite {
        /// Name of the offending field.
        field: &'static str,
    },

    /// The minimum of a range exceeds its maximum.
    #[error("{field} range is inverted: min {min} > max {max}")]
    InvertedRange {
        /// Name of the range (`"income"` or `"homeValue"`).
        field: &'static str,
        min: f64,
        max: f64,
    },

    /// A value falls outside what the scorer supports.
    #[error("{field} = {value} is outside the supported range [{min}, {max}]")]
    OutOfBounds {
        /// Name of the offending field.
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

impl TargetPreferences {
    #[must_use]
    pub const fn new(income_min: f64, income_max: f64, home_value_min: f64, home_value_max: f64) -> Self {
        Self {
            income_min,
            income_max,
            home_value_min,
            home_value_max,
            homeownership_weight_preference: None,
        }
    }

    #[must_use]
    pub const fn with_homeownership_preference(mut self, rate: f64) -> Self {
        self.homeownership_weight_preference = Some(rate);
        self
    }

    /// Checks every bound.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if any bound is non-finite, outside the
    /// supported range, or if a range is inverted.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_range(
            "income",
            ("incomeMin", self.income_min),
            ("incomeMax", self.income_max),
            INCOME_FLOOR,
            INCOME_CEILING,
        )?;
        check_range(
            "homeValue",
            ("homeValueMin", self.home_value_min),
            ("homeValueMax", self.home_value_max),
            HOME_VALUE_FLOOR,
            HOME_VALUE_CEILING,
        )?;

        if let Some(rate) = self.homeownership_weight_preference {
            check_bounds("homeownershipWeightPreference", rate, 0.0, 1.0)?;
        }

        Ok(())
    }

    /// Consumes the value, returning it only if it validates.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] under the same conditions as
    /// [`Self::validate`].
    pub fn validated(self) -> Result<Self, ValidationError> {
        self.validate()?;
        Ok(self)
    }
}

fn check_range(
    field: &'static str,
    (min_name, min): (&'static str, f64),
    (max_name, max): (&'static str, f64),
    floor: f64,
    ceiling: f64,
) -> Result<(), ValidationError> {
    check_bounds(min_name, min, floor, ceiling)?;
    check_bounds(max_name, max, floor, ceiling)?;
    if min > max {
        return Err(ValidationError::InvertedRange { field, min, max });
    }
    Ok(())
}

fn check_bounds(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFinite { field });
    }
    if value < min || value > max {
        return Err(ValidationError::OutOfBounds {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}
