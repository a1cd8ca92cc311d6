//! The composite tract score.
//!
//! Four sub-scores, each in `[0, 100]`:
//!
//! | Sub-score   | Weight | Full marks when                                  |
//! |-------------|--------|--------------------------------------------------|
//! | income      | 0.30   | median income inside the target range            |
//! | density     | 0.20   | population between 2,000 and 8,000               |
//! | home value  | 0.25   | median home value inside the target range        |
//! | performance | 0.25   | own conversion rate of 30% or more               |
//!
//! Outside a target range the income and home value scores fall linearly
//! to 0 at a distance equal to the range width. A tract with no recorded
//! leads gets a neutral performance score of 50.

use canvass_area_models::{DemographicSnapshot, PerformanceStats, ScoreBreakdown, TargetPreferences, Tier};

/// Decay distance used for income when the target range is a single value.
pub const INCOME_POINT_DECAY: f64 = 10_000.0;
/// Decay distance used for home value when the target range is a single value.
pub const HOME_VALUE_POINT_DECAY: f64 = 25_000.0;

/// Lower edge of the optimal population band.
pub const OPTIMAL_POPULATION_MIN: f64 = 2_000.0;
/// Upper edge of the optimal population band.
pub const OPTIMAL_POPULATION_MAX: f64 = 8_000.0;
/// Population at which the density score reaches 0 above the band.
pub const SATURATED_POPULATION: f64 = 24_000.0;

/// Performance score for a tract with no leads.
pub const NO_EVIDENCE_PERFORMANCE: f64 = 50.0;

/// `(conversion rate, score)` knots of the performance curve.
///
/// Door-to-door conversion is rare, so a 15% rate already scores 70.
const PERFORMANCE_CURVE: [(f64, f64); 3] = [(0.0, 0.0), (0.15, 70.0), (0.30, 100.0)];

/// Relative weight of each sub-score in the total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub income: f64,
    pub density: f64,
    pub home_value: f64,
    pub performance: f64,
}

impl ScoreWeights {
    /// The fixed weighting every ranking uses.
    pub const STANDARD: Self = Self {
        income: 0.30,
        density: 0.20,
        home_value: 0.25,
        performance: 0.25,
    };

    #[must_use]
    pub fn sum(&self) -> f64 {
        self.income + self.density + self.home_value + self.performance
    }
}

/// Scores one tract.
///
/// `preferences` is expected to have passed
/// [`TargetPreferences::validate`]; the result is clamped either way.
#[must_use]
pub fn score(
    snapshot: &DemographicSnapshot,
    preferences: &TargetPreferences,
    performance: &PerformanceStats,
) -> ScoreBreakdown {
    let income_score = range_score(
        snapshot.median_income,
        preferences.income_min,
        preferences.income_max,
        INCOME_POINT_DECAY,
    );
    let density_score = density_score(snapshot.population);
    let home_value_score = range_score(
        snapshot.median_home_value,
        preferences.home_value_min,
        preferences.home_value_max,
        HOME_VALUE_POINT_DECAY,
    );
    let performance_score = performance_score(performance);

    let w = ScoreWeights::STANDARD;
    let total_score = clamp_score(
        w.income.mul_add(
            income_score,
            w.density.mul_add(
                density_score,
                w.home_value
                    .mul_add(home_value_score, w.performance * performance_score),
            ),
        ),
    );

    ScoreBreakdown {
        income_score,
        density_score,
        home_value_score,
        performance_score,
        total_score,
        tier: Tier::for_score(total_score),
    }
}

/// 100 inside `[min, max]`, falling linearly to 0 at a distance of
/// `max - min` from the nearest bound (`point_decay` when `min == max`).
#[must_use]
pub fn range_score(value: f64, min: f64, max: f64, point_decay: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    if (min..=max).contains(&value) {
        return 100.0;
    }

    let width = max - min;
    let decay = if width > 0.0 { width } else { point_decay };
    let distance = if value < min { min - value } else { value - max };

    clamp_score(100.0 * (1.0 - distance / decay))
}

/// 100 inside the optimal population band, linear to 0 at population 0
/// below it and at [`SATURATED_POPULATION`] above it.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn density_score(population: u64) -> f64 {
    let population = population as f64;

    let raw = if population < OPTIMAL_POPULATION_MIN {
        100.0 * population / OPTIMAL_POPULATION_MIN
    } else if population <= OPTIMAL_POPULATION_MAX {
        100.0
    } else {
        100.0 * (1.0 - (population - OPTIMAL_POPULATION_MAX) / (SATURATED_POPULATION - OPTIMAL_POPULATION_MAX))
    };

    clamp_score(raw)
}

/// Maps own conversion rate through [`PERFORMANCE_CURVE`].
///
/// Returns [`NO_EVIDENCE_PERFORMANCE`] when there are no leads.
#[must_use]
pub fn performance_score(stats: &PerformanceStats) -> f64 {
    stats
        .conversion_rate()
        .map_or(NO_EVIDENCE_PERFORMANCE, conversion_curve)
}

/// Piecewise-linear, non-decreasing curve over conversion rate.
#[must_use]
pub fn conversion_curve(rate: f64) -> f64 {
    if !rate.is_finite() || rate <= 0.0 {
        return 0.0;
    }

    for pair in PERFORMANCE_CURVE.windows(2) {
        let ((x0, y0), (x1, y1)) = (pair[0], pair[1]);
        if rate <= x1 {
            let t = (rate - x0) / (x1 - x0);
            return clamp_score(t.mul_add(y1 - y0, y0));
        }
    }

    100.0
}

/// Whether the tract's owner-occupied share reaches the caller's
/// homeownership preference. `None` when the caller set none.
#[must_use]
pub fn meets_homeownership_preference(
    snapshot: &DemographicSnapshot,
    preferences: &TargetPreferences,
) -> Option<bool> {
    preferences
        .homeownership_weight_preference
        .map(|wanted| snapshot.homeownership_rate >= wanted)
}

fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use canvass_area_models::{AreaId, Coordinate};
    use chrono::Utc;

    use super::*;

    fn preferences() -> TargetPreferences {
        TargetPreferences::new(100_000.0, 150_000.0, 250_000.0, 500_000.0)
    }

    fn snapshot(income: f64, population: u64, home_value: f64) -> DemographicSnapshot {
        DemographicSnapshot {
            area_id: AreaId::new("11001006202"),
            median_income: income,
            median_home_value: home_value,
            population,
            homeownership_rate: 0.6,
            centroid: Some(Coordinate::new(38.89, -77.03)),
            fetched_at: Utc::now(),
        }
    }

    fn stats(total: u64, converted: u64) -> PerformanceStats {
        PerformanceStats {
            area_id: AreaId::new("11001006202"),
            total_leads: total,
            converted_leads: converted,
            interested_leads: 0,
        }
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn weights_sum_to_one() {
        assert!((ScoreWeights::STANDARD.sum() - 1.0).abs() < 1e-12);
        assert!((0.30_f64 + 0.20 + 0.25 + 0.25 - 1.00).abs() < 1e-12);
    }

    #[test]
    fn worked_example_area_a() {
        let breakdown = score(&snapshot(120_000.0, 5_000, 350_000.0), &preferences(), &stats(20, 3));

        assert_close(breakdown.income_score, 100.0);
        assert_close(breakdown.density_score, 100.0);
        assert_close(breakdown.home_value_score, 100.0);
        assert_close(breakdown.performance_score, 70.0);
        assert!((breakdown.total_score - 92.5).abs() <= 0.5);
        assert_eq!(breakdown.tier, Tier::Excellent);
    }

    #[test]
    fn worked_example_area_b() {
        let breakdown = score(
            &snapshot(75_000.0, 15_000, 180_000.0),
            &preferences(),
            &PerformanceStats::empty(AreaId::new("11001006202")),
        );

        // 25k below a 50k-wide income range, 7k over the band of a 16k
        // decay, 70k below a 250k-wide home value range.
        assert_close(breakdown.income_score, 50.0);
        assert_close(breakdown.density_score, 56.25);
        assert_close(breakdown.home_value_score, 72.0);
        assert_close(breakdown.performance_score, 50.0);
        assert!((breakdown.total_score - 57.0).abs() <= 0.5);
        assert_eq!(breakdown.tier, Tier::Fair);
    }

    #[test]
    fn range_score_decays_over_range_width() {
        assert_close(range_score(100_000.0, 100_000.0, 150_000.0, INCOME_POINT_DECAY), 100.0);
        assert_close(range_score(150_000.0, 100_000.0, 150_000.0, INCOME_POINT_DECAY), 100.0);
        assert_close(range_score(175_000.0, 100_000.0, 150_000.0, INCOME_POINT_DECAY), 50.0);
        assert_close(range_score(200_000.0, 100_000.0, 150_000.0, INCOME_POINT_DECAY), 0.0);
        assert_close(range_score(20_000.0, 100_000.0, 150_000.0, INCOME_POINT_DECAY), 0.0);
    }

    #[test]
    fn single_point_range_uses_floor_distance() {
        assert_close(range_score(100_000.0, 100_000.0, 100_000.0, INCOME_POINT_DECAY), 100.0);
        assert_close(range_score(95_000.0, 100_000.0, 100_000.0, INCOME_POINT_DECAY), 50.0);
        assert_close(range_score(110_000.0, 100_000.0, 100_000.0, INCOME_POINT_DECAY), 0.0);
    }

    #[test]
    fn density_band_and_decay() {
        assert_close(density_score(0), 0.0);
        assert_close(density_score(1_000), 50.0);
        assert_close(density_score(2_000), 100.0);
        assert_close(density_score(8_000), 100.0);
        assert_close(density_score(16_000), 50.0);
        assert_close(density_score(24_000), 0.0);
        assert_close(density_score(1_000_000), 0.0);
    }

    #[test]
    fn no_leads_is_neutral_not_poor() {
        assert_close(performance_score(&stats(0, 0)), NO_EVIDENCE_PERFORMANCE);
        assert_close(performance_score(&stats(10, 0)), 0.0);
    }

    #[test]
    fn conversion_curve_reference_points() {
        assert_close(conversion_curve(0.0), 0.0);
        assert_close(conversion_curve(0.15), 70.0);
        assert_close(conversion_curve(0.30), 100.0);
        assert_close(conversion_curve(0.75), 100.0);
        assert_close(conversion_curve(1.0), 100.0);
    }

    #[test]
    fn conversion_curve_is_monotonic() {
        let mut previous = conversion_curve(0.0);
        for step in 1..=1_000 {
            let rate = f64::from(step) / 1_000.0;
            let current = conversion_curve(rate);
            assert!(current >= previous, "curve decreased at rate {rate}");
            previous = current;
        }
    }

    #[test]
    fn every_score_is_bounded() {
        let ranges = [
            (20_000.0, 20_000.0, 50_000.0, 50_000.0),
            (20_000.0, 500_000.0, 50_000.0, 2_000_000.0),
            (100_000.0, 150_000.0, 250_000.0, 500_000.0),
        ];
        let incomes = [0.0, 19_999.0, 60_000.0, 125_000.0, 480_000.0, 5_000_000.0];
        let populations = [0, 1, 1_999, 5_000, 8_001, 30_000];
        let home_values = [0.0, 49_999.0, 300_000.0, 1_999_999.0, 9_000_000.0];
        let performances = [stats(0, 0), stats(10, 1), stats(7, 7)];

        for (imin, imax, hmin, hmax) in ranges {
            let prefs = TargetPreferences::new(imin, imax, hmin, hmax);
            assert!(prefs.validate().is_ok());
            for income in incomes {
                for population in populations {
                    for home_value in home_values {
                        for perf in &performances {
                            let b = score(&snapshot(income, population, home_value), &prefs, perf);
                            for s in [
                                b.income_score,
                                b.density_score,
                                b.home_value_score,
                                b.performance_score,
                                b.total_score,
                            ] {
                                assert!((0.0..=100.0).contains(&s), "score {s} out of bounds");
                            }
                            assert_eq!(b.tier, Tier::for_score(b.total_score));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn homeownership_preference_is_reported_not_weighted() {
        let snap = snapshot(120_000.0, 5_000, 350_000.0);
        let plain = preferences();
        let picky = preferences().with_homeownership_preference(0.7);

        assert_eq!(meets_homeownership_preference(&snap, &plain), None);
        assert_eq!(meets_homeownership_preference(&snap, &picky), Some(false));
        assert_eq!(
            meets_homeownership_preference(&snap, &preferences().with_homeownership_preference(0.6)),
            Some(true)
        );
        assert_eq!(
            score(&snap, &plain, &stats(20, 3)),
            score(&snap, &picky, &stats(20, 3))
        );
    }
}
