//! Human-readable rendering of a [`Recommendation`].

use std::fmt::Write as _;

use canvass_recommend::Recommendation;

/// Renders the ranked table followed by a summary of what was skipped.
#[must_use]
pub fn format_table(recommendation: &Recommendation) -> String {
    let mut out = String::new();

    if recommendation.is_empty() {
        out.push_str("No tracts to recommend yet. Add leads with US coordinates and try again.\n");
    } else {
        let _ = writeln!(
            out,
            "{:<4} {:<12} {:>6} {:<10} {:>6} {:>6} {:>6} {:>6} {:>10} {:>11} {:>7}",
            "#", "TRACT", "SCORE", "TIER", "INC", "DENS", "HOME", "PERF", "INCOME", "HOME VALUE", "LEADS"
        );
        let _ = writeln!(out, "{}", "-".repeat(96));

        for (rank, area) in recommendation.areas.iter().enumerate() {
            let b = &area.breakdown;
            let marker = if area.stale { " (stale)" } else { "" };
            let _ = writeln!(
                out,
                "{:<4} {:<12} {:>6.1} {:<10} {:>6.0} {:>6.0} {:>6.0} {:>6.0} {:>10.0} {:>11.0} {:>7}{marker}",
                rank + 1,
                area.area_id.as_str(),
                b.total_score,
                b.tier.as_ref(),
                b.income_score,
                b.density_score,
                b.home_value_score,
                b.performance_score,
                area.snapshot.median_income,
                area.snapshot.median_home_value,
                area.performance.total_leads,
            );
        }
    }

    let mut notes = Vec::new();
    if recommendation.skipped_coordinates > 0 {
        notes.push(format!(
            "{} coordinate(s) outside coverage or unresolvable",
            recommendation.skipped_coordinates
        ));
    }
    if !recommendation.failed_areas.is_empty() {
        notes.push(format!(
            "{} tract(s) without demographics",
            recommendation.failed_areas.len()
        ));
    }
    if recommendation.stale_areas > 0 {
        notes.push(format!(
            "{} tract(s) scored from stale demographics",
            recommendation.stale_areas
        ));
    }
    if !notes.is_empty() {
        let _ = writeln!(out, "\nSkipped: {}", notes.join("; "));
    }

    out
}
