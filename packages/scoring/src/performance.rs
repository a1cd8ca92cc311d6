//! Per-tract lead statistics.

use std::collections::BTreeMap;

use canvass_area_models::{AreaId, LeadRecord, PerformanceStats};

/// Counts the leads attributed to `area_id`.
///
/// Records for other tracts are ignored, so the whole lead list can be
/// passed for every area.
#[must_use]
pub fn aggregate(area_id: &AreaId, leads: &[LeadRecord]) -> PerformanceStats {
    leads
        .iter()
        .filter(|lead| &lead.area_id == area_id)
        .fold(PerformanceStats::empty(area_id.clone()), |mut stats, lead| {
            record(&mut stats, lead);
            stats
        })
}

/// Groups every lead by tract in a single pass.
#[must_use]
pub fn aggregate_all(leads: &[LeadRecord]) -> BTreeMap<AreaId, PerformanceStats> {
    let mut by_area: BTreeMap<AreaId, PerformanceStats> = BTreeMap::new();
    for lead in leads {
        let stats = by_area
            .entry(lead.area_id.clone())
            .or_insert_with(|| PerformanceStats::empty(lead.area_id.clone()));
        record(stats, lead);
    }
    log::debug!("Aggregated {} leads across {} tracts", leads.len(), by_area.len());
    by_area
}

fn record(stats: &mut PerformanceStats, lead: &LeadRecord) {
    stats.total_leads += 1;
    if lead.status.is_converted() {
        stats.converted_leads += 1;
    }
    if lead.status.is_interested() {
        stats.interested_leads += 1;
    }
}
