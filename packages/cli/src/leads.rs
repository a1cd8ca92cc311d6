//! CSV lead source.
//!
//! ```text
//! lead_id,latitude,longitude,status
//! L-001,38.8895,-77.0298,converted
//! L-002,38.8901,-77.0312,not_home
//! ```

use std::io::Read;
use std::path::PathBuf;
use std::str::FromStr as _;

use async_trait::async_trait;
use canvass_area_models::{Coordinate, LeadLocation, LeadStatus};
use canvass_recommend::sources::{InputError, LeadLocationSource};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct LeadRow {
    lead_id: String,
    latitude: f64,
    longitude: f64,
    status: String,
}

/// Reads leads from a CSV file with a header row.
pub struct CsvLeadSource {
    path: PathBuf,
}

impl CsvLeadSource {
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl LeadLocationSource for CsvLeadSource {
    async fn lead_locations(&self) -> Result<Vec<LeadLocation>, InputError> {
        let bytes = tokio::fs::read(&self.path).await?;
        let what = self.path.display().to_string();
        let parsed = parse_leads(&what, bytes.as_slice())?;
        if parsed.skipped > 0 {
            log::warn!("Skipped {} malformed rows in {what}", parsed.skipped);
        }
        Ok(parsed.leads)
    }
}

/// Rows that parsed, and how many did not.
#[derive(Debug)]
pub struct ParsedLeads {
    pub leads: Vec<LeadLocation>,
    pub skipped: usize,
}

/// Parses lead rows. Statuses are matched case-insensitively.
///
/// A row that does not parse is logged and skipped.
///
/// # Errors
///
/// Returns [`InputError::Parse`] if the underlying reader fails.
pub fn parse_leads(what: &str, reader: impl Read) -> Result<ParsedLeads, InputError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let mut leads = Vec::new();
    let mut skipped = 0;
    for (idx, row) in rdr.deserialize::<LeadRow>().enumerate() {
        let line = idx + 2;

        let row = match row {
            Ok(row) => row,
            Err(e) if e.is_io_error() => {
                return Err(InputError::Parse {
                    what: format!("{what} line {line}"),
                    message: e.to_string(),
                });
            }
            Err(e) => {
                log::debug!("{what} line {line}: {e}");
                skipped += 1;
                continue;
            }
        };

        let Ok(status) = LeadStatus::from_str(&row.status) else {
            log::debug!("{what} line {line}: unknown status '{}'", row.status);
            skipped += 1;
            continue;
        };

        leads.push(LeadLocation {
            lead_id: row.lead_id,
            coordinate: Coordinate::new(row.latitude, row.longitude),
            status,
        });
    }

    Ok(ParsedLeads { leads, skipped })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rows() {
        let csv = "lead_id,latitude,longitude,status\n\
                   L-001, 38.8895, -77.0298, converted\n\
                   L-002,38.8901,-77.0312,Not_Home\n\
                   L-003,38.8901,-77.0312,follow_up\n";
        let parsed = parse_leads("leads.csv", csv.as_bytes()).unwrap();
        assert_eq!(parsed.skipped, 0);
        let leads = parsed.leads;
        assert_eq!(leads.len(), 3);
        assert_eq!(leads[0].lead_id, "L-001");
        assert_eq!(leads[0].status, LeadStatus::Converted);
        assert!((leads[0].coordinate.latitude - 38.8895).abs() < 1e-9);
        assert_eq!(leads[1].status, LeadStatus::NotHome);
        assert_eq!(leads[2].status, LeadStatus::FollowUp);
    }

    #[test]
    fn empty_file_has_no_leads() {
        let parsed = parse_leads("leads.csv", "lead_id,latitude,longitude,status\n".as_bytes()).unwrap();
        assert!(parsed.leads.is_empty());
        assert_eq!(parsed.skipped, 0);
    }

    #[test]
    fn skips_bad_lines() {
        let csv = "lead_id,latitude,longitude,status\n\
                   L-001,38.8,-77.0,converted\n\
                   L-002,north,-77.0,converted\n\
                   L-003,38.9,-77.1,interested\n";
        let parsed = parse_leads("leads.csv", csv.as_bytes()).unwrap();
        assert_eq!(parsed.skipped, 1);
        let ids: Vec<_> = parsed.leads.iter().map(|l| l.lead_id.as_str()).collect();
        assert_eq!(ids, ["L-001", "L-003"]);
    }

    #[test]
    fn skips_unknown_status() {
        let csv = "lead_id,latitude,longitude,status\nL-001,38.8,-77.0,maybe\nL-002,38.8,-77.0,converted\n";
        let parsed = parse_leads("leads.csv", csv.as_bytes()).unwrap();
        assert_eq!(parsed.skipped, 1);
        assert_eq!(parsed.leads.len(), 1);
        assert_eq!(parsed.leads[0].status, LeadStatus::Converted);
    }
}
