#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Ranks census tracts for door-to-door prospecting.
//!
//! ```text
//! canvass_cli recommend --leads leads.csv [--profile suburban] [--limit 10] [--json]
//! canvass_cli profiles
//! canvass_cli cache-clear
//! ```
//!
//! Tracts are resolved with the Census Bureau geocoder and described with
//! ACS 5-year estimates. Demographics are cached in `DuckDB` for 30 days
//! (see `CANVASS_CACHE_PATH`). Set `CENSUS_API_KEY` to lift the anonymous
//! ACS rate limit and `RUST_LOG` to control logging.

mod leads;
mod output;
mod profiles;

use std::path::PathBuf;
use std::sync::Arc;

use canvass_cache::{AreaCache, SnapshotStore as _, SystemClock};
use canvass_database::snapshots::DuckDbSnapshotStore;
use canvass_demographics::DemographicsFetcher;
use canvass_demographics::acs::{AcsDemographicsProvider, api_key_from_env};
use canvass_geocoder::GeoResolver;
use canvass_geocoder::census::CensusTractGeocoder;
use canvass_recommend::{DEFAULT_CONCURRENCY, RecommendConfig, RecommendationService};
use canvass_source::service_registry::{self, ProviderService};
use clap::{Args, Parser, Subcommand};

use crate::leads::CsvLeadSource;
use crate::profiles::{LayeredPreferences, PROFILES, PreferenceOverrides};

#[derive(Parser)]
#[command(
    name = "canvass_cli",
    about = "Rank census tracts for door-to-door prospecting"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank the tracts your leads fall in
    Recommend(RecommendArgs),
    /// List quick-profile presets
    Profiles,
    /// Delete every cached tract snapshot
    CacheClear {
        /// Snapshot cache `DuckDB` file (defaults to `CANVASS_CACHE_PATH`
        /// or `data/shared/tract_snapshots.duckdb`)
        #[arg(long)]
        cache: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RecommendArgs {
    /// CSV file with `lead_id,latitude,longitude,status` columns
    #[arg(long)]
    leads: PathBuf,

    /// Quick-profile preset to start from
    #[arg(long)]
    profile: Option<String>,

    /// TOML file with preference overrides
    #[arg(long)]
    preferences: Option<PathBuf>,

    /// Minimum target median household income
    #[arg(long)]
    income_min: Option<f64>,

    /// Maximum target median household income
    #[arg(long)]
    income_max: Option<f64>,

    /// Minimum target median home value
    #[arg(long)]
    home_value_min: Option<f64>,

    /// Maximum target median home value
    #[arg(long)]
    home_value_max: Option<f64>,

    /// Minimum owner-occupied share to flag, between 0 and 1
    #[arg(long)]
    homeownership: Option<f64>,

    /// Number of tracts to show
    #[arg(long)]
    limit: Option<usize>,

    /// Concurrent outbound requests (1-16)
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,

    /// Snapshot cache `DuckDB` file
    #[arg(long, conflicts_with = "no_cache")]
    cache: Option<PathBuf>,

    /// Keep demographics in memory only
    #[arg(long)]
    no_cache: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = canvass_cli_utils::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Recommend(args) => recommend(args, &multi).await?,
        Commands::Profiles => print_profiles(),
        Commands::CacheClear { cache } => {
            let store = open_store(cache)?;
            store.clear()?;
            println!("Cleared tract snapshot cache");
        }
    }

    Ok(())
}

async fn recommend(
    args: RecommendArgs,
    multi: &canvass_cli_utils::MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = build_service(&args)?;

    let leads = CsvLeadSource::new(args.leads);
    let preferences = LayeredPreferences {
        file: args.preferences,
        flags: PreferenceOverrides {
            profile: args.profile,
            income_min: args.income_min,
            income_max: args.income_max,
            home_value_min: args.home_value_min,
            home_value_max: args.home_value_max,
            homeownership: args.homeownership,
        },
    };

    let progress = if args.json {
        canvass_cli_utils::IndicatifProgress::hidden()
    } else {
        canvass_cli_utils::IndicatifProgress::phase_bar(multi, "Preparing")
    };

    let recommendation = service
        .recommend_from(&leads, &preferences, args.limit, Some(&progress))
        .await?;

    let stats = service.cache().stats();
    log::info!(
        "Cache: {} hits, {} coalesced, {} fetches, {} stale fallbacks, {} failures",
        stats.hits,
        stats.coalesced,
        stats.fetches,
        stats.stale_fallbacks,
        stats.failures
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&recommendation)?);
    } else {
        print!("{}", output::format_table(&recommendation));
    }

    Ok(())
}

fn build_service(args: &RecommendArgs) -> Result<RecommendationService, Box<dyn std::error::Error>> {
    let geocoder_service = required_service("census_geocoder")?;
    let acs_service = required_service("census_acs")?;
    let tigerweb_service = required_service("tigerweb_tracts")?;

    let client = canvass_source::build_client(geocoder_service.timeout().max(acs_service.timeout()))?;

    let geocoder = CensusTractGeocoder::from_service(client.clone(), &geocoder_service)
        .ok_or("census_geocoder is not a Census geocoder service")?;
    let resolver = GeoResolver::new(Arc::new(geocoder), geocoder_service.timeout());

    let provider = AcsDemographicsProvider::from_services(client, &acs_service, &tigerweb_service)
        .ok_or("census_acs/tigerweb_tracts are misconfigured")?
        .with_api_key(api_key_from_env());
    let fetcher = Arc::new(DemographicsFetcher::new(Arc::new(provider), acs_service.timeout()));

    let clock = Arc::new(SystemClock);
    let cache = if args.no_cache {
        AreaCache::new(fetcher, clock)
    } else {
        let store = open_store(args.cache.clone())?;
        AreaCache::with_store(fetcher, clock, Arc::new(store))
    };

    let config = RecommendConfig {
        concurrency: args.concurrency,
        ..RecommendConfig::default()
    };

    Ok(RecommendationService::new(Arc::new(resolver), Arc::new(cache), config))
}

fn required_service(id: &str) -> Result<ProviderService, String> {
    service_registry::service(id).ok_or_else(|| format!("Provider service '{id}' is not enabled"))
}

fn open_store(path: Option<PathBuf>) -> Result<DuckDbSnapshotStore, canvass_database::DbError> {
    let path = path.unwrap_or_else(canvass_database::paths::snapshot_cache_db_path);
    log::debug!("Opening snapshot cache at {}", path.display());
    DuckDbSnapshotStore::open(&path)
}

fn print_profiles() {
    println!(
        "{:<10} {:>20} {:>24} {:>8}  DESCRIPTION",
        "PROFILE", "INCOME", "HOME VALUE", "OWNERS"
    );
    println!("{}", "-".repeat(100));
    for (name, description, prefs) in PROFILES {
        let owners = prefs
            .homeownership_weight_preference
            .map_or_else(|| "-".to_string(), |r| format!("{:.0}%", r * 100.0));
        println!(
            "{:<10} {:>20} {:>24} {:>8}  {description}",
            name,
            format!("${:.0}-${:.0}", prefs.income_min, prefs.income_max),
            format!("${:.0}-${:.0}", prefs.home_value_min, prefs.home_value_max),
            owners,
        );
    }
}
