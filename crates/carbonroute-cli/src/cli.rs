//! Command-line interface for carbonroute.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `resolve` | Carbon intensity for one point, now or at a time |
//! | `rank` | Order sites by effective intensity at one hour |
//! | `forecast` | Forecast statistics and best hour for one point |
//! | `sites` | List rankable sites |
//! | `pending` | Retained readings awaiting re-check |
//! | `purge` | Drop expired retained readings |
//!
//! Every command prints one JSON envelope on stdout. Flags override the
//! matching environment variables.
//!
//! ```bash
//! carbonroute resolve --lat 52.0 --lon 5.0 --energy-kwh 3 --pretty
//! carbonroute --mock rank --time 2025-03-01T10:00:00Z --fail-soft
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "carbonroute",
    author,
    version,
    about = "Carbon-intensity resolution across providers"
)]
pub struct Cli {
    /// Use the offline mock provider and an in-memory retainment store.
    #[arg(long, global = true, default_value_t = false)]
    pub mock: bool,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Retries per provider after the first attempt (overrides CARBONROUTE_RETRIES).
    #[arg(long, global = true)]
    pub retries: Option<u32>,

    /// Per-request timeout in milliseconds (overrides CARBONROUTE_TIMEOUT_MS).
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resolve carbon intensity for a location.
    Resolve(ResolveArgs),
    /// Rank sites by effective carbon intensity.
    Rank(RankArgs),
    /// Summarise the forecast for a location.
    Forecast(ForecastArgs),
    /// List rankable sites.
    Sites(SitesArgs),
    /// Show retained readings for a location and hour.
    Pending(PendingArgs),
    /// Remove expired retained readings.
    Purge,
}

#[derive(Debug, Args)]
pub struct ResolveArgs {
    #[arg(long, allow_negative_numbers = true)]
    pub lat: f64,
    #[arg(long, allow_negative_numbers = true)]
    pub lon: f64,
    /// RFC3339 target time; the latest reading is used when omitted.
    #[arg(long)]
    pub time: Option<String>,
    /// Defaults to PUE_DEFAULT.
    #[arg(long)]
    pub pue: Option<f64>,
    #[arg(long)]
    pub energy_kwh: Option<f64>,
}

#[derive(Debug, Args)]
pub struct RankArgs {
    /// RFC3339 time; defaults to the current hour.
    #[arg(long)]
    pub time: Option<String>,
    /// JSON site list; defaults to SITES_JSON, then the built-in table.
    #[arg(long)]
    pub sites_json: Option<PathBuf>,
    #[arg(long)]
    pub pue_default: Option<f64>,
    #[arg(long)]
    pub energy_kwh: Option<f64>,
    /// Substitute a synthetic intensity for sites that fail.
    #[arg(long, default_value_t = false)]
    pub fail_soft: bool,
    /// Fixed substitute value; random in 150..=600 when omitted.
    #[arg(long)]
    pub synthetic_ci: Option<f64>,
}

#[derive(Debug, Args)]
pub struct ForecastArgs {
    #[arg(long, allow_negative_numbers = true)]
    pub lat: f64,
    #[arg(long, allow_negative_numbers = true)]
    pub lon: f64,
    #[arg(long)]
    pub pue: Option<f64>,
}

#[derive(Debug, Args)]
pub struct SitesArgs {
    #[arg(long)]
    pub sites_json: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct PendingArgs {
    #[arg(long, allow_negative_numbers = true)]
    pub lat: f64,
    #[arg(long, allow_negative_numbers = true)]
    pub lon: f64,
    /// Any RFC3339 instant inside the hour of interest.
    #[arg(long)]
    pub time: String,
}
