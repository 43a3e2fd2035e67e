//! rdpkg - redistricting data package builder
//!
//! `rdpkg build` produces one state's GeoPackage; `rdpkg geographies` lists
//! the geography levels the builder knows about.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rdpkg_build::models::BuildPhase;
use rdpkg_build::{run_build, BuildRequest, EquivalencyFile, PipelineError, ShapefileOverride};
use rdpkg_common::config::{ConfigOverrides, PipelineConfig};
use rdpkg_common::geography::GeographyCatalog;
use rdpkg_common::{Progress, State};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rdpkg")]
#[command(about = "Build redistricting data packages from US Census releases")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " [", env!("GIT_HASH"), "] built ", env!("BUILD_TIMESTAMP")))]
struct Cli {
    /// TOML config file
    #[arg(long, global = true, env = "RDPKG_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a package for one state
    Build(BuildArgs),
    /// List geography levels
    Geographies {
        /// Only levels that apply to this state
        #[arg(long)]
        state: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
struct BuildArgs {
    /// Two-letter state code
    #[arg(long)]
    state: String,

    /// Decennial census year (2010 or 2020)
    #[arg(long, default_value = "2020")]
    year: String,

    /// GeoPackage to create or extend
    #[arg(short, long)]
    output: PathBuf,

    /// ACS release year for CVAP estimates
    #[arg(long)]
    cvap_year: Option<u16>,

    /// Geography level to build (repeatable); blocks are always built
    #[arg(long = "geography")]
    geographies: Vec<String>,

    /// Block-level voter registration CSV
    #[arg(long)]
    voter_file: Option<PathBuf>,

    /// Equivalency file as path:join_column[:col1,col2] (repeatable)
    #[arg(long)]
    equivalency: Vec<String>,

    /// Local shapefile as layer=path (repeatable)
    #[arg(long)]
    shapefile: Vec<String>,

    /// Download cache folder
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Census download host
    #[arg(long)]
    census_base_url: Option<String>,

    /// Use cached downloads only
    #[arg(long)]
    offline: bool,

    /// Write the build report as JSON
    #[arg(long)]
    report: Option<PathBuf>,
}

fn init_tracing(config: &PipelineConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("Invalid log level")?;

    match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Cannot open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    Ok(())
}

/// Progress sink logging every fifth percent
fn progress_logger(token: CancellationToken) -> Progress {
    let last = AtomicU64::new(0);
    Progress::new(
        move |value| {
            let bucket = (value / 5.0).floor() as u64;
            if last.fetch_max(bucket, Ordering::Relaxed) < bucket {
                info!(percent = value.round() as u64, "Build progress");
            }
        },
        token,
    )
}

fn list_geographies(state: Option<&str>) -> Result<()> {
    let catalog = GeographyCatalog::new();
    let levels: Vec<_> = match state {
        Some(code) => {
            let info = rdpkg_common::state::StateInfo::by_code(code)?;
            catalog.applicable(info.code).collect()
        }
        None => catalog.all().collect(),
    };
    for g in levels {
        println!(
            "{:<12} {:<28} sumlev {:<8} geoid {:>2}  {}",
            g.code,
            g.display_name,
            g.summary_levels.join(","),
            g.geoid_len(),
            match (g.shapefile, g.cvap_source) {
                (Some(_), Some(_)) => "tiger, cvap published",
                (Some(_), None) => "tiger, cvap aggregated",
                (None, Some(_)) => "dissolved, cvap published",
                (None, None) => "dissolved, cvap aggregated",
            }
        );
    }
    Ok(())
}

async fn build(args: BuildArgs, config: PipelineConfig) -> Result<bool> {
    let state = State::new(&args.state, &args.year, &args.output)?;
    let mut request = BuildRequest::new(state, config);
    request.cvap_year = args.cvap_year;
    request.geographies = (!args.geographies.is_empty()).then_some(args.geographies);
    request.voter_file = args.voter_file;
    request.equivalency = args
        .equivalency
        .iter()
        .map(|s| EquivalencyFile::parse(s))
        .collect::<rdpkg_common::Result<_>>()?;
    request.shapefiles = args
        .shapefile
        .iter()
        .map(|s| ShapefileOverride::parse(s))
        .collect::<rdpkg_common::Result<_>>()?;

    let token = CancellationToken::new();
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling at next checkpoint");
            ctrl_c_token.cancel();
        }
    });

    let report = match run_build(&request, &progress_logger(token)).await {
        Ok(report) => report,
        Err(PipelineError::Cancelled) => {
            warn!("Build cancelled, package left as of the last completed step");
            return Ok(false);
        }
        Err(e) => return Err(e).context("Build failed"),
    };

    for layer in &report.layers {
        match (&layer.error, layer.skipped) {
            (Some(e), _) => error!(layer = %layer.table, error = %e, "Layer failed"),
            (None, true) => info!(layer = %layer.table, "Layer already present"),
            (None, false) => info!(layer = %layer.table, rows = layer.rows_written, "Layer written"),
        }
    }
    for warning in &report.warnings {
        warn!("{}", warning);
    }
    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json).with_context(|| format!("Cannot write report {}", path.display()))?;
    }

    Ok(report.phase == BuildPhase::Completed && report.failed_layers().next().is_none())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let overrides = match &cli.command {
        Command::Build(args) => ConfigOverrides {
            config_file: cli.config.clone(),
            cache_dir: args.cache_dir.clone(),
            census_base_url: args.census_base_url.clone(),
            offline: args.offline,
        },
        Command::Geographies { .. } => ConfigOverrides {
            config_file: cli.config.clone(),
            ..Default::default()
        },
    };
    let config = PipelineConfig::resolve(&overrides)?;
    init_tracing(&config)?;

    info!(
        "Starting rdpkg v{} [{}] built {}",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    match cli.command {
        Command::Geographies { state } => list_geographies(state.as_deref()),
        Command::Build(args) => {
            if !build(args, config).await? {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
