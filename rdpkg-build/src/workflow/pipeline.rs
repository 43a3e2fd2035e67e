//! Package build pipeline
//!
//! Sequences one state's build: download → tabulate → layers → CVAP →
//! voter file → equivalency files. Each phase owns a slice of the 0-100
//! progress range and checks for cancellation between units of work.
//!
//! The package database is opened separately for each phase that writes to
//! it. An existing package is extended rather than replaced.

use crate::error::PipelineError;
use crate::models::{BuildPhase, BuildReport, BuildRequest};
use crate::services::archive::{extract_archive, find_with_suffix};
use crate::services::census_sources::{cvap_url, pl_archive_url, tiger_url};
use crate::services::cvap::CvapProcessor;
use crate::services::downloader::{CensusDownloader, DownloadError};
use crate::services::equivalency::import_equivalency;
use crate::services::geometry::{dissolve_blocks, join_tabulation, load_shapefile, Feature};
use crate::services::package_writer::write_layer;
use crate::services::tabulation::{TabulationLoader, TabulationTable};
use crate::services::voter_file::import_voter_file;
use rdpkg_common::db::{create_package, open_package};
use rdpkg_common::geography::{Geography, GeographyCatalog};
use rdpkg_common::Progress;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Build a package; `Ok(true)` when every phase succeeded
///
/// Only cancellation and failure to create or open the package file are
/// returned as errors. Any other failure is logged and reported as
/// `Ok(false)`.
pub async fn build_package(request: &BuildRequest, progress: &Progress) -> Result<bool, PipelineError> {
    match run_build(request, progress).await {
        Ok(report) => {
            let failed: Vec<&str> = report.failed_layers().map(|l| l.table.as_str()).collect();
            if !failed.is_empty() {
                error!(state = %report.state, layers = ?failed, "Build finished with failed layers");
                return Ok(false);
            }
            Ok(true)
        }
        Err(e @ PipelineError::Cancelled) | Err(e @ PipelineError::PackageCreation(_)) => Err(e),
        Err(e) => {
            error!(state = %request.state.code(), error = %e, "Build failed");
            Ok(false)
        }
    }
}

/// Run a build and return its report
pub async fn run_build(request: &BuildRequest, progress: &Progress) -> Result<BuildReport, PipelineError> {
    let state = &request.state;
    let mut report = BuildReport::new(state.code(), state.year.as_str(), state.gpkg_path.clone());
    progress.checkpoint(0.0)?;

    let catalog = GeographyCatalog::new();
    let geographies: Vec<&Geography> = catalog
        .applicable(state.code())
        .filter(|g| request.wants(g.code))
        .collect();
    if let Some(requested) = &request.geographies {
        for code in requested {
            catalog.get(code)?;
        }
    }
    info!(
        state = %state.code(),
        year = %state.year,
        package = %state.gpkg_path.display(),
        layers = geographies.len(),
        "Starting package build"
    );

    // Package file first: failure here is the one unrecoverable error
    let pool = acquire_package(&state.gpkg_path, true).await?;
    pool.close().await;

    let result = run_phases(request, &catalog, &geographies, &mut report, progress).await;
    match &result {
        Ok(()) => {
            report.transition_to(BuildPhase::Completed);
            info!(
                state = %state.code(),
                layers = report.layers.len(),
                warnings = report.warnings.len(),
                "Package build completed"
            );
        }
        Err(PipelineError::Cancelled) => {
            report.transition_to(BuildPhase::Cancelled);
            warn!(state = %state.code(), phase = ?report.phase, "Package build cancelled");
        }
        Err(_) => report.transition_to(BuildPhase::Failed),
    }
    result.map(|_| report)
}

async fn acquire_package(path: &Path, create: bool) -> Result<SqlitePool, PipelineError> {
    let pool = if create && !path.exists() {
        create_package(path).await
    } else {
        open_package(path).await
    };
    pool.map_err(PipelineError::PackageCreation)
}

/// Downloaded and extracted inputs
struct Inputs {
    pl_dir: PathBuf,
    /// Geography code → extracted `.shp`
    shapefiles: HashMap<String, PathBuf>,
    cvap_files: Option<Vec<PathBuf>>,
}

async fn run_phases(
    request: &BuildRequest,
    catalog: &GeographyCatalog,
    geographies: &[&Geography],
    report: &mut BuildReport,
    progress: &Progress,
) -> Result<(), PipelineError> {
    let state = &request.state;
    let scoped = |phase: BuildPhase| {
        let (from, to) = phase.progress_range();
        progress.scoped(from, to)
    };

    report.transition_to(BuildPhase::Downloading);
    let inputs = download_inputs(request, geographies, report, &scoped(BuildPhase::Downloading)).await?;

    report.transition_to(BuildPhase::Tabulating);
    let tabulating = scoped(BuildPhase::Tabulating);
    tabulating.checkpoint(0.0)?;
    let table = TabulationLoader::new(catalog, state.code(), state.year).load(&inputs.pl_dir)?;
    for geography in geographies {
        let rows: usize = geography.summary_levels.iter().map(|s| table.rows_at(s).count()).sum();
        if rows == 0 {
            warn!(geography = geography.code, "No tabulation rows at this level");
            report.warnings.push(format!("{}: no tabulation rows", geography.code));
        }
    }
    tabulating.checkpoint(100.0)?;

    report.transition_to(BuildPhase::WritingLayers);
    write_layers(request, catalog, geographies, &inputs, &table, report, &scoped(BuildPhase::WritingLayers)).await?;
    drop(table);

    report.transition_to(BuildPhase::Cvap);
    let cvap_progress = scoped(BuildPhase::Cvap);
    match inputs.cvap_files {
        Some(files) => {
            let pool = acquire_package(&state.gpkg_path, false).await?;
            let result = CvapProcessor::new(&pool, catalog, state, files)
                .process(&cvap_progress)
                .await;
            pool.close().await;
            report.cvap = result?;
        }
        None => cvap_progress.checkpoint(100.0)?,
    }

    let block_table = catalog.block().table_name(state.year);

    report.transition_to(BuildPhase::VoterFile);
    let voter_progress = scoped(BuildPhase::VoterFile);
    if let Some(path) = &request.voter_file {
        let pool = acquire_package(&state.gpkg_path, false).await?;
        let result = import_voter_file(&pool, &block_table, state.year, path, &voter_progress).await;
        pool.close().await;
        report.voter_file_imported = result?;
    }
    voter_progress.checkpoint(100.0)?;

    report.transition_to(BuildPhase::Equivalency);
    let equivalency_progress = scoped(BuildPhase::Equivalency);
    let files = request.equivalency.len();
    for (i, file) in request.equivalency.iter().enumerate() {
        let slice = equivalency_progress.scoped(
            100.0 * i as f64 / files as f64,
            100.0 * (i + 1) as f64 / files as f64,
        );
        let pool = acquire_package(&state.gpkg_path, false).await?;
        let result = import_equivalency(&pool, &block_table, file, &slice).await;
        pool.close().await;
        if result? {
            report.equivalency_imported += 1;
        }
    }
    equivalency_progress.checkpoint(100.0)?;

    progress.checkpoint(100.0)?;
    Ok(())
}

fn extraction_dir(request: &BuildRequest, kind: &str) -> PathBuf {
    request
        .config
        .cache_dir
        .join("extracted")
        .join(format!("{}{}", request.state.code().to_ascii_lowercase(), request.state.year))
        .join(kind)
}

async fn download_inputs(
    request: &BuildRequest,
    geographies: &[&Geography],
    report: &mut BuildReport,
    progress: &Progress,
) -> Result<Inputs, PipelineError> {
    let state = &request.state;
    let base = request.config.census_base_url.as_str();
    let downloader = CensusDownloader::new(&request.config)?;

    let tiger_layers: Vec<&&Geography> = geographies
        .iter()
        .filter(|g| g.shapefile.is_some() && request.shapefile_for(g.code).is_none())
        .collect();
    let total = tiger_layers.len() + 2;
    let mut done = 0usize;

    let pl_archive = downloader.fetch(&pl_archive_url(base, state.info, state.year)).await?;
    let pl_dir = extraction_dir(request, "pl");
    extract_archive(&pl_archive, &pl_dir)?;
    done += 1;
    progress.step(done, total)?;

    let mut shapefiles: HashMap<String, PathBuf> = request
        .shapefiles
        .iter()
        .map(|s| (s.layer.clone(), s.path.clone()))
        .collect();

    for geography in tiger_layers {
        let Some(layer) = geography.shapefile else {
            continue;
        };
        let url = tiger_url(base, state.info, state.year, layer);
        match downloader.fetch(&url).await {
            Ok(archive) => {
                let files = extract_archive(&archive, &extraction_dir(request, layer))?;
                match find_with_suffix(&files, ".shp") {
                    Some(shp) => {
                        shapefiles.insert(geography.code.to_string(), shp);
                    }
                    None => {
                        warn!(layer, "TIGER archive has no .shp, will dissolve");
                        report.warnings.push(format!("{}: no shapefile in archive", geography.code));
                    }
                }
            }
            Err(DownloadError::NotFound(url)) if !geography.is_block() => {
                warn!(geography = geography.code, url = %url, "No TIGER file published, will dissolve");
            }
            Err(e) => return Err(e.into()),
        }
        done += 1;
        progress.step(done, total)?;
    }

    let cvap_year = request.cvap_year();
    let cvap_files = match downloader.fetch(&cvap_url(base, cvap_year)).await {
        Ok(archive) => Some(extract_archive(&archive, &extraction_dir(request, &format!("cvap{}", cvap_year)))?),
        Err(e) => {
            warn!(cvap_year, error = %e, "CVAP estimates unavailable, skipping CVAP");
            report.warnings.push(format!("cvap {}: {}", cvap_year, e));
            None
        }
    };
    progress.step(total, total)?;

    Ok(Inputs {
        pl_dir,
        shapefiles,
        cvap_files,
    })
}

async fn write_layers(
    request: &BuildRequest,
    catalog: &GeographyCatalog,
    geographies: &[&Geography],
    inputs: &Inputs,
    table: &TabulationTable,
    report: &mut BuildReport,
    progress: &Progress,
) -> Result<(), PipelineError> {
    let year = request.state.year;
    let block = catalog.block();
    let block_sumlev = block.summary_levels.first().copied().unwrap_or("750");

    let block_path = inputs
        .shapefiles
        .get(block.code)
        .ok_or_else(|| PipelineError::Layer {
            table: block.table_name(year),
            message: "no block shapefile".to_string(),
        })?;
    let blocks: Vec<Feature> = load_shapefile(block_path, year)?;
    progress.checkpoint(5.0)?;

    let pool = acquire_package(&request.state.gpkg_path, false).await?;
    let total = geographies.len();
    for (i, geography) in geographies.iter().enumerate() {
        let features = if geography.is_block() {
            blocks.clone()
        } else {
            match inputs.shapefiles.get(geography.code) {
                Some(path) => load_shapefile(path, year)?,
                None => {
                    info!(geography = geography.code, "Dissolving blocks");
                    dissolve_blocks(geography, &blocks, table, block_sumlev)
                }
            }
        };

        let records = join_tabulation(geography, year, features, table);
        let outcome = write_layer(&pool, geography, year, records).await;
        if !outcome.success {
            report
                .warnings
                .push(format!("{}: {}", outcome.table, outcome.error.clone().unwrap_or_default()));
            if geography.is_block() {
                pool.close().await;
                return Err(PipelineError::Layer {
                    table: outcome.table,
                    message: outcome.error.unwrap_or_default(),
                });
            }
        }
        report.layers.push(outcome);
        progress.scoped(5.0, 100.0).step(i + 1, total)?;
    }
    pool.close().await;
    Ok(())
}
