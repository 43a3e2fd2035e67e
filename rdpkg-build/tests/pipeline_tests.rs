//! Build entry point: failure classification and cancellation

use rdpkg_build::{build_package, run_build, BuildRequest, PipelineError};
use rdpkg_common::config::PipelineConfig;
use rdpkg_common::{Progress, State};
use std::path::Path;
use tokio_util::sync::CancellationToken;

fn offline_request(dir: &Path) -> BuildRequest {
    let mut config = PipelineConfig::with_cache_dir(dir.join("cache"));
    config.offline = true;
    let state = State::new("RI", "2020", dir.join("ri.gpkg")).unwrap();
    BuildRequest::new(state, config)
}

#[tokio::test]
async fn test_missing_inputs_report_failure() {
    let dir = tempfile::tempdir().unwrap();
    let request = offline_request(dir.path());

    let built = build_package(&request, &Progress::silent()).await.unwrap();
    assert!(!built);
    // The package itself is created before any download
    assert!(dir.path().join("ri.gpkg").exists());
}

#[tokio::test]
async fn test_download_failure_surfaces_in_run_build() {
    let dir = tempfile::tempdir().unwrap();
    let request = offline_request(dir.path());

    let result = run_build(&request, &Progress::silent()).await;
    assert!(matches!(result, Err(PipelineError::Download(_))));
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let dir = tempfile::tempdir().unwrap();
    let request = offline_request(dir.path());
    let token = CancellationToken::new();
    token.cancel();

    let result = build_package(&request, &Progress::new(|_| {}, token)).await;
    assert!(matches!(result, Err(PipelineError::Cancelled)));
    assert!(!dir.path().join("ri.gpkg").exists());
}

#[tokio::test]
async fn test_unknown_geography_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut request = offline_request(dir.path());
    request.geographies = Some(vec!["county".to_string(), "precinct".to_string()]);

    assert!(!build_package(&request, &Progress::silent()).await.unwrap());
    assert!(matches!(
        run_build(&request, &Progress::silent()).await,
        Err(PipelineError::Common(_))
    ));
}

#[tokio::test]
async fn test_unwritable_package_location_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();

    let mut request = offline_request(dir.path());
    request.state = State::new("RI", "2020", blocker.join("ri.gpkg")).unwrap();

    let result = build_package(&request, &Progress::silent()).await;
    assert!(matches!(result, Err(PipelineError::PackageCreation(_))));
}
