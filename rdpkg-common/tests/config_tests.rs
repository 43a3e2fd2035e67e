//! Configuration resolution tests
//!
//! Priority order: command line > environment > TOML file > default.
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that manipulate RDPKG_* variables are marked with #[serial].

use rdpkg_common::config::{
    load_toml_config, ConfigOverrides, PipelineConfig, DEFAULT_CENSUS_BASE_URL, ENV_CACHE_DIR,
    ENV_CENSUS_BASE_URL, ENV_CONFIG_FILE, ENV_OFFLINE,
};
use rdpkg_common::Error;
use serial_test::serial;
use std::env;
use std::path::PathBuf;

fn clear_env() {
    env::remove_var(ENV_CONFIG_FILE);
    env::remove_var(ENV_CACHE_DIR);
    env::remove_var(ENV_CENSUS_BASE_URL);
    env::remove_var(ENV_OFFLINE);
}

fn write_config(dir: &tempfile::TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("rdpkg.toml");
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
#[serial]
fn test_cli_beats_env_beats_toml() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let config_file = write_config(
        &dir,
        r#"
        cache_dir = "/from/toml"
        census_base_url = "http://toml.local"
        "#,
    );

    env::set_var(ENV_CACHE_DIR, "/from/env");

    let overrides = ConfigOverrides {
        config_file: Some(config_file.clone()),
        cache_dir: Some(PathBuf::from("/from/cli")),
        ..Default::default()
    };
    let config = PipelineConfig::resolve(&overrides).unwrap();
    assert_eq!(config.cache_dir, PathBuf::from("/from/cli"));
    assert_eq!(config.census_base_url, "http://toml.local");

    let overrides = ConfigOverrides {
        config_file: Some(config_file),
        ..Default::default()
    };
    let config = PipelineConfig::resolve(&overrides).unwrap();
    assert_eq!(config.cache_dir, PathBuf::from("/from/env"));

    clear_env();
}

#[test]
#[serial]
fn test_config_file_from_env() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let config_file = write_config(&dir, "offline = true\ndownload_timeout_secs = 7\n");
    env::set_var(ENV_CONFIG_FILE, &config_file);

    let config = PipelineConfig::resolve(&ConfigOverrides::default()).unwrap();
    assert!(config.offline);
    assert_eq!(config.download_timeout.as_secs(), 7);
    assert_eq!(config.census_base_url, DEFAULT_CENSUS_BASE_URL);

    clear_env();
}

#[test]
#[serial]
fn test_offline_env_values() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let config_file = write_config(&dir, "");
    let overrides = ConfigOverrides {
        config_file: Some(config_file),
        ..Default::default()
    };

    env::set_var(ENV_OFFLINE, "TRUE");
    assert!(PipelineConfig::resolve(&overrides).unwrap().offline);
    env::set_var(ENV_OFFLINE, "0");
    assert!(!PipelineConfig::resolve(&overrides).unwrap().offline);

    clear_env();
}

#[test]
#[serial]
fn test_invalid_base_url_fails_fast() {
    clear_env();
    env::set_var(ENV_CENSUS_BASE_URL, "www2.census.gov");
    let dir = tempfile::tempdir().unwrap();
    let overrides = ConfigOverrides {
        config_file: Some(write_config(&dir, "")),
        ..Default::default()
    };
    let result = PipelineConfig::resolve(&overrides);
    assert!(matches!(result, Err(Error::Config(_))));
    clear_env();
}

#[test]
fn test_explicit_missing_config_file_is_error() {
    let result = load_toml_config(Some(&PathBuf::from("/nonexistent/rdpkg-test-config.toml")));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_malformed_config_file_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "offline = \"maybe\"\n[[[");
    assert!(matches!(load_toml_config(Some(&path)), Err(Error::Config(_))));
}

#[test]
fn test_with_cache_dir_defaults() {
    let config = PipelineConfig::with_cache_dir("/tmp/rdpkg-cache");
    assert_eq!(config.cache_dir, PathBuf::from("/tmp/rdpkg-cache"));
    assert_eq!(config.census_base_url, DEFAULT_CENSUS_BASE_URL);
    assert!(!config.offline);
}
