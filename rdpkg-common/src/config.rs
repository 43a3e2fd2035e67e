//! Configuration loading and cache folder resolution
//!
//! Settings are resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! Everything here is validated before the pipeline touches the network, so a
//! bad base URL fails fast with [`Error::Config`].

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit TOML config file
pub const ENV_CONFIG_FILE: &str = "RDPKG_CONFIG";
/// Environment variable overriding the download cache folder
pub const ENV_CACHE_DIR: &str = "RDPKG_CACHE_DIR";
/// Environment variable overriding the Census download host
pub const ENV_CENSUS_BASE_URL: &str = "RDPKG_CENSUS_BASE_URL";
/// Environment variable forcing cache-only operation
pub const ENV_OFFLINE: &str = "RDPKG_OFFLINE";

/// Public Census Bureau download host
pub const DEFAULT_CENSUS_BASE_URL: &str = "https://www2.census.gov";

const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 120;

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// Folder holding downloaded archives and extracted files
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Census download host (mirrors and test servers)
    #[serde(default)]
    pub census_base_url: Option<String>,

    /// Never touch the network; use cached archives only
    #[serde(default)]
    pub offline: bool,

    /// Per-request timeout for archive downloads
    #[serde(default)]
    pub download_timeout_secs: Option<u64>,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Values supplied on the command line; `None` defers to lower tiers
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_file: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub census_base_url: Option<String>,
    pub offline: bool,
}

/// Fully resolved pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub cache_dir: PathBuf,
    pub census_base_url: String,
    pub offline: bool,
    pub download_timeout: Duration,
    pub logging: LoggingConfig,
}

impl PipelineConfig {
    /// Resolve configuration from CLI overrides, environment, TOML and defaults
    pub fn resolve(overrides: &ConfigOverrides) -> Result<Self> {
        let explicit_file = overrides
            .config_file
            .clone()
            .or_else(|| std::env::var(ENV_CONFIG_FILE).ok().map(PathBuf::from));
        let toml_config = load_toml_config(explicit_file.as_deref())?;

        let cache_dir = overrides
            .cache_dir
            .clone()
            .or_else(|| std::env::var(ENV_CACHE_DIR).ok().map(PathBuf::from))
            .or_else(|| toml_config.cache_dir.clone())
            .unwrap_or_else(default_cache_dir);

        let census_base_url = overrides
            .census_base_url
            .clone()
            .or_else(|| std::env::var(ENV_CENSUS_BASE_URL).ok())
            .or_else(|| toml_config.census_base_url.clone())
            .unwrap_or_else(|| DEFAULT_CENSUS_BASE_URL.to_string());
        let census_base_url = validate_base_url(&census_base_url)?;

        let offline = overrides.offline
            || std::env::var(ENV_OFFLINE)
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false)
            || toml_config.offline;

        let download_timeout = Duration::from_secs(
            toml_config
                .download_timeout_secs
                .unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
        );

        info!(
            cache_dir = %cache_dir.display(),
            census_base_url = %census_base_url,
            offline,
            "Configuration resolved"
        );

        Ok(Self {
            cache_dir,
            census_base_url,
            offline,
            download_timeout,
            logging: toml_config.logging,
        })
    }

    /// Configuration rooted at `cache_dir` with every other value defaulted
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            census_base_url: DEFAULT_CENSUS_BASE_URL.to_string(),
            offline: false,
            download_timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            logging: LoggingConfig::default(),
        }
    }
}

/// Load the TOML config file
///
/// An explicitly named file must exist and parse. The platform default file is
/// optional: when absent a warning is logged and defaults are used.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            path.to_path_buf()
        }
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => {
                warn!("No config file found, using built-in defaults");
                return Ok(TomlConfig::default());
            }
        },
    };

    let content = std::fs::read_to_string(&path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Invalid config file {}: {}", path.display(), e)))
}

/// Check that the base URL is an absolute http(s) URL and strip trailing slashes
pub fn validate_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let rest = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .ok_or_else(|| {
            Error::Config(format!(
                "Census base URL must start with http:// or https://: '{}'",
                raw
            ))
        })?;

    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() || host.contains(char::is_whitespace) {
        return Err(Error::Config(format!(
            "Census base URL has no valid host: '{}'",
            raw
        )));
    }

    Ok(trimmed.to_string())
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("rdpkg").join("config.toml"))
}

/// Get OS-dependent default cache folder
fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("rdpkg"))
        .unwrap_or_else(|| PathBuf::from("./rdpkg_cache"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_base_url_strips_trailing_slash() {
        assert_eq!(
            validate_base_url("https://www2.census.gov/").unwrap(),
            "https://www2.census.gov"
        );
        assert_eq!(
            validate_base_url("http://localhost:8080/mirror").unwrap(),
            "http://localhost:8080/mirror"
        );
    }

    #[test]
    fn test_validate_base_url_rejects_garbage() {
        assert!(matches!(validate_base_url("ftp://x"), Err(Error::Config(_))));
        assert!(matches!(validate_base_url("https://"), Err(Error::Config(_))));
        assert!(matches!(validate_base_url("census.gov"), Err(Error::Config(_))));
    }

    #[test]
    fn test_toml_defaults() {
        let config: TomlConfig = toml::from_str("").unwrap();
        assert!(config.cache_dir.is_none());
        assert!(!config.offline);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_full() {
        let config: TomlConfig = toml::from_str(
            r#"
            cache_dir = "/tmp/rdpkg"
            census_base_url = "http://mirror.local"
            offline = true
            download_timeout_secs = 30

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/rdpkg")));
        assert!(config.offline);
        assert_eq!(config.download_timeout_secs, Some(30));
        assert_eq!(config.logging.level, "debug");
    }
}
