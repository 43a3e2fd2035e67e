//! Build inputs

use rdpkg_common::config::PipelineConfig;
use rdpkg_common::{Error, Result, State};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A block equivalency file to overlay onto the block layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquivalencyFile {
    pub path: PathBuf,
    /// Column holding block GEOIDs
    pub join_column: String,
    /// Columns to import; every other column when `None`
    pub columns: Option<Vec<String>>,
}

impl EquivalencyFile {
    /// Parse `path:join_column[:col1,col2,...]`
    pub fn parse(spec: &str) -> Result<Self> {
        let mut parts = spec.splitn(3, ':');
        let path = parts.next().filter(|p| !p.is_empty());
        let join = parts.next().filter(|j| !j.is_empty());
        let (Some(path), Some(join)) = (path, join) else {
            return Err(Error::InvalidInput(format!(
                "equivalency '{}' must be path:join_column[:columns]",
                spec
            )));
        };
        let columns = parts.next().map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(String::from)
                .collect::<Vec<_>>()
        });
        Ok(Self {
            path: PathBuf::from(path),
            join_column: join.to_string(),
            columns: columns.filter(|c| !c.is_empty()),
        })
    }
}

/// Local shapefile used instead of the TIGER download for one layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapefileOverride {
    /// Geography code, e.g. `vtd`
    pub layer: String,
    pub path: PathBuf,
}

impl ShapefileOverride {
    /// Parse `layer=path`
    pub fn parse(spec: &str) -> Result<Self> {
        match spec.split_once('=') {
            Some((layer, path)) if !layer.is_empty() && !path.is_empty() => Ok(Self {
                layer: layer.trim().to_string(),
                path: PathBuf::from(path.trim()),
            }),
            _ => Err(Error::InvalidInput(format!("shapefile '{}' must be layer=path", spec))),
        }
    }
}

/// Everything one package build needs
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub state: State,
    /// ACS release year for CVAP; the census year's default when `None`
    pub cvap_year: Option<u16>,
    /// Geography codes to build; every applicable level when `None`. Blocks are always built.
    pub geographies: Option<Vec<String>>,
    pub voter_file: Option<PathBuf>,
    pub equivalency: Vec<EquivalencyFile>,
    pub shapefiles: Vec<ShapefileOverride>,
    pub config: PipelineConfig,
}

impl BuildRequest {
    pub fn new(state: State, config: PipelineConfig) -> Self {
        Self {
            state,
            cvap_year: None,
            geographies: None,
            voter_file: None,
            equivalency: Vec::new(),
            shapefiles: Vec::new(),
            config,
        }
    }

    pub fn cvap_year(&self) -> u16 {
        self.cvap_year.unwrap_or_else(|| self.state.year.default_cvap_year())
    }

    /// Override path for a layer, if one was given
    pub fn shapefile_for(&self, layer: &str) -> Option<&PathBuf> {
        self.shapefiles.iter().find(|s| s.layer == layer).map(|s| &s.path)
    }

    /// Whether `code` is part of this build
    pub fn wants(&self, code: &str) -> bool {
        code == "block"
            || self
                .geographies
                .as_ref()
                .map_or(true, |g| g.iter().any(|c| c == code))
    }
}
