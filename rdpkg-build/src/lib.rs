//! rdpkg-build library
//!
//! Builds a per-state redistricting GeoPackage from PL 94-171 tabulations,
//! TIGER/Line boundaries and CVAP estimates, with optional voter-file and
//! block-equivalency overlays.

pub mod error;
pub mod models;
pub mod services;
pub mod utils;
pub mod workflow;

pub use error::PipelineError;
pub use models::{BuildReport, BuildRequest, EquivalencyFile, ShapefileOverride};
pub use workflow::{build_package, run_build};
