//! # rdpkg common library
//!
//! Shared code for the redistricting package builder:
//! - State and census-year identification
//! - Geography catalog and population field definitions
//! - GeoPackage creation, layer schemas and additive steps
//! - Configuration loading
//! - Progress reporting and cancellation

pub mod config;
pub mod db;
pub mod error;
pub mod geography;
pub mod population;
pub mod progress;
pub mod state;

pub use error::{Error, Result};
pub use progress::{Cancelled, Progress};
pub use state::{DecennialYear, State};
