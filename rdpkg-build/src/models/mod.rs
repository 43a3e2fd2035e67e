//! Data models for rdpkg-build

pub mod build_report;
pub mod build_request;

pub use build_report::{BuildPhase, BuildReport};
pub use build_request::{BuildRequest, EquivalencyFile, ShapefileOverride};
