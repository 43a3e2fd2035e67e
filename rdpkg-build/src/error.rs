//! Error types for rdpkg-build
//!
//! Each service has its own error enum; [`PipelineError`] collects them at
//! the build entry point. Cancellation from any service is lifted to
//! [`PipelineError::Cancelled`] so callers only need to check one variant.

use crate::services::cvap::CvapError;
use crate::services::downloader::DownloadError;
use crate::services::geometry::GeometryError;
use crate::services::overlay::OverlayError;
use crate::services::tabulation::TabulationError;
use rdpkg_common::Cancelled;
use thiserror::Error;

/// Build pipeline error
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Build cancelled through the progress token
    #[error("Build cancelled")]
    Cancelled,

    /// The package file could not be created or opened
    #[error("Package creation failed: {0}")]
    PackageCreation(#[source] rdpkg_common::Error),

    #[error("Download failed: {0}")]
    Download(DownloadError),

    #[error("Tabulation failed: {0}")]
    Tabulation(#[from] TabulationError),

    #[error("Geometry failed: {0}")]
    Geometry(#[from] GeometryError),

    #[error("CVAP processing failed: {0}")]
    Cvap(CvapError),

    #[error("Overlay failed: {0}")]
    Overlay(OverlayError),

    #[error("Layer {table} failed: {message}")]
    Layer { table: String, message: String },

    #[error(transparent)]
    Common(#[from] rdpkg_common::Error),
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}

impl From<Cancelled> for PipelineError {
    fn from(_: Cancelled) -> Self {
        PipelineError::Cancelled
    }
}

impl From<DownloadError> for PipelineError {
    fn from(e: DownloadError) -> Self {
        PipelineError::Download(e)
    }
}

impl From<CvapError> for PipelineError {
    fn from(e: CvapError) -> Self {
        match e {
            CvapError::Cancelled(_) => PipelineError::Cancelled,
            other => PipelineError::Cvap(other),
        }
    }
}

impl From<OverlayError> for PipelineError {
    fn from(e: OverlayError) -> Self {
        match e {
            OverlayError::Cancelled(_) => PipelineError::Cancelled,
            other => PipelineError::Overlay(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_lifted() {
        assert!(PipelineError::from(CvapError::Cancelled(Cancelled)).is_cancelled());
        assert!(PipelineError::from(OverlayError::Cancelled(Cancelled)).is_cancelled());
        assert!(PipelineError::from(Cancelled).is_cancelled());
        assert!(!PipelineError::from(CvapError::MissingBlocks).is_cancelled());
    }
}
