//! Business logic services for rdpkg-build

pub mod archive;
pub mod census_sources;
pub mod cvap;
pub mod downloader;
pub mod equivalency;
pub mod geometry;
pub mod gpkg_geometry;
pub mod overlay;
pub mod package_writer;
pub mod pl_layout;
pub mod tabulation;
pub mod voter_file;

pub use cvap::{CvapError, CvapProcessor};
pub use downloader::{CensusDownloader, DownloadError};
pub use overlay::OverlayError;
pub use package_writer::{write_layer, LayerWriteOutcome};
pub use tabulation::{TabulationLoader, TabulationTable};
