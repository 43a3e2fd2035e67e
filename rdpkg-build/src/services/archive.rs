//! Zip archive extraction

use crate::services::downloader::DownloadError;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Extract `archive` into `destination`, returning the extracted file paths
pub fn extract_archive(archive: &Path, destination: &Path) -> Result<Vec<PathBuf>, DownloadError> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| DownloadError::Archive(format!("{}: {}", archive.display(), e)))?;

    std::fs::create_dir_all(destination)?;
    zip.extract(destination)
        .map_err(|e| DownloadError::Archive(format!("{}: {}", archive.display(), e)))?;

    let extracted: Vec<PathBuf> = zip
        .file_names()
        .filter(|name| !name.ends_with('/'))
        .map(|name| destination.join(name))
        .collect();

    debug!(
        archive = %archive.display(),
        files = extracted.len(),
        "Extracted archive"
    );
    Ok(extracted)
}

/// Find the first extracted file whose name ends with `suffix` (case-insensitive)
pub fn find_with_suffix(files: &[PathBuf], suffix: &str) -> Option<PathBuf> {
    let suffix = suffix.to_ascii_lowercase();
    files
        .iter()
        .find(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().to_ascii_lowercase().ends_with(&suffix))
                .unwrap_or(false)
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, body) in entries {
            writer
                .start_file(*name, zip::write::FileOptions::default())
                .unwrap();
            writer.write_all(body).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_extract_and_find() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("ri2020.pl.zip");
        write_zip(
            &archive,
            &[("rigeo2020.pl", b"header"), ("ri000012020.pl", b"seg")],
        );

        let out = dir.path().join("out");
        let files = extract_archive(&archive, &out).unwrap();
        assert_eq!(files.len(), 2);
        let header = find_with_suffix(&files, "GEO2020.PL").unwrap();
        assert_eq!(std::fs::read(header).unwrap(), b"header");
        assert!(find_with_suffix(&files, ".shp").is_none());
    }

    #[test]
    fn test_corrupt_archive_is_archive_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bad.zip");
        std::fs::write(&archive, b"not a zip").unwrap();
        assert!(matches!(
            extract_archive(&archive, dir.path()),
            Err(DownloadError::Archive(_))
        ));
    }
}
