use anyhow::Result;
use std::fs::File;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

use crate::error::InputError;

/// Directory inside a packaged application that holds its original sources
pub const PACKAGED_SOURCES: &str = "META-INF/mule-src";

/// A package archive unpacked into a temporary directory. The directory is
/// removed when this value is dropped.
pub struct ExtractedArchive {
    dir: TempDir,
    root: PathBuf,
}

impl ExtractedArchive {
    /// Directory the aggregate parser should walk
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Top of the unpacked archive, where `META-INF` lives
    pub fn archive_root(&self) -> &Path {
        self.dir.path()
    }
}

pub fn is_archive(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("jar") || ext.eq_ignore_ascii_case("zip"))
            .unwrap_or(false)
}

/// Unpacks a `.jar`/`.zip` package. When the archive carries its original
/// sources under `META-INF/mule-src`, only that tree is returned, since the
/// archive root holds copies of the same configuration files.
pub fn extract_archive(path: &Path) -> Result<ExtractedArchive> {
    let archive_error = |message: String| InputError::Archive {
        path: path.to_path_buf(),
        message,
    };

    let file = File::open(path).map_err(|e| archive_error(e.to_string()))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| archive_error(e.to_string()))?;
    let dir = tempfile::tempdir().map_err(|e| archive_error(e.to_string()))?;

    info!("Extracting {} entries from {}", zip.len(), path.display());
    zip.extract(dir.path()).map_err(|e| archive_error(e.to_string()))?;

    let packaged = dir.path().join(PACKAGED_SOURCES);
    let root = if packaged.is_dir() {
        debug!("Using packaged sources at {}", packaged.display());
        packaged
    } else {
        dir.path().to_path_buf()
    };

    Ok(ExtractedArchive { dir, root })
}
