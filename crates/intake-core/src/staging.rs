//! Local staging directory helpers: temp naming, stale cleanup, recovery

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};

use crate::handle::LocalFileHandle;

/// Extension appended while a download is in flight.
pub const WRITING_EXTENSION: &str = "writing";

/// How file name globs are matched, for remote listings and staged files alike.
pub const NAME_MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Temp path a download is written to before the rename into `final_path`.
pub fn writing_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_owned();
    name.push(".");
    name.push(WRITING_EXTENSION);
    PathBuf::from(name)
}

/// Create the staging directory if absent.
pub fn ensure_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

/// Remove `.writing` files left by an interrupted download.
///
/// Returns how many were removed. A missing directory is not an error.
pub fn cleanup_writing_files(dir: &Path) -> io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == WRITING_EXTENSION) {
            log::warn!("Removing stale partial download: {}", path.display());
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Collect complete files a previous run downloaded but never cleaned up.
///
/// Only names matching `pattern` are returned, sorted by name.
pub fn recover(dir: &Path, pattern: &Pattern) -> io::Result<Vec<LocalFileHandle>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            log::warn!("Skipping non UTF-8 staging entry: {}", path.display());
            continue;
        };
        if pattern.matches_with(name, NAME_MATCH_OPTIONS) {
            let name = name.to_string();
            found.push(LocalFileHandle::new(path, name));
        }
    }
    found.sort_by(|a, b| a.remote_name().cmp(b.remote_name()));
    if !found.is_empty() {
        log::info!(
            "Recovered {} unprocessed files from {}",
            found.len(),
            dir.display()
        );
    }
    Ok(found)
}
