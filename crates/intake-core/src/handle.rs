//! Local file handles passed from the synchronizer to cleanup

use std::path::{Path, PathBuf};

/// A file materialized in the local staging directory.
///
/// Not `Clone`: exactly one stage owns a handle at a time. Ownership moves
/// synchronizer → queue → processing → cleanup.
#[derive(Debug, PartialEq, Eq)]
pub struct LocalFileHandle {
    path: PathBuf,
    remote_name: String,
}

impl LocalFileHandle {
    pub fn new(path: PathBuf, remote_name: String) -> Self {
        Self { path, remote_name }
    }

    /// Location in the staging directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name of the file on the remote server.
    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    pub fn into_path(self) -> PathBuf {
        self.path
    }
}

impl std::fmt::Display for LocalFileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.remote_name)
    }
}
