//! Errors raised by the stages downstream of the intake queue

use std::path::PathBuf;

use crate::handle::LocalFileHandle;

/// Error from the processing stage.
///
/// Both variants carry the handle back so the worker decides its fate:
/// a `Failed` file is still cleaned up, a `Fatal` one is left in staging.
#[derive(Debug)]
pub enum ProcessError {
    /// Domain logic failed; the local copy is disposable.
    Failed {
        handle: LocalFileHandle,
        message: String,
    },
    /// The local copy must be kept for inspection.
    Fatal {
        handle: LocalFileHandle,
        message: String,
    },
}

impl std::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed { handle, message } => {
                write!(f, "processing {} failed: {message}", handle.remote_name())
            }
            Self::Fatal { handle, message } => {
                write!(f, "processing {} failed fatally: {message}", handle.remote_name())
            }
        }
    }
}

impl std::error::Error for ProcessError {}

impl ProcessError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}

/// Failure to delete a local copy. Logged by the worker, never retried.
#[derive(Debug)]
pub struct CleanupError {
    pub path: PathBuf,
    pub source: std::io::Error,
}

impl std::fmt::Display for CleanupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "couldn't delete {}: {}", self.path.display(), self.source)
    }
}

impl std::error::Error for CleanupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}
