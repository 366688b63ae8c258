//! Error types for remote sessions and synchronization cycles

use std::fmt;
use std::path::PathBuf;

use intake_store::StoreError;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Why the server's host key was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyProblem {
    /// Server sent no host key at all
    Missing,
    /// Key not in known_hosts and policy is strict
    Unknown,
    /// Key differs from the one recorded in known_hosts
    Mismatch,
    /// known_hosts lookup itself failed
    CheckFailed,
}

impl fmt::Display for HostKeyProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "server presented no host key"),
            Self::Unknown => write!(f, "host key is not in known_hosts"),
            Self::Mismatch => write!(f, "host key does not match known_hosts"),
            Self::CheckFailed => write!(f, "known_hosts check failed"),
        }
    }
}

/// Failure to open a session to the remote server.
#[derive(Debug)]
pub enum ConnectionError {
    /// TCP connect or name resolution failed.
    Unreachable {
        target: String,
        source: std::io::Error,
    },
    /// SSH handshake or SFTP subsystem setup failed.
    Protocol { target: String, source: BoxError },
    HostKey {
        target: String,
        problem: HostKeyProblem,
    },
    Auth {
        target: String,
        user: String,
        source: Option<BoxError>,
    },
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable { target, source } => {
                write!(f, "cannot reach {target}: {source}")
            }
            Self::Protocol { target, source } => {
                write!(f, "session setup with {target} failed: {source}")
            }
            Self::HostKey { target, problem } => {
                write!(f, "host key rejected for {target}: {problem}")
            }
            Self::Auth {
                target,
                user,
                source,
            } => {
                write!(f, "authentication as {user} on {target} failed")?;
                if let Some(e) = source {
                    write!(f, ": {e}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Unreachable { source, .. } => Some(source),
            Self::Protocol { source, .. } => Some(source.as_ref()),
            Self::Auth {
                source: Some(e), ..
            } => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// A remote operation (list, download, remove) failed on an open session.
#[derive(Debug)]
pub struct SessionError {
    pub operation: &'static str,
    pub path: String,
    pub source: BoxError,
}

impl SessionError {
    pub fn new(
        operation: &'static str,
        path: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self {
            operation,
            path: path.into(),
            source: source.into(),
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "remote {} of {} failed: {}", self.operation, self.path, self.source)
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Failure fetching one file. The cycle continues with the next entry.
#[derive(Debug)]
pub enum DownloadError {
    Remote(SessionError),
    Local {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Remote name would escape the staging directory.
    UnsafeName(String),
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(e) => write!(f, "{e}"),
            Self::Local { path, source } => write!(f, "writing {}: {source}", path.display()),
            Self::UnsafeName(name) => write!(f, "refusing unsafe remote file name {name:?}"),
        }
    }
}

impl std::error::Error for DownloadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Remote(e) => Some(e),
            Self::Local { source, .. } => Some(source),
            Self::UnsafeName(_) => None,
        }
    }
}

/// A synchronization cycle that produced nothing.
#[derive(Debug)]
pub enum SyncError {
    Connection(ConnectionError),
    Listing(SessionError),
    /// Metadata store failed; the cycle is aborted so nothing is fetched twice.
    Store(StoreError),
    Staging {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl SyncError {
    /// Failures of the remote link itself; the cached session is not reused.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Listing(_))
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "{e}"),
            Self::Listing(e) => write!(f, "{e}"),
            Self::Store(e) => write!(f, "{e}"),
            Self::Staging { path, source } => {
                write!(f, "staging directory {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            Self::Listing(e) => Some(e),
            Self::Store(e) => Some(e),
            Self::Staging { source, .. } => Some(source),
        }
    }
}

impl From<ConnectionError> for SyncError {
    fn from(e: ConnectionError) -> Self {
        Self::Connection(e)
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// Pipeline could not be assembled or started.
#[derive(Debug)]
pub enum PipelineError {
    InvalidPattern {
        pattern: String,
        source: glob::PatternError,
    },
    Staging {
        path: PathBuf,
        source: std::io::Error,
    },
    ThreadPool(rayon::ThreadPoolBuildError),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPattern { pattern, source } => {
                write!(f, "invalid file pattern {pattern:?}: {source}")
            }
            Self::Staging { path, source } => {
                write!(f, "preparing staging directory {}: {source}", path.display())
            }
            Self::ThreadPool(e) => write!(f, "cannot start worker pool: {e}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidPattern { source, .. } => Some(source),
            Self::Staging { source, .. } => Some(source),
            Self::ThreadPool(e) => Some(e),
        }
    }
}
