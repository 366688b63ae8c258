//! Metadata store contract shared by all backends

use std::fmt;

/// Durable `(namespace, key) -> value` mapping.
///
/// A successful [`put`](MetadataStore::put) must be visible to every later
/// [`get`](MetadataStore::get), including after a process restart for
/// persistent backends. Namespaces isolate pipelines sharing one store.
/// Records are never deleted through this interface.
pub trait MetadataStore: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError>;

    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError>;

    /// All records of one namespace, sorted by key.
    fn entries(&self, namespace: &str) -> Result<Vec<(String, String)>, StoreError>;
}

/// Error from a metadata store backend.
#[derive(Debug)]
pub enum StoreError {
    /// The backend rejected or failed an operation.
    Backend {
        operation: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Could not prepare the store location on disk.
    Io(std::io::Error),
    /// A previous writer panicked while holding the store.
    Poisoned,
}

impl StoreError {
    pub fn backend(
        operation: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Backend {
            operation,
            source: source.into(),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend { operation, source } => {
                write!(f, "metadata store {operation} failed: {source}")
            }
            Self::Io(e) => write!(f, "metadata store IO: {e}"),
            Self::Poisoned => write!(f, "metadata store lock poisoned"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Backend { source, .. } => Some(source.as_ref()),
            Self::Io(e) => Some(e),
            Self::Poisoned => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
