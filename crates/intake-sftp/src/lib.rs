//! SFTP source for the intake pipeline
//!
//! Lists a remote directory on a fixed schedule, keeps only files whose
//! name matches a glob and whose modification marker has not been seen
//! before, downloads them into a local staging directory and hands them to
//! the intake queue. Markers are persisted in an [`intake_store`] backend so
//! restarts do not refetch.

pub mod entry;
pub mod error;
pub mod filter;
pub mod memory;
pub mod pipeline;
pub mod session;
pub mod sftp;
pub mod synchronizer;

pub use entry::{Marker, RemoteFileEntry};
pub use error::{ConnectionError, DownloadError, PipelineError, SessionError, SyncError};
pub use filter::{CompositeFilter, FileListFilter, PatternFilter, PersistentAcceptOnceFilter};
pub use memory::{MemoryConnector, MemoryRemote};
pub use pipeline::{Pipeline, PipelineSettings, PipelineSummary};
pub use session::{CachingSessionFactory, Connect, RemoteSession};
pub use sftp::{Credentials, HostKeyPolicy, SftpConnector, SftpSettings};
pub use synchronizer::{CycleSummary, SyncSettings, Synchronizer};
