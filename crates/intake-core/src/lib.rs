//! Intake Core - Common infrastructure for file intake pipelines
//!
//! This crate provides the transport-agnostic half of the pipeline:
//! the bounded intake queue, the fixed-delay poller, the processing and
//! cleanup stages, shutdown handling, logging and progress bars.

pub mod error;
pub mod handle;
pub mod logging;
pub mod poller;
pub mod progress;
pub mod queue;
pub mod shutdown;
pub mod stage;
pub mod staging;

// Re-exports for convenience
pub use error::{CleanupError, ProcessError};
pub use handle::LocalFileHandle;
pub use logging::{init_logging, IndicatifLogger, Verbosity};
pub use poller::{PollSource, Poller, PollerStats};
pub use progress::{ProgressContext, SharedProgress};
pub use queue::{IntakeQueue, PushError};
pub use shutdown::Shutdown;
pub use stage::{cleanup, run_worker, FileProcessor, LoggingProcessor, WorkerStats};
