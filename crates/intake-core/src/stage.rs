//! Processing and cleanup stages fed by the intake queue

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{CleanupError, ProcessError};
use crate::handle::LocalFileHandle;
use crate::queue::IntakeQueue;

/// Business logic applied to each fetched file.
///
/// Implementations must hand the file back (directly or inside
/// [`ProcessError::Failed`]) so it reaches cleanup.
pub trait FileProcessor: Send + Sync {
    fn process(&self, handle: LocalFileHandle) -> Result<LocalFileHandle, ProcessError>;
}

/// Pass-through processor: logs the file and forwards it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingProcessor;

impl FileProcessor for LoggingProcessor {
    fn process(&self, handle: LocalFileHandle) -> Result<LocalFileHandle, ProcessError> {
        log::info!("Processed file: {}", handle.remote_name());
        Ok(handle)
    }
}

/// Delete the local copy of a processed file.
pub fn cleanup(handle: LocalFileHandle) -> Result<(), CleanupError> {
    let name = handle.remote_name().to_string();
    let path = handle.into_path();
    match fs::remove_file(&path) {
        Ok(()) => {
            log::info!("Successfully deleted file: {name}");
            Ok(())
        }
        Err(source) => Err(CleanupError { path, source }),
    }
}

/// Counters shared by all workers of one pipeline.
#[derive(Debug, Default)]
pub struct WorkerStats {
    processed: AtomicUsize,
    process_failures: AtomicUsize,
    retained: AtomicUsize,
    cleanup_failures: AtomicUsize,
}

impl WorkerStats {
    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn process_failures(&self) -> usize {
        self.process_failures.load(Ordering::Relaxed)
    }

    /// Files left in staging after a fatal processing error.
    pub fn retained(&self) -> usize {
        self.retained.load(Ordering::Relaxed)
    }

    pub fn cleanup_failures(&self) -> usize {
        self.cleanup_failures.load(Ordering::Relaxed)
    }

    pub fn log(&self) {
        log::info!(
            "Workers: {} processed ({} failed, {} retained), {} cleanup failures",
            self.processed(),
            self.process_failures(),
            self.retained(),
            self.cleanup_failures()
        );
    }
}

/// Handle a single file: process, then clean up.
pub fn handle_one(processor: &dyn FileProcessor, handle: LocalFileHandle, stats: &WorkerStats) {
    let handle = match processor.process(handle) {
        Ok(handle) => handle,
        Err(ProcessError::Failed { handle, message }) => {
            log::error!("Processing {} failed: {message}", handle.remote_name());
            stats.process_failures.fetch_add(1, Ordering::Relaxed);
            handle
        }
        Err(ProcessError::Fatal { handle, message }) => {
            log::error!(
                "Processing {} failed fatally, keeping {}: {message}",
                handle.remote_name(),
                handle.path().display()
            );
            stats.retained.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };
    stats.processed.fetch_add(1, Ordering::Relaxed);

    if let Err(e) = cleanup(handle) {
        log::warn!("Couldn't delete file: {e}");
        stats.cleanup_failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// Consume the queue until it is closed and drained.
pub fn run_worker(
    queue: &IntakeQueue<LocalFileHandle>,
    processor: &dyn FileProcessor,
    stats: &WorkerStats,
) {
    while let Some(handle) = queue.pop() {
        handle_one(processor, handle, stats);
    }
    log::debug!("worker: queue closed, exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn staged(dir: &Path, name: &str) -> LocalFileHandle {
        let path = dir.join(name);
        fs::write(&path, b"payload").unwrap();
        LocalFileHandle::new(path, name.to_string())
    }

    struct Recording {
        seen: Mutex<Vec<String>>,
    }

    impl FileProcessor for Recording {
        fn process(&self, handle: LocalFileHandle) -> Result<LocalFileHandle, ProcessError> {
            self.seen
                .lock()
                .unwrap()
                .push(handle.remote_name().to_string());
            Ok(handle)
        }
    }

    struct Failing {
        fatal: bool,
    }

    impl FileProcessor for Failing {
        fn process(&self, handle: LocalFileHandle) -> Result<LocalFileHandle, ProcessError> {
            let message = "boom".to_string();
            if self.fatal {
                Err(ProcessError::Fatal { handle, message })
            } else {
                Err(ProcessError::Failed { handle, message })
            }
        }
    }

    #[test]
    fn logging_processor_forwards_handle() {
        let dir = TempDir::new().unwrap();
        let handle = staged(dir.path(), "a.txt");
        let out = LoggingProcessor.process(handle).unwrap();
        assert_eq!(out.remote_name(), "a.txt");
        assert!(out.path().exists());
    }

    #[test]
    fn cleanup_removes_file() {
        let dir = TempDir::new().unwrap();
        let handle = staged(dir.path(), "a.txt");
        cleanup(handle).unwrap();
        assert!(!dir.path().join("a.txt").exists());
    }

    #[test]
    fn cleanup_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let handle = LocalFileHandle::new(dir.path().join("gone.txt"), "gone.txt".into());
        let err = cleanup(handle).unwrap_err();
        assert_eq!(err.source.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn handle_one_counts_cleanup_failure_without_panicking() {
        let dir = TempDir::new().unwrap();
        let stats = WorkerStats::default();
        let handle = LocalFileHandle::new(dir.path().join("gone.txt"), "gone.txt".into());
        handle_one(&LoggingProcessor, handle, &stats);
        assert_eq!(stats.processed(), 1);
        assert_eq!(stats.cleanup_failures(), 1);
    }

    #[test]
    fn failed_processing_still_cleans_up() {
        let dir = TempDir::new().unwrap();
        let stats = WorkerStats::default();
        handle_one(&Failing { fatal: false }, staged(dir.path(), "a.txt"), &stats);
        assert!(!dir.path().join("a.txt").exists());
        assert_eq!(stats.process_failures(), 1);
        assert_eq!(stats.cleanup_failures(), 0);
    }

    #[test]
    fn fatal_processing_keeps_file() {
        let dir = TempDir::new().unwrap();
        let stats = WorkerStats::default();
        handle_one(&Failing { fatal: true }, staged(dir.path(), "a.txt"), &stats);
        assert!(dir.path().join("a.txt").exists());
        assert_eq!(stats.retained(), 1);
        assert_eq!(stats.processed(), 0);
    }

    #[test]
    fn worker_drains_queue_in_order() {
        let dir = TempDir::new().unwrap();
        let queue = Arc::new(IntakeQueue::new(8));
        for name in ["a.txt", "b.txt", "c.txt"] {
            queue.push(staged(dir.path(), name)).unwrap();
        }
        queue.close();

        let processor = Recording {
            seen: Mutex::new(Vec::new()),
        };
        let stats = WorkerStats::default();
        run_worker(&queue, &processor, &stats);

        assert_eq!(
            *processor.seen.lock().unwrap(),
            vec!["a.txt", "b.txt", "c.txt"]
        );
        assert_eq!(stats.processed(), 3);
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }
}
