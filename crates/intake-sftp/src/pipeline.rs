//! End-to-end wiring: staging recovery, poller, bounded queue, workers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use intake_core::{
    run_worker, staging, FileProcessor, IntakeQueue, LocalFileHandle, Poller, PollerStats,
    SharedProgress, Shutdown, WorkerStats,
};
use intake_store::MetadataStore;

use crate::error::PipelineError;
use crate::filter::{CompositeFilter, PatternFilter};
use crate::session::Connect;
use crate::synchronizer::{SyncSettings, Synchronizer};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub sync: SyncSettings,
    pub file_pattern: String,
    /// Metadata store namespace of this pipeline
    pub namespace: String,
    pub poll_period: Duration,
    pub queue_capacity: usize,
    pub workers: usize,
}

/// Totals reported when a pipeline stops.
#[derive(Debug)]
pub struct PipelineSummary {
    pub recovered: usize,
    pub poller: PollerStats,
    pub workers: WorkerStats,
    pub elapsed: Duration,
}

impl PipelineSummary {
    pub fn log(&self) {
        if self.recovered > 0 {
            log::info!("Recovered {} files from staging", self.recovered);
        }
        self.poller.log();
        self.workers.log();
        log::info!("Pipeline stopped after {:.1?}", self.elapsed);
    }
}

pub struct Pipeline<C: Connect> {
    synchronizer: Synchronizer<C>,
    pattern: PatternFilter,
    settings: PipelineSettings,
    shutdown: Shutdown,
}

impl<C: Connect> Pipeline<C> {
    pub fn new(
        connector: C,
        store: Arc<dyn MetadataStore>,
        settings: PipelineSettings,
        progress: SharedProgress,
        shutdown: Shutdown,
    ) -> Result<Self, PipelineError> {
        let invalid = |source| PipelineError::InvalidPattern {
            pattern: settings.file_pattern.clone(),
            source,
        };
        let pattern = PatternFilter::new(&settings.file_pattern).map_err(invalid)?;
        let filter = CompositeFilter::standard(&settings.file_pattern, store, &settings.namespace)
            .map_err(invalid)?;
        let synchronizer = Synchronizer::new(connector, filter, settings.sync.clone(), progress);

        Ok(Self {
            synchronizer,
            pattern,
            settings,
            shutdown,
        })
    }

    /// Run until shutdown is requested, then drain the queue and stop.
    ///
    /// Files a previous run left in staging are processed before the first
    /// poll. Blocks the calling thread.
    pub fn run(
        mut self,
        processor: &dyn FileProcessor,
    ) -> Result<PipelineSummary, PipelineError> {
        let started = Instant::now();
        let recovered = self.prepare_staging()?;
        let recovered_count = recovered.len();

        let workers = self.settings.workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers + 1)
            .thread_name(|i| format!("intake-{i}"))
            .build()
            .map_err(PipelineError::ThreadPool)?;

        let queue = IntakeQueue::new(self.settings.queue_capacity);
        let worker_stats = WorkerStats::default();
        let poller = Poller::new(self.settings.poll_period, self.shutdown.clone());
        let synchronizer = &mut self.synchronizer;

        log::info!(
            "Polling {} every {:?} for {:?} with {} workers (queue capacity {})",
            self.settings.sync.remote_directory,
            self.settings.poll_period,
            self.settings.file_pattern,
            workers,
            queue.capacity()
        );

        let poller_stats = pool.scope(|s| {
            for _ in 0..workers {
                s.spawn(|_| run_worker(&queue, processor, &worker_stats));
            }

            let mut stats = PollerStats::default();
            for handle in recovered {
                match queue.push(handle) {
                    Ok(()) => stats.enqueued += 1,
                    Err(_) => stats.abandoned += 1,
                }
            }

            let polled = poller.run(synchronizer, &queue);
            queue.close();

            stats.cycles = polled.cycles;
            stats.failed_cycles = polled.failed_cycles;
            stats.backpressured_cycles = polled.backpressured_cycles;
            stats.enqueued += polled.enqueued;
            stats.abandoned += polled.abandoned;
            stats
        });

        Ok(PipelineSummary {
            recovered: recovered_count,
            poller: poller_stats,
            workers: worker_stats,
            elapsed: started.elapsed(),
        })
    }

    /// Create the staging directory, drop partial downloads and collect
    /// complete files nobody processed.
    fn prepare_staging(&self) -> Result<Vec<LocalFileHandle>, PipelineError> {
        let dir = &self.settings.sync.local_directory;
        let staging_err = |source| PipelineError::Staging {
            path: dir.clone(),
            source,
        };
        staging::ensure_dir(dir).map_err(staging_err)?;
        let removed = staging::cleanup_writing_files(dir).map_err(staging_err)?;
        if removed > 0 {
            log::info!("Removed {removed} partial downloads from {}", dir.display());
        }
        staging::recover(dir, self.pattern.pattern()).map_err(staging_err)
    }
}
