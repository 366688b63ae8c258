//! Fixed-delay poller driving a source into the intake queue.
//!
//! One thread, no overlapping cycles. Items a cycle produced but could not
//! enqueue before the end of its period are held and pushed first next
//! cycle; the source is not polled again until that backlog is gone.

use std::collections::VecDeque;
use std::fmt::Display;
use std::time::{Duration, Instant};

use crate::queue::{IntakeQueue, PushError};
use crate::shutdown::Shutdown;

/// Something the poller can ask for new items once per cycle.
pub trait PollSource {
    type Item;
    type Error: Display;

    fn poll(&mut self) -> Result<Vec<Self::Item>, Self::Error>;

    /// Release long-lived resources once polling has stopped.
    fn release(&mut self) {}
}

/// Counters for one poller run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollerStats {
    pub cycles: usize,
    pub failed_cycles: usize,
    pub backpressured_cycles: usize,
    pub enqueued: usize,
    /// Items that could not be handed over because the queue was closed.
    pub abandoned: usize,
}

impl PollerStats {
    pub fn log(&self) {
        log::info!(
            "Poller: {} cycles ({} failed, {} backpressured), {} files enqueued",
            self.cycles,
            self.failed_cycles,
            self.backpressured_cycles,
            self.enqueued
        );
        if self.abandoned > 0 {
            log::warn!(
                "Poller: {} fetched files were not enqueued and remain in staging",
                self.abandoned
            );
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleOutcome {
    Polled,
    Backpressured,
}

pub struct Poller {
    period: Duration,
    shutdown: Shutdown,
}

impl Poller {
    pub fn new(period: Duration, shutdown: Shutdown) -> Self {
        Self { period, shutdown }
    }

    /// Poll until shutdown is requested, then flush held items and release
    /// the source.
    pub fn run<S: PollSource>(&self, source: &mut S, queue: &IntakeQueue<S::Item>) -> PollerStats {
        let mut stats = PollerStats::default();
        let mut backlog = VecDeque::new();

        while !self.shutdown.is_requested() {
            if queue.is_closed() {
                log::warn!("Intake queue closed, stopping poller");
                break;
            }
            let outcome = self.cycle(source, queue, &mut backlog, &mut stats);
            // A backpressured cycle already waited out its period on the queue.
            if outcome == CycleOutcome::Polled && !self.shutdown.sleep(self.period) {
                break;
            }
        }

        log::info!("Stopping poller");
        while let Some(item) = backlog.pop_front() {
            match queue.push(item) {
                Ok(()) => stats.enqueued += 1,
                Err(_) => {
                    stats.abandoned += 1 + backlog.len();
                    break;
                }
            }
        }
        source.release();
        stats
    }

    /// Run a single cycle. Exposed for callers that drive their own schedule.
    pub fn run_once<S: PollSource>(
        &self,
        source: &mut S,
        queue: &IntakeQueue<S::Item>,
        backlog: &mut VecDeque<S::Item>,
        stats: &mut PollerStats,
    ) {
        self.cycle(source, queue, backlog, stats);
    }

    fn cycle<S: PollSource>(
        &self,
        source: &mut S,
        queue: &IntakeQueue<S::Item>,
        backlog: &mut VecDeque<S::Item>,
        stats: &mut PollerStats,
    ) -> CycleOutcome {
        let deadline = Instant::now() + self.period;
        stats.cycles += 1;

        if !backlog.is_empty() {
            stats.enqueued += drain(backlog, queue, deadline);
            if !backlog.is_empty() {
                log::debug!(
                    "poller: queue still full, holding {} files, skipping remote poll",
                    backlog.len()
                );
                stats.backpressured_cycles += 1;
                return CycleOutcome::Backpressured;
            }
        }

        match source.poll() {
            Ok(items) => backlog.extend(items),
            Err(e) => {
                log::error!("Poll cycle failed: {e}");
                stats.failed_cycles += 1;
            }
        }

        stats.enqueued += drain(backlog, queue, deadline);
        if !backlog.is_empty() {
            log::warn!(
                "Intake queue full, holding {} fetched files for the next cycle",
                backlog.len()
            );
        }
        CycleOutcome::Polled
    }
}

/// Push held items in order until the queue refuses one. Returns how many went in.
fn drain<T>(backlog: &mut VecDeque<T>, queue: &IntakeQueue<T>, deadline: Instant) -> usize {
    let mut pushed = 0;
    while let Some(item) = backlog.pop_front() {
        match queue.push_until(item, deadline) {
            Ok(()) => pushed += 1,
            Err(PushError::Full(item)) | Err(PushError::Closed(item)) => {
                backlog.push_front(item);
                break;
            }
        }
    }
    pushed
}
