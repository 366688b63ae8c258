//! Graceful shutdown support via a shared atomic flag

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Granularity of [`Shutdown::sleep`]: how quickly a sleeping poller notices a request.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Cloneable shutdown flag shared by the poller, workers and signal handlers.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if shutdown was requested
    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Request shutdown. Returns `true` if it had already been requested.
    pub fn request(&self) -> bool {
        self.flag.swap(true, Ordering::Relaxed)
    }

    /// Sleep for `duration`, returning early if shutdown is requested.
    ///
    /// Returns `true` if the full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }

    /// Register SIGINT/SIGTERM handlers.
    ///
    /// First signal: set the graceful shutdown flag.
    /// Second signal: force exit with code 130.
    pub fn install_signal_handlers(&self) -> std::io::Result<()> {
        for signal in [signal_hook::consts::SIGTERM, signal_hook::consts::SIGINT] {
            let flag = self.flag.clone();
            // SAFETY: the handler only does an atomic swap and `low_level::exit`,
            // which calls `_exit` without running atexit handlers or destructors
            unsafe {
                signal_hook::low_level::register(signal, move || {
                    if flag.swap(true, Ordering::Relaxed) {
                        signal_hook::low_level::exit(130);
                    }
                })?;
            }
        }
        Ok(())
    }
}
