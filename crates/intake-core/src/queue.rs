//! Bounded blocking FIFO between the poller and the processing workers.
//!
//! Uses `Mutex + Condvar` from std, the same way a counting semaphore would:
//! producers wait on `not_full`, consumers wait on `not_empty`.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Instant;

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded multi-producer, multi-consumer queue.
///
/// Every pushed item is handed to exactly one [`pop`](IntakeQueue::pop) caller.
/// Nothing is ever dropped: a push that cannot complete gives the item back.
pub struct IntakeQueue<T> {
    state: Mutex<State<T>>,
    capacity: usize,
    not_empty: Condvar,
    not_full: Condvar,
}

/// Why a push did not enqueue its item. The item is returned to the caller.
#[derive(Debug, PartialEq, Eq)]
pub enum PushError<T> {
    /// Deadline passed while the queue stayed full.
    Full(T),
    /// Queue was closed; no consumer will ever see the item.
    Closed(T),
}

impl<T> PushError<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(item) | Self::Closed(item) => item,
        }
    }
}

impl<T> IntakeQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Block until there is room, then enqueue.
    pub fn push(&self, item: T) -> Result<(), PushError<T>> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(PushError::Closed(item));
            }
            if state.items.len() < self.capacity {
                break;
            }
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Block until there is room or `deadline` passes.
    ///
    /// On timeout the item comes back as [`PushError::Full`] so the caller can
    /// hold it and retry later.
    pub fn push_until(&self, item: T, deadline: Instant) -> Result<(), PushError<T>> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(PushError::Closed(item));
            }
            if state.items.len() < self.capacity {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(PushError::Full(item));
            }
            state = self
                .not_full
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Block until an item is available.
    ///
    /// Returns `None` only after [`close`](IntakeQueue::close) once the
    /// remaining items have been drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Stop accepting pushes and wake every waiter.
    ///
    /// Items already queued are still delivered by `pop`.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    // Poison is ignored: state is consistent between operations.
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> std::fmt::Debug for IntakeQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntakeQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn fifo_order() {
        let q = IntakeQueue::new(3);
        q.push(1).unwrap();
        q.push(2).unwrap();
        q.push(3).unwrap();
        assert_eq!(q.len(), 3);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
        assert!(q.is_empty());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let q: IntakeQueue<i32> = IntakeQueue::new(0);
        assert_eq!(q.capacity(), 1);
    }

    #[test]
    fn push_until_returns_item_when_full() {
        let q = IntakeQueue::new(1);
        q.push("a").unwrap();
        let deadline = Instant::now() + Duration::from_millis(20);
        let err = q.push_until("b", deadline).unwrap_err();
        assert_eq!(err, PushError::Full("b"));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn push_until_succeeds_when_consumer_frees_slot() {
        let q = Arc::new(IntakeQueue::new(1));
        q.push(1).unwrap();

        let q2 = q.clone();
        let consumer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            q2.pop()
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        q.push_until(2, deadline).unwrap();
        assert_eq!(consumer.join().unwrap(), Some(1));
        assert_eq!(q.pop(), Some(2));
    }

    #[test]
    fn blocking_pop_wakes_on_push() {
        let q = Arc::new(IntakeQueue::new(2));
        let q2 = q.clone();
        let handle = std::thread::spawn(move || q2.pop());

        // Give thread time to block
        std::thread::sleep(Duration::from_millis(50));
        q.push(42).unwrap();

        assert_eq!(handle.join().unwrap(), Some(42));
    }

    #[test]
    fn close_drains_then_ends() {
        let q = IntakeQueue::new(2);
        q.push(1).unwrap();
        q.close();
        assert!(q.is_closed());
        assert_eq!(q.push(2), Err(PushError::Closed(2)));
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn close_wakes_blocked_consumers() {
        let q: Arc<IntakeQueue<i32>> = Arc::new(IntakeQueue::new(1));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let q = q.clone();
                std::thread::spawn(move || q.pop())
            })
            .collect();

        std::thread::sleep(Duration::from_millis(50));
        q.close();

        for h in handles {
            assert_eq!(h.join().unwrap(), None);
        }
    }

    #[test]
    fn competing_consumers_see_each_item_once() {
        let q = Arc::new(IntakeQueue::new(4));
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let q = q.clone();
                std::thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(v) = q.pop() {
                        seen.push(v);
                    }
                    seen
                })
            })
            .collect();

        for i in 0..200 {
            q.push(i).unwrap();
        }
        q.close();

        let mut all: Vec<i32> = consumers
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..200).collect::<Vec<_>>());
    }
}
