//! Headless fence
//!
//! A monotonic completion counter guarded by a mutex, with a condition variable
//! standing in for the host-visible completion event. The executor thread
//! advances it; the host blocks in [`Fence::wait_for`].

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::render::api::{BackendResult, Fence};

use super::lock;

#[derive(Debug, Default)]
struct FenceInner {
    completed: Mutex<u64>,
    event: Condvar,
}

/// Fence signalled by the headless executor
#[derive(Debug, Clone, Default)]
pub struct HeadlessFence {
    inner: Arc<FenceInner>,
}

impl HeadlessFence {
    /// Create a fence with an initial completed value
    pub fn new(initial: u64) -> Self {
        let fence = Self::default();
        *lock(&fence.inner.completed) = initial;
        fence
    }

    /// Advance the completed value and wake waiters; values never go backwards
    pub(crate) fn signal(&self, value: u64) {
        let mut completed = lock(&self.inner.completed);
        if value > *completed {
            *completed = value;
        }
        self.inner.event.notify_all();
    }
}

impl Fence for HeadlessFence {
    fn completed_value(&self) -> u64 {
        *lock(&self.inner.completed)
    }

    fn wait_for(&self, value: u64, timeout: Option<Duration>) -> BackendResult<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut completed = lock(&self.inner.completed);

        while *completed < value {
            completed = match deadline {
                None => self
                    .inner
                    .event
                    .wait(completed)
                    .unwrap_or_else(std::sync::PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    self.inner
                        .event
                        .wait_timeout(completed, deadline - now)
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .0
                }
            };
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_wait_returns_immediately_when_reached() {
        let fence = HeadlessFence::new(3);
        assert!(fence.wait_for(2, Some(Duration::from_millis(1))).unwrap());
        assert!(fence.wait_for(3, None).unwrap());
    }

    #[test]
    fn test_wait_times_out() {
        let fence = HeadlessFence::new(0);
        let start = Instant::now();
        assert!(!fence.wait_for(1, Some(Duration::from_millis(20))).unwrap());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_signal_from_another_thread_wakes_waiter() {
        let fence = HeadlessFence::new(0);
        let signaller = fence.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            signaller.signal(1);
        });

        assert!(fence.wait_for(1, Some(Duration::from_secs(5))).unwrap());
        assert_eq!(fence.completed_value(), 1);
        handle.join().unwrap();
    }

    #[test]
    fn test_value_is_monotonic() {
        let fence = HeadlessFence::new(0);
        fence.signal(5);
        fence.signal(2);
        assert_eq!(fence.completed_value(), 5);
    }
}
