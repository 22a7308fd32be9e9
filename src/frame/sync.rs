//! CPU-GPU synchronization.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct FenceState {
    completed: Mutex<u64>,
    signaled: Condvar,
}

/// Value-based fence shared between the render thread and the GPU queue.
///
/// Submissions are tagged with increasing values; the queue reports the
/// highest value whose work has retired. Clones observe the same fence.
#[derive(Debug, Clone, Default)]
pub struct FrameFence {
    state: Arc<FenceState>,
}

impl FrameFence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest value signaled so far.
    pub fn completed_value(&self) -> u64 {
        *self.state.completed.lock()
    }

    pub fn is_complete(&self, value: u64) -> bool {
        self.completed_value() >= value
    }

    /// Mark all work up to `value` as retired. Never moves backwards.
    pub fn signal(&self, value: u64) {
        let mut completed = self.state.completed.lock();
        if value > *completed {
            *completed = value;
            self.state.signaled.notify_all();
        }
    }

    /// Block until `value` has been signaled.
    pub fn wait_for_value(&self, value: u64) {
        let mut completed = self.state.completed.lock();
        while *completed < value {
            self.state.signaled.wait(&mut completed);
        }
    }

    /// Wait for `value` with a timeout.
    ///
    /// Returns `true` if the value was reached, `false` if the timeout elapsed.
    pub fn wait_for_value_timeout(&self, value: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut completed = self.state.completed.lock();
        while *completed < value {
            if self
                .state
                .signaled
                .wait_until(&mut completed, deadline)
                .timed_out()
            {
                return *completed >= value;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_signal_is_monotonic() {
        let fence = FrameFence::new();
        fence.signal(5);
        fence.signal(3);
        assert_eq!(fence.completed_value(), 5);
        assert!(fence.is_complete(4));
        assert!(!fence.is_complete(6));
    }

    #[test]
    fn test_wait_across_threads() {
        let fence = FrameFence::new();
        let signaler = fence.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            signaler.signal(2);
        });
        fence.wait_for_value(2);
        assert!(fence.is_complete(2));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_timeout() {
        let fence = FrameFence::new();
        assert!(!fence.wait_for_value_timeout(1, Duration::from_millis(5)));
        fence.signal(1);
        assert!(fence.wait_for_value_timeout(1, Duration::from_millis(5)));
    }
}
