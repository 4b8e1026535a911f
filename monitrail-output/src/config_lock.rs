//! Configuration lock
//!
//! Counts the events still in flight for one configuration, so that a
//! configuration swap can wait for them before closing the old handlers.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Default)]
pub struct ConfigLock {
    in_flight: Mutex<usize>,
    drained: Condvar,
}

impl ConfigLock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Count one more in-flight event; released when the token drops
    pub fn acquire(self: &Arc<Self>) -> ConfigLockToken {
        *self.in_flight.lock() += 1;
        ConfigLockToken { lock: self.clone() }
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.lock()
    }

    /// Wait until no event is in flight; false on timeout
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.in_flight.lock();
        while *count > 0 {
            if self.drained.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }

    fn release(&self) {
        let mut count = self.in_flight.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.drained.notify_all();
        }
    }
}

impl fmt::Debug for ConfigLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigLock")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// One in-flight event; releases its lock exactly once, on drop
#[derive(Debug)]
pub struct ConfigLockToken {
    lock: Arc<ConfigLock>,
}

impl Drop for ConfigLockToken {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_tokens_count_in_flight() {
        let lock = ConfigLock::new();
        let a = lock.acquire();
        let b = lock.acquire();
        assert_eq!(lock.in_flight(), 2);
        drop(a);
        assert_eq!(lock.in_flight(), 1);
        assert!(!lock.wait_drained(Duration::from_millis(10)));
        drop(b);
        assert!(lock.wait_drained(Duration::from_millis(10)));
    }

    #[test]
    fn test_wait_drained_wakes_up_on_release() {
        let lock = ConfigLock::new();
        let token = lock.acquire();
        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            drop(token);
        });
        assert!(lock.wait_drained(Duration::from_secs(5)));
        releaser.join().unwrap();
    }
}
