//! Dispatcher strategies
//!
//! A strategy decides whether the dispatcher still accepts events (overload
//! protection) and how long the dispatcher thread sleeps when it is idle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::warn;

/// Default maximum number of queued events of [`BoundedStrategy`]
pub const DEFAULT_MAX_CAPACITY: usize = 10_000;

/// Capped exponential backoff of the idle dispatcher thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleBackoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for IdleBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(25),
            max: Duration::from_secs(1),
        }
    }
}

impl IdleBackoff {
    /// Timeout of the `idle_count`-th consecutive idle wait
    pub fn timeout(&self, idle_count: u32) -> Duration {
        self.initial
            .checked_mul(1u32 << idle_count.min(16))
            .map_or(self.max, |d| d.min(self.max))
    }
}

pub trait DispatcherStrategy: Send + Sync {
    /// Whether an event can be accepted while `in_flight` events are queued
    fn check_capacity(&self, in_flight: usize) -> bool;

    fn idle_timeout(&self, idle_count: u32) -> Duration;
}

/// Accepts everything
#[derive(Debug, Default)]
pub struct UnboundedStrategy {
    pub idle: IdleBackoff,
}

impl DispatcherStrategy for UnboundedStrategy {
    fn check_capacity(&self, _in_flight: usize) -> bool {
        true
    }

    fn idle_timeout(&self, idle_count: u32) -> Duration {
        self.idle.timeout(idle_count)
    }
}

/// Closes when `max_capacity` events are queued and opens again once the queue
/// went down to `reopen_threshold`
#[derive(Debug)]
pub struct BoundedStrategy {
    max_capacity: usize,
    reopen_threshold: usize,
    idle: IdleBackoff,
    closed: AtomicBool,
}

impl BoundedStrategy {
    /// Reopens at 80% of `max_capacity`
    pub fn new(max_capacity: usize) -> Self {
        Self::with_threshold(max_capacity, max_capacity / 5 * 4)
    }

    pub fn with_threshold(max_capacity: usize, reopen_threshold: usize) -> Self {
        let max_capacity = max_capacity.max(1);
        Self {
            max_capacity,
            reopen_threshold: reopen_threshold.min(max_capacity - 1),
            idle: IdleBackoff::default(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_idle_backoff(mut self, idle: IdleBackoff) -> Self {
        self.idle = idle;
        self
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    pub fn reopen_threshold(&self) -> usize {
        self.reopen_threshold
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for BoundedStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CAPACITY)
    }
}

impl DispatcherStrategy for BoundedStrategy {
    fn check_capacity(&self, in_flight: usize) -> bool {
        if self.closed.load(Ordering::Acquire) {
            if in_flight > self.reopen_threshold {
                return false;
            }
            self.closed.store(false, Ordering::Release);
        }
        if in_flight >= self.max_capacity {
            if !self.closed.swap(true, Ordering::AcqRel) {
                warn!(in_flight, max = self.max_capacity, "Dispatcher queue is full");
            }
            return false;
        }
        true
    }

    fn idle_timeout(&self, idle_count: u32) -> Duration {
        self.idle.timeout(idle_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_backoff_is_capped() {
        let backoff = IdleBackoff::default();
        assert_eq!(backoff.timeout(0), Duration::from_millis(25));
        assert_eq!(backoff.timeout(2), Duration::from_millis(100));
        assert_eq!(backoff.timeout(10), Duration::from_secs(1));
        assert_eq!(backoff.timeout(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_bounded_hysteresis() {
        let strategy = BoundedStrategy::new(10);
        assert_eq!(strategy.reopen_threshold(), 8);
        assert!(strategy.check_capacity(9));
        assert!(!strategy.check_capacity(10));
        assert!(strategy.is_closed());
        // still closed above the threshold
        assert!(!strategy.check_capacity(9));
        assert!(strategy.check_capacity(8));
        assert!(!strategy.is_closed());
    }

    #[test]
    fn test_unbounded_accepts_everything() {
        let strategy = UnboundedStrategy::default();
        assert!(strategy.check_capacity(usize::MAX));
    }
}
