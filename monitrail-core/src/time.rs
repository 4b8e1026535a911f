//! Clock Abstraction
//!
//! Monitors stamp their entries from a [`TimeProvider`] instead of reading the
//! system clock directly. This allows:
//! - Deterministic tests of timestamp collisions
//! - Replaying entries at controlled times
//! - Exercising rate-limit windows without sleeping

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Time provider trait
///
/// Abstraction over time sources that allows mocking for testing.
pub trait TimeProvider: Send + Sync {
    /// Get the current UTC time
    fn now_utc(&self) -> DateTime<Utc>;

    /// Advance time by a duration (for mock time)
    fn advance(&self, _duration: Duration) {
        // Only mock providers can move time
    }

    /// Set absolute time (for mock time)
    fn set_time(&self, _time: DateTime<Utc>) {}
}

/// Real time provider using system clock
#[derive(Debug, Clone, Default)]
pub struct RealTimeProvider;

impl TimeProvider for RealTimeProvider {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Mock time provider for testing and replay
///
/// Stores nanoseconds since the Unix epoch in a shared atomic, so clones
/// observe the same time.
#[derive(Debug, Clone)]
pub struct MockTimeProvider {
    nanos: Arc<AtomicI64>,
}

impl MockTimeProvider {
    /// Create a new mock time provider at the Unix epoch
    pub fn new() -> Self {
        Self {
            nanos: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Create a new mock time provider at a given time
    pub fn at(time: DateTime<Utc>) -> Self {
        let provider = Self::new();
        provider.set_time(time);
        provider
    }
}

impl Default for MockTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeProvider for MockTimeProvider {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc.timestamp_nanos(self.nanos.load(Ordering::SeqCst))
    }

    fn advance(&self, duration: Duration) {
        let delta = i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX);
        self.nanos.fetch_add(delta, Ordering::SeqCst);
    }

    fn set_time(&self, time: DateTime<Utc>) {
        let nanos = time.timestamp_nanos_opt().unwrap_or(0);
        self.nanos.store(nanos, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_real_time_provider() {
        let provider = RealTimeProvider;
        let before = Utc::now();
        let now = provider.now_utc();
        assert!(now >= before);
    }

    #[test]
    fn test_mock_time_provider_initial() {
        let provider = MockTimeProvider::new();
        assert_eq!(provider.now_utc().timestamp(), 0);
    }

    #[test]
    fn test_mock_time_provider_advance() {
        let provider = MockTimeProvider::new();

        provider.advance(Duration::from_millis(500));
        assert_eq!(provider.now_utc().timestamp_millis(), 500);

        provider.advance(Duration::from_millis(300));
        assert_eq!(provider.now_utc().timestamp_millis(), 800);
    }

    #[test]
    fn test_mock_time_provider_set_time() {
        let time = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let provider = MockTimeProvider::at(time);
        assert_eq!(provider.now_utc(), time);

        provider.advance(Duration::from_secs(60));
        assert_eq!(provider.now_utc(), time + chrono::Duration::seconds(60));
    }

    #[test]
    fn test_mock_time_provider_clone_shares_time() {
        let p1 = MockTimeProvider::new();
        let p2 = p1.clone();

        p2.advance(Duration::from_nanos(100));

        assert_eq!(p1.now_utc().timestamp_nanos_opt(), Some(100));
    }
}
