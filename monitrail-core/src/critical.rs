//! Critical error collection
//!
//! Failures that must never reach the code that emitted a log entry (a client
//! that broke, a handler that failed, lost events under overload) are recorded
//! here and surfaced through `tracing`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::error;

/// Default number of errors kept in memory
pub const DEFAULT_CAPACITY: usize = 256;

/// Category of a critical error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CriticalErrorKind {
    /// A monitor client failed and has been removed
    ClientFailure,
    /// The dispatcher rejected events because of overload
    DispatchOverload,
    /// A handler failed while processing one event
    HandlerFailure,
    Other,
}

/// A recorded critical error
#[derive(Debug, Clone)]
pub struct CriticalError {
    pub kind: CriticalErrorKind,
    pub message: String,
    pub details: Option<String>,
    pub time: DateTime<Utc>,
}

/// Bounded, thread-safe collector of critical errors
#[derive(Debug)]
pub struct CriticalErrorCollector {
    errors: Mutex<VecDeque<CriticalError>>,
    capacity: usize,
    total: AtomicU64,
}

impl CriticalErrorCollector {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Keep at most `capacity` errors (oldest are discarded first)
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            errors: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            capacity: capacity.max(1),
            total: AtomicU64::new(0),
        }
    }

    /// Record an error
    pub fn add(&self, kind: CriticalErrorKind, message: impl Into<String>, details: Option<String>) {
        let message = message.into();
        error!(
            kind = ?kind,
            details = details.as_deref().unwrap_or(""),
            "{}",
            message
        );
        let record = CriticalError {
            kind,
            message,
            details,
            time: Utc::now(),
        };
        let mut errors = self.errors.lock();
        if errors.len() == self.capacity {
            errors.pop_front();
        }
        errors.push_back(record);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy of the retained errors, oldest first
    pub fn snapshot(&self) -> Vec<CriticalError> {
        self.errors.lock().iter().cloned().collect()
    }

    /// Number of retained errors of a given kind
    pub fn count_of(&self, kind: CriticalErrorKind) -> usize {
        self.errors.lock().iter().filter(|e| e.kind == kind).count()
    }

    /// Number of errors ever recorded (not bounded by the capacity)
    pub fn total_count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.errors.lock().clear();
    }
}

impl Default for CriticalErrorCollector {
    fn default() -> Self {
        Self::new()
    }
}
