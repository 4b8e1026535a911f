//! Monitor errors

use monitrail_entry::BuildError;
use thiserror::Error;

/// Synchronous failure of a monitor call, returned at the call site
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Another thread is currently using the monitor
    #[error("Concurrent accesses from two threads have been detected on the monitor")]
    ConcurrentThreadAccess,

    /// The calling thread is already inside a call on this monitor (typically a
    /// client logging back into its own monitor)
    #[error("A reentrant call has been detected on the monitor")]
    Reentrancy,

    #[error("Invalid log entry: {0}")]
    Entry(#[from] BuildError),
}

impl MonitorError {
    /// True for the two ownership violations
    pub fn is_ownership_violation(&self) -> bool {
        matches!(self, MonitorError::ConcurrentThreadAccess | MonitorError::Reentrancy)
    }
}

/// Result type for monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;
