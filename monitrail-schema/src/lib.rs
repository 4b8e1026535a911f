//! Monitrail Schema
//!
//! Value types shared by every Monitrail crate: the collision-resistant
//! [`Timestamp`], log levels and the group/line filters applied by monitors.

pub mod filter;
pub mod level;
pub mod timestamp;

pub use filter::{LogFilter, SourceFilterApplyMode};
pub use level::{LevelFilter, LogLevel};
pub use timestamp::{Timestamp, TICK_NANOS};

use thiserror::Error;

/// Error parsing one of the schema value types from text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Invalid timestamp: '{0}'")]
    InvalidTimestamp(String),

    #[error("Invalid log level: '{0}'")]
    InvalidLevel(String),

    #[error("Invalid log filter: '{0}' (expected a preset name or '{{Group,Line}}')")]
    InvalidFilter(String),

    #[error("Invalid apply mode: '{0}' (expected None, Apply or ClearThenApply)")]
    InvalidApplyMode(String),
}
