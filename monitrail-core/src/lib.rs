//! Monitrail Core
//!
//! The activity monitor and the context it shares with outputs: clock, critical
//! error collector, default and per source file filters.

pub mod context;
pub mod critical;
pub mod error;
pub mod monitor;
pub mod time;

pub use context::{MonitoringContext, SourceFilterRegistry};
pub use critical::{CriticalError, CriticalErrorCollector, CriticalErrorKind};
pub use error::{MonitorError, Result};
pub use monitor::{panic_message, ClientId, Monitor, MonitorClient, MonitorInfo};
pub use time::{MockTimeProvider, RealTimeProvider, TimeProvider};

pub use monitrail_entry;
pub use monitrail_schema;
