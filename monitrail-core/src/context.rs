//! Monitoring context
//!
//! Everything monitors and outputs would otherwise reach through process-wide
//! statics: the critical error collector, the clock, the default filter and the
//! per source file filter overrides. A context is created explicitly and shared
//! through an `Arc`.

use crate::critical::CriticalErrorCollector;
use crate::time::{RealTimeProvider, TimeProvider};
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use monitrail_schema::{LogFilter, SourceFilterApplyMode};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Shared state for a set of monitors and outputs
pub struct MonitoringContext {
    critical_errors: CriticalErrorCollector,
    clock: Arc<dyn TimeProvider>,
    default_filter: RwLock<LogFilter>,
    source_filters: SourceFilterRegistry,
}

impl MonitoringContext {
    /// Create a context on the system clock
    pub fn new() -> Self {
        Self {
            critical_errors: CriticalErrorCollector::new(),
            clock: Arc::new(RealTimeProvider),
            default_filter: RwLock::new(LogFilter::UNDEFINED),
            source_filters: SourceFilterRegistry::default(),
        }
    }

    /// Use another time source
    pub fn with_time_provider(mut self, clock: Arc<dyn TimeProvider>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a critical error collector with a specific capacity
    pub fn with_critical_error_capacity(mut self, capacity: usize) -> Self {
        self.critical_errors = CriticalErrorCollector::with_capacity(capacity);
        self
    }

    pub fn critical_errors(&self) -> &CriticalErrorCollector {
        &self.critical_errors
    }

    pub fn clock(&self) -> &Arc<dyn TimeProvider> {
        &self.clock
    }

    /// Current time from the context clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now_utc()
    }

    /// Filter used by monitors that do not define their own
    pub fn default_filter(&self) -> LogFilter {
        *self.default_filter.read()
    }

    pub fn set_default_filter(&self, filter: LogFilter) {
        debug!(filter = %filter, "Default filter changed");
        *self.default_filter.write() = filter;
    }

    pub fn source_filters(&self) -> &SourceFilterRegistry {
        &self.source_filters
    }

    /// Release what the context holds and report its final state
    pub fn shutdown(&self) {
        self.source_filters.clear();
        info!(
            critical_errors = self.critical_errors.total_count(),
            "Monitoring context shut down"
        );
    }
}

impl Default for MonitoringContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MonitoringContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitoringContext")
            .field("default_filter", &self.default_filter())
            .field("source_filters", &self.source_filters.len())
            .field("critical_errors", &self.critical_errors.total_count())
            .finish()
    }
}

/// Filters that override the monitor filter for entries emitted from a given
/// source file
#[derive(Debug, Default)]
pub struct SourceFilterRegistry {
    filters: RwLock<AHashMap<String, LogFilter>>,
}

impl SourceFilterRegistry {
    /// Set the filter of a file; an undefined filter removes the override
    pub fn set(&self, file: impl Into<String>, filter: LogFilter) {
        let file = file.into();
        let mut filters = self.filters.write();
        if filter.is_undefined() {
            filters.remove(&file);
        } else {
            filters.insert(file, filter);
        }
    }

    pub fn find(&self, file: &str) -> Option<LogFilter> {
        let filters = self.filters.read();
        if filters.is_empty() {
            return None;
        }
        filters.get(file).copied()
    }

    pub fn clear(&self) {
        self.filters.write().clear();
    }

    pub fn len(&self) -> usize {
        self.filters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply a configured file → filter map according to `mode`
    pub fn apply(&self, configured: &AHashMap<String, LogFilter>, mode: SourceFilterApplyMode) {
        if mode == SourceFilterApplyMode::None {
            return;
        }
        let mut filters = self.filters.write();
        if mode == SourceFilterApplyMode::ClearThenApply {
            filters.clear();
        }
        for (file, filter) in configured {
            if filter.is_undefined() {
                filters.remove(file);
            } else {
                filters.insert(file.clone(), *filter);
            }
        }
        debug!(count = filters.len(), mode = ?mode, "Source filters applied");
    }
}
