//! Event handed to the dispatcher

use monitrail_entry::LogEntry;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// A log entry together with the monitor that emitted it
#[derive(Debug, Clone)]
pub struct GrandOutputEventInfo {
    pub entry: Arc<LogEntry>,
    pub monitor_id: Uuid,
    /// Topic of the monitor when the entry was emitted
    pub topic: String,
}

impl GrandOutputEventInfo {
    pub fn new(entry: LogEntry, monitor_id: Uuid, topic: impl Into<String>) -> Self {
        Self {
            entry: Arc::new(entry),
            monitor_id,
            topic: topic.into(),
        }
    }

    /// Event time (nanoseconds since the Unix epoch)
    pub fn time_nanos(&self) -> i64 {
        self.entry.timestamp.unix_nanos()
    }

    /// Serializable view used by JSON lines outputs
    pub fn as_json_line(&self) -> JsonLine<'_> {
        JsonLine {
            monitor: self.monitor_id,
            topic: &self.topic,
            entry: &self.entry,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JsonLine<'a> {
    pub monitor: Uuid,
    pub topic: &'a str,
    #[serde(flatten)]
    pub entry: &'a LogEntry,
}
