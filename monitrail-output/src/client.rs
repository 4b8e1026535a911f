//! Monitor client bridging a monitor to a [`GrandOutput`]

use crate::channel::Channel;
use crate::grand_output::GrandOutput;
use monitrail_core::{MonitorClient, MonitorInfo};
use monitrail_entry::LogEntry;
use std::sync::{Arc, Weak};
use tracing::trace;
use uuid::Uuid;

/// Registered on a monitor by [`GrandOutput::register`]
///
/// Holds a weak reference: a disposed or dropped output silently stops
/// receiving entries.
pub struct GrandOutputClient {
    output: Weak<GrandOutput>,
    monitor_id: Uuid,
    topic: String,
    /// Channel of `topic` for a given host version
    channel: Option<(u64, Arc<Channel>)>,
}

impl GrandOutputClient {
    pub(crate) fn new(output: Weak<GrandOutput>) -> Self {
        Self {
            output,
            monitor_id: Uuid::nil(),
            topic: String::new(),
            channel: None,
        }
    }
}

impl MonitorClient for GrandOutputClient {
    fn name(&self) -> &str {
        "GrandOutputClient"
    }

    fn on_registered(&mut self, monitor: &MonitorInfo) {
        self.monitor_id = monitor.id;
        self.topic = monitor.topic.clone();
        self.channel = None;
    }

    fn on_unfiltered_log(&mut self, entry: &LogEntry) -> anyhow::Result<()> {
        let Some(output) = self.output.upgrade() else {
            return Ok(());
        };
        if !output.dispatch(entry, self.monitor_id, &self.topic, &mut self.channel) {
            trace!(monitor = %self.monitor_id, "Entry dropped by the dispatcher");
        }
        Ok(())
    }

    fn on_topic_changed(&mut self, topic: &str) -> anyhow::Result<()> {
        self.topic = topic.to_string();
        self.channel = None;
        Ok(())
    }
}
