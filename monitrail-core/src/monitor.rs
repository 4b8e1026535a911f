//! Activity monitor
//!
//! A [`Monitor`] is the entry point used by application code. It is a
//! single-writer object: any thread may use it, but never two at the same time,
//! and a call on a monitor must not re-enter the same monitor. Both violations
//! are detected and reported at the call site instead of corrupting the group
//! stack or the client list.
//!
//! Entries that pass the monitor filter are handed synchronously to every
//! registered [`MonitorClient`], in registration order.

use crate::context::MonitoringContext;
use crate::critical::CriticalErrorKind;
use crate::error::{MonitorError, Result};
use monitrail_entry::{BuildError, EntryKind, LogEntry, LogEntryBuilder, SourceLocation};
use monitrail_schema::{LogFilter, LogLevel, Timestamp};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe, Location};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Marker value of a monitor nobody is using
const IDLE: u64 = 0;

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: u64 = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
}

fn thread_token() -> u64 {
    THREAD_TOKEN.with(|token| *token)
}

/// Identity of a monitor, given to clients when they are registered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorInfo {
    pub id: Uuid,
    pub topic: String,
}

/// Receiver of the entries of one monitor
///
/// Methods are called by the thread that currently owns the monitor. An error or
/// a panic removes the client from the monitor for good.
pub trait MonitorClient: Send {
    /// Name used in diagnostics
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn on_registered(&mut self, _monitor: &MonitorInfo) {}

    /// Called for every entry that passed the monitor filter
    fn on_unfiltered_log(&mut self, entry: &LogEntry) -> anyhow::Result<()>;

    fn on_topic_changed(&mut self, _topic: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Handle returned by [`Monitor::register_client`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

struct RegisteredClient {
    id: ClientId,
    client: Box<dyn MonitorClient>,
}

/// An open group; `stamp` is `None` when the opening entry was filtered out
#[derive(Debug, Clone, Copy)]
struct OpenGroup {
    stamp: Option<Timestamp>,
    level: LogLevel,
}

#[derive(Default)]
struct MonitorState {
    clients: Vec<RegisteredClient>,
    last_stamp: Timestamp,
    groups: Vec<OpenGroup>,
    next_client_id: u64,
}

impl MonitorState {
    /// Number of emitted groups enclosing the next entry, and the innermost one
    fn enclosing(&self) -> (usize, Option<Timestamp>) {
        let depth = self.groups.iter().filter(|g| g.stamp.is_some()).count();
        let parent = self.groups.iter().rev().find_map(|g| g.stamp);
        (depth, parent)
    }
}

/// Releases the owning-thread marker on every exit path
struct OwnershipGuard<'a> {
    owner: &'a AtomicU64,
}

impl Drop for OwnershipGuard<'_> {
    fn drop(&mut self) {
        self.owner.store(IDLE, Ordering::Release);
    }
}

/// Single-writer activity monitor
pub struct Monitor {
    id: Uuid,
    context: Arc<MonitoringContext>,
    owner: AtomicU64,
    topic: RwLock<String>,
    minimal_filter: RwLock<LogFilter>,
    client_count: AtomicUsize,
    state: Mutex<MonitorState>,
}

impl Monitor {
    pub fn new(context: Arc<MonitoringContext>) -> Self {
        Self::with_topic(context, "")
    }

    pub fn with_topic(context: Arc<MonitoringContext>, topic: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            context,
            owner: AtomicU64::new(IDLE),
            topic: RwLock::new(topic.into()),
            minimal_filter: RwLock::new(LogFilter::UNDEFINED),
            client_count: AtomicUsize::new(0),
            state: Mutex::new(MonitorState::default()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn context(&self) -> &Arc<MonitoringContext> {
        &self.context
    }

    pub fn topic(&self) -> String {
        self.topic.read().clone()
    }

    pub fn monitor_info(&self) -> MonitorInfo {
        MonitorInfo {
            id: self.id,
            topic: self.topic(),
        }
    }

    pub fn minimal_filter(&self) -> LogFilter {
        *self.minimal_filter.read()
    }

    pub fn client_count(&self) -> usize {
        self.client_count.load(Ordering::Acquire)
    }

    /// Claim the monitor for the calling thread
    fn claim(&self) -> Result<OwnershipGuard<'_>> {
        let me = thread_token();
        match self
            .owner
            .compare_exchange(IDLE, me, Ordering::Acquire, Ordering::Relaxed)
        {
            Ok(_) => Ok(OwnershipGuard { owner: &self.owner }),
            Err(current) if current == me => Err(MonitorError::Reentrancy),
            Err(_) => Err(MonitorError::ConcurrentThreadAccess),
        }
    }

    pub fn register_client(&self, mut client: Box<dyn MonitorClient>) -> Result<ClientId> {
        let _owner = self.claim()?;
        let mut state = self.state.lock();
        state.next_client_id += 1;
        let id = ClientId(state.next_client_id);
        client.on_registered(&self.monitor_info());
        state.clients.push(RegisteredClient { id, client });
        self.client_count.store(state.clients.len(), Ordering::Release);
        debug!(monitor = %self.id, clients = state.clients.len(), "Client registered");
        Ok(id)
    }

    /// Remove a client; false when it is not (or no more) registered
    pub fn unregister_client(&self, id: ClientId) -> Result<bool> {
        let _owner = self.claim()?;
        let mut state = self.state.lock();
        let Some(index) = state.clients.iter().position(|c| c.id == id) else {
            return Ok(false);
        };
        state.clients.remove(index);
        self.client_count.store(state.clients.len(), Ordering::Release);
        Ok(true)
    }

    pub fn set_topic(&self, topic: impl Into<String>) -> Result<()> {
        let _owner = self.claim()?;
        let topic = topic.into();
        {
            let mut current = self.topic.write();
            if *current == topic {
                return Ok(());
            }
            *current = topic.clone();
        }
        let mut state = self.state.lock();
        let outcomes: Vec<_> = state
            .clients
            .iter_mut()
            .map(|c| panic::catch_unwind(AssertUnwindSafe(|| c.client.on_topic_changed(&topic))))
            .collect();
        self.remove_failed(&mut state, outcomes);
        Ok(())
    }

    pub fn set_minimal_filter(&self, filter: LogFilter) -> Result<()> {
        let _owner = self.claim()?;
        *self.minimal_filter.write() = filter;
        Ok(())
    }

    #[track_caller]
    pub fn trace(&self, text: impl Into<String>) -> Result<()> {
        self.log(LogLevel::Trace, text)
    }

    #[track_caller]
    pub fn info(&self, text: impl Into<String>) -> Result<()> {
        self.log(LogLevel::Info, text)
    }

    #[track_caller]
    pub fn warn(&self, text: impl Into<String>) -> Result<()> {
        self.log(LogLevel::Warn, text)
    }

    #[track_caller]
    pub fn error(&self, text: impl Into<String>) -> Result<()> {
        self.log(LogLevel::Error, text)
    }

    #[track_caller]
    pub fn fatal(&self, text: impl Into<String>) -> Result<()> {
        self.log(LogLevel::Fatal, text)
    }

    #[track_caller]
    pub fn log(&self, level: LogLevel, text: impl Into<String>) -> Result<()> {
        self.send(LogEntry::builder().level(level).text(text))
    }

    /// Emit a prepared entry; timestamp, depth, parent and source are set here
    #[track_caller]
    pub fn send(&self, builder: LogEntryBuilder) -> Result<()> {
        let location = SourceLocation::from(Location::caller());
        self.emit(builder, location).map(|_| ())
    }

    /// Open a group; entries logged until the matching close are nested in it
    #[track_caller]
    pub fn open_group(&self, level: LogLevel, title: impl Into<String>) -> Result<()> {
        let location = SourceLocation::from(Location::caller());
        let builder = LogEntry::builder()
            .level(level)
            .kind(EntryKind::OpenGroup)
            .text(title);
        self.emit(builder, location).map(|_| ())
    }

    /// Close the innermost group; false when no group is open
    #[track_caller]
    pub fn close_group(&self, conclusion: impl Into<String>) -> Result<bool> {
        let location = SourceLocation::from(Location::caller());
        let builder = LogEntry::builder()
            .level(LogLevel::Info)
            .kind(EntryKind::CloseGroup)
            .text(conclusion);
        self.emit(builder, location)
    }

    /// Returns whether the call had an effect (always true except for a close
    /// without open group)
    fn emit(&self, builder: LogEntryBuilder, location: SourceLocation) -> Result<bool> {
        let _owner = self.claim()?;
        let level = builder
            .current_level()
            .ok_or(BuildError::MissingField("level"))?;
        let filter = self.effective_filter(location.file);
        let mut state = self.state.lock();

        let builder = match builder.current_kind() {
            EntryKind::Line => {
                if !filter.accepts_line(level) {
                    return Ok(true);
                }
                let (depth, parent) = state.enclosing();
                builder.group_depth(depth).parent(parent)
            }
            EntryKind::OpenGroup => {
                if !filter.accepts_group(level) {
                    state.groups.push(OpenGroup { stamp: None, level });
                    return Ok(true);
                }
                let (depth, parent) = state.enclosing();
                builder.group_depth(depth).parent(parent)
            }
            EntryKind::CloseGroup => {
                let Some(group) = state.groups.pop() else {
                    return Ok(false);
                };
                let Some(opening) = group.stamp else {
                    return Ok(true);
                };
                let (depth, _) = state.enclosing();
                builder
                    .level(group.level)
                    .group_depth(depth)
                    .parent(Some(opening))
            }
        };

        let stamp = Timestamp::after(state.last_stamp, self.context.now());
        let entry = builder.timestamp(stamp).source(location).build()?;
        state.last_stamp = stamp;
        if entry.kind == EntryKind::OpenGroup {
            state.groups.push(OpenGroup {
                stamp: Some(stamp),
                level,
            });
        }

        let outcomes: Vec<_> = state
            .clients
            .iter_mut()
            .map(|c| panic::catch_unwind(AssertUnwindSafe(|| c.client.on_unfiltered_log(&entry))))
            .collect();
        self.remove_failed(&mut state, outcomes);
        Ok(true)
    }

    fn effective_filter(&self, file: &str) -> LogFilter {
        let base = self.minimal_filter().or(self.context.default_filter());
        match self.context.source_filters().find(file) {
            Some(filter) => filter.or(base),
            None => base,
        }
    }

    /// Drop every client whose call failed; `outcomes` is in client order
    fn remove_failed(
        &self,
        state: &mut MonitorState,
        outcomes: Vec<std::thread::Result<anyhow::Result<()>>>,
    ) {
        let failures: Vec<(usize, String)> = outcomes
            .into_iter()
            .enumerate()
            .filter_map(|(index, outcome)| match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some((index, format!("{:#}", e))),
                Err(payload) => Some((index, panic_message(payload.as_ref()))),
            })
            .collect();
        if failures.is_empty() {
            return;
        }
        for (index, reason) in failures.into_iter().rev() {
            let removed = state.clients.remove(index);
            warn!(monitor = %self.id, client = removed.client.name(), "Removing failed monitor client");
            self.context.critical_errors().add(
                CriticalErrorKind::ClientFailure,
                format!("Monitor client '{}' failed and has been removed", removed.client.name()),
                Some(reason),
            );
        }
        self.client_count.store(state.clients.len(), Ordering::Release);
    }
}

/// Readable text of a caught panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic".to_string()
    }
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("id", &self.id)
            .field("topic", &*self.topic.read())
            .field("clients", &self.client_count())
            .finish()
    }
}
