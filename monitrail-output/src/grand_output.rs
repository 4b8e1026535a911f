//! GrandOutput: routes the entries of every registered monitor to channels

use crate::channel::{Channel, ChannelHost, DEFAULT_CHANNEL_CACHE_CAPACITY};
use crate::client::GrandOutputClient;
use crate::configuration::{ConfigErrorSink, ConfigurationError, GrandOutputConfiguration};
use crate::dispatcher::{DispatcherConfig, DispatcherError, EventDispatcher, FinalReceiver};
use crate::event::GrandOutputEventInfo;
use crate::handlers::{Handler, HandlerRegistry};
use monitrail_core::{ClientId, Monitor, MonitorError, MonitoringContext};
use monitrail_entry::LogEntry;
use monitrail_route::RouteResolver;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// GrandOutput options
#[derive(Clone)]
pub struct GrandOutputOptions {
    pub dispatcher: DispatcherConfig,
    /// Maximum time a configuration swap waits for the events of the previous one
    pub drain_timeout: Duration,
    /// Handler receiving every event before its channel
    pub common_sink: Option<Arc<dyn Handler>>,
    /// Topics whose channel each configuration keeps cached
    pub channel_cache_capacity: usize,
}

impl Default for GrandOutputOptions {
    fn default() -> Self {
        Self {
            dispatcher: DispatcherConfig::default(),
            drain_timeout: Duration::from_secs(5),
            common_sink: None,
            channel_cache_capacity: DEFAULT_CHANNEL_CACHE_CAPACITY,
        }
    }
}

impl fmt::Debug for GrandOutputOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrandOutputOptions")
            .field("dispatcher", &self.dispatcher)
            .field("drain_timeout", &self.drain_timeout)
            .field("common_sink", &self.common_sink.as_ref().map(|s| s.name().to_string()))
            .field("channel_cache_capacity", &self.channel_cache_capacity)
            .finish()
    }
}

/// Collects the entries of many monitors and dispatches them to the handlers of
/// the channel their topic selects
///
/// The current [`ChannelHost`] is replaced as a whole by
/// [`set_configuration`](Self::set_configuration); it is never mutated.
pub struct GrandOutput {
    context: Arc<MonitoringContext>,
    registry: HandlerRegistry,
    dispatcher: EventDispatcher,
    common_sink: Option<Arc<dyn Handler>>,
    host: RwLock<Arc<ChannelHost>>,
    reconfiguring: Mutex<()>,
    next_version: AtomicU64,
    drain_timeout: Duration,
    channel_cache_capacity: usize,
    disposed: AtomicBool,
}

impl GrandOutput {
    /// Start a GrandOutput with no channel configured
    pub fn new(
        context: Arc<MonitoringContext>,
        registry: HandlerRegistry,
        options: GrandOutputOptions,
    ) -> Result<Arc<Self>, DispatcherError> {
        let dispatcher = EventDispatcher::new(context.clone(), options.dispatcher)?;
        info!(handler_types = ?registry.type_names(), "GrandOutput started");
        Ok(Arc::new(Self {
            context,
            registry,
            dispatcher,
            common_sink: options.common_sink,
            host: RwLock::new(Arc::new(ChannelHost::empty(0))),
            reconfiguring: Mutex::new(()),
            next_version: AtomicU64::new(1),
            drain_timeout: options.drain_timeout,
            channel_cache_capacity: options.channel_cache_capacity,
            disposed: AtomicBool::new(false),
        }))
    }

    pub fn context(&self) -> &Arc<MonitoringContext> {
        &self.context
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Version of the current configuration (0 until one is applied)
    pub fn current_version(&self) -> u64 {
        self.host.read().version()
    }

    /// Current channel host
    pub fn host(&self) -> Arc<ChannelHost> {
        self.host.read().clone()
    }

    pub fn lost_event_count(&self) -> usize {
        self.dispatcher.lost_event_count()
    }

    pub fn max_queued_count(&self) -> usize {
        self.dispatcher.max_queued_count()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Apply a configuration
    ///
    /// On failure errors go to `sink` and the current configuration stays in
    /// place. On success the previous channels are closed once the events they
    /// were handling are dispatched (or the drain timeout elapsed).
    pub fn set_configuration(&self, config: &GrandOutputConfiguration, sink: &mut dyn ConfigErrorSink) -> bool {
        if self.is_disposed() {
            sink.report(&ConfigurationError::Disposed);
            return false;
        }
        let _reconfiguring = self.reconfiguring.lock();

        let route = match RouteResolver::resolve(config.route()) {
            Ok(route) => route,
            Err(e) => {
                sink.report(&e.into());
                return false;
            }
        };
        let version = self.next_version.fetch_add(1, Ordering::AcqRel);
        let host = match ChannelHost::new(version, route, &self.registry) {
            Ok(host) => Arc::new(host.with_cache_capacity(self.channel_cache_capacity)),
            Err(e) => {
                sink.report(&e.into());
                return false;
            }
        };

        if let Some(filter) = config.default_filter() {
            self.context.set_default_filter(filter);
        }
        self.context
            .source_filters()
            .apply(config.source_filters(), config.apply_mode());

        let previous = std::mem::replace(&mut *self.host.write(), host);
        if !previous.lock().wait_drained(self.drain_timeout) {
            warn!(
                version = previous.version(),
                in_flight = previous.lock().in_flight(),
                "Previous configuration still has events in flight, closing it anyway"
            );
        }
        previous.close();
        info!(version, "Configuration applied");
        true
    }

    /// Bridge a monitor to this output
    pub fn register(self: &Arc<Self>, monitor: &Monitor) -> Result<ClientId, MonitorError> {
        let id = monitor.register_client(Box::new(GrandOutputClient::new(Arc::downgrade(self))))?;
        debug!(monitor = %monitor.id(), "Monitor bridged to GrandOutput");
        Ok(id)
    }

    /// Hand one entry to the dispatcher; false when it has been dropped
    pub(crate) fn dispatch(
        &self,
        entry: &LogEntry,
        monitor_id: Uuid,
        topic: &str,
        cache: &mut Option<(u64, Arc<Channel>)>,
    ) -> bool {
        let (channel, token) = {
            let host = self.host.read();
            let channel = match cache {
                Some((version, channel)) if *version == host.version() => channel.clone(),
                _ => {
                    let channel = host.find_channel(topic);
                    *cache = Some((host.version(), channel.clone()));
                    channel
                }
            };
            (channel, host.lock().acquire())
        };
        if channel.is_empty() && self.common_sink.is_none() {
            return true;
        }
        let receiver = FinalReceiver::new(self.common_sink.clone(), channel.handlers().clone(), Some(token));
        let event = GrandOutputEventInfo::new(entry.clone(), monitor_id, topic);
        self.dispatcher.add(event, receiver)
    }

    /// Dispatch every pending event, stop the dispatcher and close the handlers. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.dispatcher.stop();
        self.host.read().close();
        if let Some(sink) = &self.common_sink {
            sink.close();
        }
        info!(lost = self.lost_event_count(), "GrandOutput disposed");
    }
}

impl Drop for GrandOutput {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for GrandOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrandOutput")
            .field("version", &self.current_version())
            .field("dispatcher", &self.dispatcher)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
