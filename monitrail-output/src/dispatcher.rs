//! Event Dispatcher
//!
//! Producers (monitor clients) enqueue events without blocking; a dedicated
//! thread drains the queue and runs the handler chain of every event. When the
//! strategy reports an overload the event is dropped, counted, and a single
//! diagnostic per time window is sent to the critical error collector.

use crate::config_lock::ConfigLockToken;
use crate::event::GrandOutputEventInfo;
use crate::handlers::Handler;
use crate::strategy::{DispatcherStrategy, UnboundedStrategy};
use crossbeam_queue::SegQueue;
use monitrail_core::{panic_message, CriticalErrorKind, MonitoringContext};
use parking_lot::{Condvar, Mutex, RwLock};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

/// Minimum delay between two overload diagnostics, measured on event time
pub const DEFAULT_OVERLOAD_WINDOW: Duration = Duration::from_secs(120);

/// Called with the time spent idle each time an idle wait times out
pub type IdleCallback = Arc<dyn Fn(Duration) + Send + Sync>;

/// Dispatcher configuration
#[derive(Clone)]
pub struct DispatcherConfig {
    pub strategy: Arc<dyn DispatcherStrategy>,
    pub overload_window: Duration,
    pub on_idle: Option<IdleCallback>,
    pub thread_name: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            strategy: Arc::new(UnboundedStrategy::default()),
            overload_window: DEFAULT_OVERLOAD_WINDOW,
            on_idle: None,
            thread_name: "monitrail-dispatcher".to_string(),
        }
    }
}

impl fmt::Debug for DispatcherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherConfig")
            .field("overload_window", &self.overload_window)
            .field("on_idle", &self.on_idle.is_some())
            .field("thread_name", &self.thread_name)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("Failed to start the dispatcher thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Handler chain bound to one event
///
/// Holds the configuration lock token of the event: it is released when the
/// receiver is dropped, whether the event was dispatched or rejected.
pub struct FinalReceiver {
    common_sink: Option<Arc<dyn Handler>>,
    handlers: Arc<[Arc<dyn Handler>]>,
    _token: Option<ConfigLockToken>,
}

impl FinalReceiver {
    pub fn new(
        common_sink: Option<Arc<dyn Handler>>,
        handlers: Arc<[Arc<dyn Handler>]>,
        token: Option<ConfigLockToken>,
    ) -> Self {
        Self {
            common_sink,
            handlers,
            _token: token,
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Run the common sink then every handler; failures are recorded, never propagated
    pub fn dispatch(self, event: &GrandOutputEventInfo, context: &MonitoringContext) {
        if let Some(sink) = &self.common_sink {
            run_handler(sink.as_ref(), event, context, "While logging event into the common sink");
        }
        for handler in self.handlers.iter() {
            run_handler(handler.as_ref(), event, context, "While logging event");
        }
    }
}

fn run_handler(handler: &dyn Handler, event: &GrandOutputEventInfo, context: &MonitoringContext, what: &str) {
    let failure = match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(event, false))) {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e.to_string(),
        Err(payload) => panic_message(payload.as_ref()),
    };
    context.critical_errors().add(
        CriticalErrorKind::HandlerFailure,
        format!("{} (handler '{}')", what, handler.name()),
        Some(failure),
    );
}

impl fmt::Debug for FinalReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalReceiver")
            .field("common_sink", &self.common_sink.as_ref().map(|s| s.name().to_string()))
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

enum EventItem {
    Event(GrandOutputEventInfo, FinalReceiver),
    Stop,
}

struct Shared {
    queue: SegQueue<EventItem>,
    wake_lock: Mutex<()>,
    wake: Condvar,
    in_flight: AtomicUsize,
    context: Arc<MonitoringContext>,
}

impl Shared {
    fn notify(&self) {
        let _guard = self.wake_lock.lock();
        self.wake.notify_one();
    }
}

/// Asynchronous event dispatcher
pub struct EventDispatcher {
    shared: Arc<Shared>,
    strategy: Arc<dyn DispatcherStrategy>,
    overload_window_nanos: i64,
    /// Producers hold the read side from the stop check to the push
    stopped: RwLock<bool>,
    lost_events: AtomicUsize,
    max_queued: AtomicUsize,
    overload_pending: AtomicBool,
    next_capacity_error: AtomicI64,
    overload_lock: Mutex<()>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl EventDispatcher {
    /// Start the dispatcher thread
    pub fn new(context: Arc<MonitoringContext>, config: DispatcherConfig) -> Result<Self, DispatcherError> {
        let shared = Arc::new(Shared {
            queue: SegQueue::new(),
            wake_lock: Mutex::new(()),
            wake: Condvar::new(),
            in_flight: AtomicUsize::new(0),
            context,
        });
        let worker = {
            let shared = shared.clone();
            let strategy = config.strategy.clone();
            let on_idle = config.on_idle.clone();
            thread::Builder::new()
                .name(config.thread_name.clone())
                .spawn(move || run(&shared, strategy.as_ref(), on_idle.as_ref()))?
        };
        debug!(thread = %config.thread_name, "Dispatcher started");
        Ok(Self {
            thread_id: worker.thread().id(),
            shared,
            strategy: config.strategy,
            overload_window_nanos: i64::try_from(config.overload_window.as_nanos()).unwrap_or(i64::MAX),
            stopped: RwLock::new(false),
            lost_events: AtomicUsize::new(0),
            max_queued: AtomicUsize::new(0),
            overload_pending: AtomicBool::new(false),
            next_capacity_error: AtomicI64::new(i64::MIN),
            overload_lock: Mutex::new(()),
            thread: Mutex::new(Some(worker)),
        })
    }

    /// Enqueue an event; false when it has been rejected (stopped or overloaded)
    pub fn add(&self, event: GrandOutputEventInfo, receiver: FinalReceiver) -> bool {
        let now = event.time_nanos();
        let accepted = {
            let stopped = self.stopped.read();
            if *stopped {
                return false;
            }
            let in_flight = self.shared.in_flight.load(Ordering::Acquire);
            if self.strategy.check_capacity(in_flight) {
                let queued = self.shared.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
                self.max_queued.fetch_max(queued, Ordering::Relaxed);
                self.shared.queue.push(EventItem::Event(event, receiver));
                self.shared.notify();
                true
            } else {
                drop(receiver);
                self.lost_events.fetch_add(1, Ordering::AcqRel);
                self.overload_pending.store(true, Ordering::Release);
                false
            }
        };
        self.report_overload(now, false);
        accepted
    }

    /// Emit the overload diagnostic if one is pending and the window elapsed
    fn report_overload(&self, now: i64, stopping: bool) {
        if !self.overload_pending.load(Ordering::Acquire)
            || now <= self.next_capacity_error.load(Ordering::Acquire)
        {
            return;
        }
        let _guard = self.overload_lock.lock();
        if self.overload_pending.load(Ordering::Acquire)
            && now > self.next_capacity_error.load(Ordering::Acquire)
        {
            let lost = self.lost_events.load(Ordering::Acquire);
            self.shared.context.critical_errors().add(
                CriticalErrorKind::DispatchOverload,
                format!("GrandOutput dispatcher overload. Lost {} total events.", lost),
                None,
            );
            if !stopping {
                self.next_capacity_error
                    .store(now.saturating_add(self.overload_window_nanos), Ordering::Release);
            }
            self.overload_pending.store(false, Ordering::Release);
        }
    }

    /// Events rejected because of overload
    pub fn lost_event_count(&self) -> usize {
        self.lost_events.load(Ordering::Acquire)
    }

    /// Highest number of queued events observed
    pub fn max_queued_count(&self) -> usize {
        self.max_queued.load(Ordering::Relaxed)
    }

    /// Events accepted and not yet dispatched
    pub fn queued_count(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.read()
    }

    /// Drain every accepted event then stop the thread. Idempotent.
    ///
    /// Waits for producers already past the stop check, so the Stop marker is
    /// always queued after the last accepted event.
    pub fn stop(&self) {
        {
            let mut stopped = self.stopped.write();
            if *stopped {
                return;
            }
            *stopped = true;
            self.shared.queue.push(EventItem::Stop);
        }
        self.shared.notify();
        self.next_capacity_error.store(i64::MIN, Ordering::Release);
        self.report_overload(i64::MAX, true);

        if thread::current().id() == self.thread_id {
            return;
        }
        if let Some(worker) = self.thread.lock().take() {
            if worker.join().is_err() {
                self.shared.context.critical_errors().add(
                    CriticalErrorKind::Other,
                    "Dispatcher thread terminated abnormally",
                    None,
                );
            }
        }
        info!(
            lost = self.lost_event_count(),
            max_queued = self.max_queued_count(),
            "Dispatcher stopped"
        );
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("stopped", &self.is_stopped())
            .field("queued", &self.queued_count())
            .field("lost", &self.lost_event_count())
            .finish()
    }
}

fn run(shared: &Shared, strategy: &dyn DispatcherStrategy, on_idle: Option<&IdleCallback>) {
    let mut idle_count: u32 = 0;
    loop {
        while let Some(item) = shared.queue.pop() {
            idle_count = 0;
            match item {
                EventItem::Stop => {
                    debug!("Dispatcher thread exiting");
                    return;
                }
                EventItem::Event(event, receiver) => {
                    receiver.dispatch(&event, &shared.context);
                    shared.in_flight.fetch_sub(1, Ordering::AcqRel);
                }
            }
        }
        let idle_since = Instant::now();
        loop {
            let mut guard = shared.wake_lock.lock();
            if !shared.queue.is_empty() {
                break;
            }
            let timeout = strategy.idle_timeout(idle_count);
            idle_count = idle_count.saturating_add(1);
            let timed_out = shared.wake.wait_for(&mut guard, timeout).timed_out();
            drop(guard);
            if !timed_out || !shared.queue.is_empty() {
                break;
            }
            if let Some(callback) = on_idle {
                callback(idle_since.elapsed());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_lock::ConfigLock;
    use crate::handlers::testing::{event, Broken, Panicking, Recorder};

    fn receiver(handlers: Vec<Arc<dyn Handler>>) -> FinalReceiver {
        FinalReceiver::new(None, Arc::from(handlers), None)
    }

    fn no_handlers() -> Arc<[Arc<dyn Handler>]> {
        Arc::from(Vec::<Arc<dyn Handler>>::new())
    }

    #[test]
    fn test_events_are_dispatched_in_order() {
        let context = Arc::new(MonitoringContext::new());
        let dispatcher = EventDispatcher::new(context, DispatcherConfig::default()).unwrap();
        let recorder = Recorder::new("r");
        for i in 0..100 {
            assert!(dispatcher.add(event(&i.to_string()), receiver(vec![recorder.clone()])));
        }
        dispatcher.stop();

        let seen = recorder.seen.lock();
        assert_eq!(seen.len(), 100);
        assert_eq!(seen[0], "0");
        assert_eq!(seen[99], "99");
        assert_eq!(dispatcher.queued_count(), 0);
    }

    #[test]
    fn test_handler_failures_are_isolated() {
        let context = Arc::new(MonitoringContext::new());
        let dispatcher = EventDispatcher::new(context.clone(), DispatcherConfig::default()).unwrap();
        let recorder = Recorder::new("r");
        let chain: Vec<Arc<dyn Handler>> = vec![Arc::new(Broken), Arc::new(Panicking), recorder.clone()];
        let sink = Recorder::new("common");
        dispatcher.add(event("e"), FinalReceiver::new(Some(sink.clone()), Arc::from(chain), None));
        dispatcher.stop();

        assert_eq!(recorder.seen.lock().len(), 1);
        assert_eq!(sink.seen.lock().len(), 1);
        assert_eq!(context.critical_errors().count_of(CriticalErrorKind::HandlerFailure), 2);
    }

    #[test]
    fn test_lock_token_released_on_dispatch_and_rejection() {
        struct Closed;

        impl DispatcherStrategy for Closed {
            fn check_capacity(&self, _in_flight: usize) -> bool {
                false
            }

            fn idle_timeout(&self, _idle_count: u32) -> Duration {
                Duration::from_millis(10)
            }
        }

        let context = Arc::new(MonitoringContext::new());
        let lock = ConfigLock::new();

        let open = EventDispatcher::new(context.clone(), DispatcherConfig::default()).unwrap();
        open.add(event("a"), FinalReceiver::new(None, no_handlers(), Some(lock.acquire())));
        open.stop();
        assert_eq!(lock.in_flight(), 0);

        let config = DispatcherConfig {
            strategy: Arc::new(Closed),
            ..Default::default()
        };
        let closed = EventDispatcher::new(context, config).unwrap();
        assert!(!closed.add(event("b"), FinalReceiver::new(None, no_handlers(), Some(lock.acquire()))));
        assert_eq!(lock.in_flight(), 0);
        assert_eq!(closed.lost_event_count(), 1);
    }

    #[test]
    fn test_add_after_stop_is_rejected() {
        let dispatcher = EventDispatcher::new(Arc::new(MonitoringContext::new()), DispatcherConfig::default()).unwrap();
        dispatcher.stop();
        dispatcher.stop();
        assert!(dispatcher.is_stopped());
        assert!(!dispatcher.add(event("late"), receiver(Vec::new())));
        assert_eq!(dispatcher.lost_event_count(), 0);
    }

    #[test]
    fn test_on_idle_is_called() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let config = DispatcherConfig {
            strategy: Arc::new(UnboundedStrategy {
                idle: crate::strategy::IdleBackoff {
                    initial: Duration::from_millis(1),
                    max: Duration::from_millis(2),
                },
            }),
            on_idle: Some(Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
            ..Default::default()
        };
        let dispatcher = EventDispatcher::new(Arc::new(MonitoringContext::new()), config).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while calls.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        dispatcher.stop();
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }
}
