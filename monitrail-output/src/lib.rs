//! Monitrail Output
//!
//! Collects the entries of many monitors and routes them by topic to channels
//! of handlers. Entries are handed to a dedicated dispatcher thread so a
//! monitor never waits on a handler; configurations are loaded from XML and
//! swapped atomically while events are in flight.

pub mod channel;
pub mod client;
pub mod config_lock;
pub mod config_watcher;
pub mod configuration;
pub mod dispatcher;
pub mod event;
pub mod grand_output;
pub mod handlers;
pub mod strategy;

pub use channel::{Channel, ChannelHost, DEFAULT_CHANNEL_CACHE_CAPACITY};
pub use client::GrandOutputClient;
pub use config_lock::{ConfigLock, ConfigLockToken};
pub use config_watcher::{ConfigChange, ConfigReloadError, ConfigVersion, ConfigWatcher};
pub use configuration::{ConfigErrorSink, ConfigurationError, FnSink, GrandOutputConfiguration, TracingSink};
pub use dispatcher::{DispatcherConfig, DispatcherError, EventDispatcher, FinalReceiver, IdleCallback};
pub use event::GrandOutputEventInfo;
pub use grand_output::{GrandOutput, GrandOutputOptions};
pub use handlers::{
    ConsoleHandler, Handler, HandlerError, HandlerFactory, HandlerRegistry, OutputFormat, ParallelHandler,
    SequenceHandler, TextFileHandler,
};
pub use strategy::{BoundedStrategy, DispatcherStrategy, IdleBackoff, UnboundedStrategy};
