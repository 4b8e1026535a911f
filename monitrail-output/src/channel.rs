//! Channels and the host that materializes them from a resolved route tree

use crate::config_lock::ConfigLock;
use crate::handlers::{Handler, HandlerError, HandlerRegistry};
use dashmap::DashMap;
use monitrail_route::{ActionConfiguration, ResolvedRoute};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Number of topics whose channel is kept before the cache is reset
pub const DEFAULT_CHANNEL_CACHE_CAPACITY: usize = 4096;

/// Ordered handler chain for one topic
pub struct Channel {
    topic: String,
    handlers: Arc<[Arc<dyn Handler>]>,
}

impl Channel {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn handlers(&self) -> &Arc<[Arc<dyn Handler>]> {
        &self.handlers
    }

    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("topic", &self.topic)
            .field("handlers", &self.handler_names())
            .finish()
    }
}

/// Immutable snapshot of one applied configuration
///
/// Every distinct action of the route tree is turned into a handler once, when the
/// host is built. Channels are computed on first use of a topic and cached.
pub struct ChannelHost {
    version: u64,
    route: ResolvedRoute,
    materialized: Vec<(Arc<ActionConfiguration>, Arc<dyn Handler>)>,
    channels: DashMap<String, Arc<Channel>>,
    cache_capacity: usize,
    lock: Arc<ConfigLock>,
}

impl ChannelHost {
    /// Materialize every action of `route`; nothing is kept when one of them fails
    pub fn new(version: u64, route: ResolvedRoute, registry: &HandlerRegistry) -> Result<Self, HandlerError> {
        let mut materialized: Vec<(Arc<ActionConfiguration>, Arc<dyn Handler>)> = Vec::new();
        for action in route.all_actions() {
            match registry.create(&action) {
                Ok(handler) => materialized.push((action, handler)),
                Err(e) => {
                    for (_, handler) in &materialized {
                        handler.close();
                    }
                    return Err(e);
                }
            }
        }
        debug!(version, handlers = materialized.len(), routes = route.route_count(), "Channel host built");
        Ok(Self {
            version,
            route,
            materialized,
            channels: DashMap::new(),
            cache_capacity: DEFAULT_CHANNEL_CACHE_CAPACITY,
            lock: ConfigLock::new(),
        })
    }

    /// Host without any route: every topic gets an empty channel
    pub fn empty(version: u64) -> Self {
        Self {
            version,
            route: ResolvedRoute::default(),
            materialized: Vec::new(),
            channels: DashMap::new(),
            cache_capacity: DEFAULT_CHANNEL_CACHE_CAPACITY,
            lock: ConfigLock::new(),
        }
    }

    /// Maximum number of cached channels (at least one)
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity.max(1);
        self
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn route(&self) -> &ResolvedRoute {
        &self.route
    }

    pub fn lock(&self) -> &Arc<ConfigLock> {
        &self.lock
    }

    pub fn handler_count(&self) -> usize {
        self.materialized.len()
    }

    pub fn cached_channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Channel of a topic
    pub fn find_channel(&self, topic: &str) -> Arc<Channel> {
        if let Some(channel) = self.channels.get(topic) {
            return channel.clone();
        }
        let handlers: Vec<Arc<dyn Handler>> = self
            .route
            .collect_actions(topic)
            .iter()
            .filter_map(|action| self.handler_of(action))
            .collect();
        let channel = Arc::new(Channel {
            topic: topic.to_string(),
            handlers: handlers.into(),
        });
        if self.channels.len() >= self.cache_capacity {
            debug!(version = self.version, cached = self.channels.len(), "Channel cache full, resetting");
            self.channels.clear();
        }
        self.channels
            .entry(topic.to_string())
            .or_insert(channel)
            .clone()
    }

    fn handler_of(&self, action: &Arc<ActionConfiguration>) -> Option<Arc<dyn Handler>> {
        self.materialized
            .iter()
            .find(|(a, _)| Arc::ptr_eq(a, action))
            .map(|(_, h)| h.clone())
    }

    /// Close every handler of this host
    pub fn close(&self) {
        for (_, handler) in &self.materialized {
            handler.close();
        }
        self.channels.clear();
        info!(version = self.version, "Channel host closed");
    }
}

impl fmt::Debug for ChannelHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHost")
            .field("version", &self.version)
            .field("handlers", &self.materialized.len())
            .field("cached_channels", &self.channels.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::Recorder;
    use monitrail_route::{MatchOptions, RouteConfiguration, RouteResolver, SubRouteConfiguration, TopicPredicate};
    use parking_lot::Mutex;

    fn registry(created: Arc<Mutex<Vec<String>>>) -> HandlerRegistry {
        let mut registry = HandlerRegistry::empty();
        registry.register("Recorder", move |c| {
            created.lock().push(c.name.clone());
            Ok(Recorder::new(&c.name) as Arc<dyn Handler>)
        });
        registry
    }

    fn route() -> ResolvedRoute {
        let sql = RouteConfiguration::new("Sql").add_action(ActionConfiguration::handler("Recorder", "sql"));
        let config = RouteConfiguration::new("Root")
            .add_action(ActionConfiguration::handler("Recorder", "all"))
            .declare_route(
                SubRouteConfiguration::new(sql, TopicPredicate::wildcard("*sql*", MatchOptions::default()).unwrap())
                    .import_parent_actions(true),
            );
        RouteResolver::resolve(&config).unwrap()
    }

    #[test]
    fn test_actions_materialized_once() {
        let created = Arc::new(Mutex::new(Vec::new()));
        let host = ChannelHost::new(1, route(), &registry(created.clone())).unwrap();
        assert_eq!(host.handler_count(), 2);

        let channel = host.find_channel("Sql query");
        assert_eq!(channel.handler_names(), vec!["all", "sql"]);
        assert_eq!(host.find_channel("Http").handler_names(), vec!["all"]);
        assert_eq!(created.lock().len(), 2);
    }

    #[test]
    fn test_channel_cache_is_bounded() {
        let host = ChannelHost::new(1, route(), &registry(Arc::default()))
            .unwrap()
            .with_cache_capacity(2);
        for i in 0..10 {
            let channel = host.find_channel(&format!("sql {}", i));
            assert_eq!(channel.handler_names(), vec!["all", "sql"]);
            assert!(host.cached_channel_count() <= 2);
        }
        assert_eq!(host.find_channel("Http").handler_names(), vec!["all"]);
        assert!(host.cached_channel_count() <= 2);
    }

    #[test]
    fn test_channels_are_cached() {
        let host = ChannelHost::new(1, route(), &registry(Arc::default())).unwrap();
        let a = host.find_channel("sql");
        let b = host.find_channel("sql");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_unknown_type_fails_whole_host() {
        let config = RouteConfiguration::new("Root").add_action(ActionConfiguration::handler("Nope", "x"));
        let route = RouteResolver::resolve(&config).unwrap();
        let err = ChannelHost::new(1, route, &HandlerRegistry::empty()).unwrap_err();
        assert!(matches!(err, HandlerError::UnknownType(_)));
    }

    #[test]
    fn test_empty_host() {
        let host = ChannelHost::empty(0);
        assert!(host.find_channel("anything").is_empty());
        assert_eq!(host.version(), 0);
    }
}
