//! Handler registry
//!
//! Maps the logical type names used in configurations to handler factories.
//! A `Configuration` suffix on a type name is ignored, so `TextFile` and
//! `TextFileConfiguration` designate the same handler.

use super::{ConsoleHandler, Handler, HandlerError, ParallelHandler, SequenceHandler, TextFileHandler};
use ahash::AHashMap;
use monitrail_route::{ActionConfiguration, HandlerConfiguration};
use std::sync::Arc;

/// Builds a handler from its configuration
pub type HandlerFactory =
    Arc<dyn Fn(&HandlerConfiguration) -> Result<Arc<dyn Handler>, HandlerError> + Send + Sync>;

const SUFFIX: &str = "Configuration";

fn normalize(type_name: &str) -> &str {
    let name = type_name.trim();
    match name.strip_suffix(SUFFIX) {
        Some(stripped) if !stripped.is_empty() => stripped,
        _ => name,
    }
}

#[derive(Clone)]
pub struct HandlerRegistry {
    factories: AHashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    /// A registry without any handler type
    pub fn empty() -> Self {
        Self {
            factories: AHashMap::new(),
        }
    }

    /// A registry with `Console` and `TextFile`
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("Console", |c| Ok(Arc::new(ConsoleHandler::from_config(c)?)));
        registry.register("TextFile", |c| Ok(Arc::new(TextFileHandler::from_config(c)?)));
        registry
    }

    /// Register (or replace) a handler type
    pub fn register<F>(&mut self, type_name: &str, factory: F)
    where
        F: Fn(&HandlerConfiguration) -> Result<Arc<dyn Handler>, HandlerError> + Send + Sync + 'static,
    {
        self.factories
            .insert(normalize(type_name).to_string(), Arc::new(factory));
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(normalize(type_name))
    }

    /// Registered type names, sorted
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build the handler of an action, composites included
    pub fn create(&self, action: &ActionConfiguration) -> Result<Arc<dyn Handler>, HandlerError> {
        match action {
            ActionConfiguration::Add(config) => {
                let factory = self
                    .factories
                    .get(normalize(&config.type_name))
                    .ok_or_else(|| HandlerError::UnknownType(config.type_name.clone()))?;
                factory(config)
            }
            ActionConfiguration::Sequence { name, children } => {
                let children = children.iter().map(|c| self.create(c)).collect::<Result<_, _>>()?;
                Ok(Arc::new(SequenceHandler::new(name.clone(), children)))
            }
            ActionConfiguration::Parallel { name, children } => {
                let children = children.iter().map(|c| self.create(c)).collect::<Result<_, _>>()?;
                Ok(Arc::new(ParallelHandler::new(name.clone(), children)))
            }
        }
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}
