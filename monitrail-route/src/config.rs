//! Route configuration model
//!
//! A route is described by an ordered list of [`MetaConfiguration`]s. Some of
//! them shape the route tree (declared sub-routes and actions), the others
//! compose the route's own action list and are applied in a second phase.

use crate::error::RouteError;
use crate::predicate::TopicPredicate;
use std::collections::{BTreeMap, HashSet};

/// Leaf action: a handler type and its attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerConfiguration {
    /// Logical handler type, looked up in the handler registry
    pub type_name: String,
    pub name: String,
    pub attributes: BTreeMap<String, String>,
}

impl HandlerConfiguration {
    pub fn new(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Action of a route: a handler or a named composite of actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionConfiguration {
    Add(HandlerConfiguration),
    /// Children run one after the other, in declaration order
    Sequence {
        name: String,
        children: Vec<ActionConfiguration>,
    },
    /// Children run concurrently
    Parallel {
        name: String,
        children: Vec<ActionConfiguration>,
    },
}

impl ActionConfiguration {
    pub fn handler(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        ActionConfiguration::Add(HandlerConfiguration::new(type_name, name))
    }

    pub fn sequence(name: impl Into<String>, children: Vec<ActionConfiguration>) -> Self {
        ActionConfiguration::Sequence {
            name: name.into(),
            children,
        }
    }

    pub fn parallel(name: impl Into<String>, children: Vec<ActionConfiguration>) -> Self {
        ActionConfiguration::Parallel {
            name: name.into(),
            children,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ActionConfiguration::Add(h) => &h.name,
            ActionConfiguration::Sequence { name, .. } | ActionConfiguration::Parallel { name, .. } => name,
        }
    }

    pub fn children(&self) -> &[ActionConfiguration] {
        match self {
            ActionConfiguration::Add(_) => &[],
            ActionConfiguration::Sequence { children, .. }
            | ActionConfiguration::Parallel { children, .. } => children,
        }
    }

    pub fn is_composite(&self) -> bool {
        !matches!(self, ActionConfiguration::Add(_))
    }

    /// Validate names and handler types; `route` is the full name used in errors
    pub fn check_validity(&self, route: &str) -> Result<(), RouteError> {
        let invalid = |reason: String| RouteError::InvalidAction {
            route: route.to_string(),
            reason,
        };
        if self.name().trim().is_empty() {
            return Err(invalid("an action must have a non empty name".to_string()));
        }
        match self {
            ActionConfiguration::Add(h) => {
                if h.type_name.trim().is_empty() {
                    return Err(invalid(format!("action '{}' has no handler type", h.name)));
                }
            }
            _ => {
                let mut seen = HashSet::new();
                for child in self.children() {
                    if !seen.insert(child.name()) {
                        return Err(invalid(format!(
                            "'{}' contains two actions named '{}'",
                            self.name(),
                            child.name()
                        )));
                    }
                    child.check_validity(route)?;
                }
            }
        }
        Ok(())
    }
}

/// One step of a route description
#[derive(Debug, Clone, PartialEq)]
pub enum MetaConfiguration {
    /// Make actions available by name to this route and, when imported, to its sub-routes
    DeclareAction {
        actions: Vec<ActionConfiguration>,
        overridden: bool,
    },
    DeclareRoute(SubRouteConfiguration),
    AddAction(ActionConfiguration),
    /// Add a previously declared action
    UseDeclaredAction(String),
    /// Remove an action added before (possibly imported from the parent)
    RemoveAction(String),
}

impl MetaConfiguration {
    pub fn check_validity(&self, route: &str) -> Result<(), RouteError> {
        let check_name = |name: &str| {
            if name.trim().is_empty() {
                Err(RouteError::InvalidAction {
                    route: route.to_string(),
                    reason: "an action reference must have a non empty name".to_string(),
                })
            } else {
                Ok(())
            }
        };
        match self {
            MetaConfiguration::DeclareAction { actions, .. } => {
                actions.iter().try_for_each(|a| a.check_validity(route))
            }
            MetaConfiguration::DeclareRoute(sub) => {
                if sub.route.name.trim().is_empty() {
                    Err(RouteError::InvalidRouteName {
                        parent: route.to_string(),
                        reason: "a sub-route must have a non empty name".to_string(),
                    })
                } else {
                    Ok(())
                }
            }
            MetaConfiguration::AddAction(a) => a.check_validity(route),
            MetaConfiguration::UseDeclaredAction(name) | MetaConfiguration::RemoveAction(name) => {
                check_name(name)
            }
        }
    }
}

/// A route: its name, namespace and ordered meta configurations
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RouteConfiguration {
    /// Prefix of the full names of this route's sub-routes
    pub namespace: String,
    pub name: String,
    pub metas: Vec<MetaConfiguration>,
}

impl RouteConfiguration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn add_action(mut self, action: ActionConfiguration) -> Self {
        self.metas.push(MetaConfiguration::AddAction(action));
        self
    }

    pub fn declare_action(mut self, action: ActionConfiguration) -> Self {
        self.metas.push(MetaConfiguration::DeclareAction {
            actions: vec![action],
            overridden: false,
        });
        self
    }

    /// Declare an action that replaces a visible declaration with the same name
    pub fn override_action(mut self, action: ActionConfiguration) -> Self {
        self.metas.push(MetaConfiguration::DeclareAction {
            actions: vec![action],
            overridden: true,
        });
        self
    }

    pub fn use_declared_action(mut self, name: impl Into<String>) -> Self {
        self.metas.push(MetaConfiguration::UseDeclaredAction(name.into()));
        self
    }

    pub fn remove_action(mut self, name: impl Into<String>) -> Self {
        self.metas.push(MetaConfiguration::RemoveAction(name.into()));
        self
    }

    pub fn declare_route(mut self, route: SubRouteConfiguration) -> Self {
        self.metas.push(MetaConfiguration::DeclareRoute(route));
        self
    }

    pub fn push(&mut self, meta: MetaConfiguration) {
        self.metas.push(meta);
    }
}

/// A route nested in another one and selected by topic
#[derive(Debug, Clone, PartialEq)]
pub struct SubRouteConfiguration {
    pub route: RouteConfiguration,
    pub predicate: TopicPredicate,
    /// Start with the composition steps the parent had when this route was declared
    pub import_parent_actions: bool,
    /// See the actions the parent declared before this route
    pub import_parent_declared_actions_above: bool,
}

impl SubRouteConfiguration {
    pub fn new(route: RouteConfiguration, predicate: TopicPredicate) -> Self {
        Self {
            route,
            predicate,
            import_parent_actions: false,
            import_parent_declared_actions_above: true,
        }
    }

    pub fn import_parent_actions(mut self, import: bool) -> Self {
        self.import_parent_actions = import;
        self
    }

    pub fn import_parent_declared_actions_above(mut self, import: bool) -> Self {
        self.import_parent_declared_actions_above = import;
        self
    }
}
