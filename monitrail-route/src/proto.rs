//! First resolution phase
//!
//! Walks the route tree in declaration order, validates every meta
//! configuration, computes namespaces and full names, registers sub-routes in a
//! run-wide name table and records, per route, the declared actions and the
//! composition steps to apply in the second phase. Nothing is materialized.

use crate::config::{ActionConfiguration, MetaConfiguration, RouteConfiguration, SubRouteConfiguration};
use crate::error::RouteError;
use crate::predicate::TopicPredicate;
use ahash::{AHashMap, AHashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Builder operations a meta configuration may perform on its route
pub trait ProtoRouteContext {
    fn declare_route(&mut self, route: &SubRouteConfiguration) -> Result<(), RouteError>;

    fn declare_action(&mut self, action: &ActionConfiguration, overridden: bool) -> Result<(), RouteError>;

    fn add_meta(&mut self, meta: ProtoMeta);
}

/// Composition step kept for the second phase
///
/// Actions are shared: a step imported by a sub-route refers to the same
/// action as in its parent.
#[derive(Debug, Clone)]
pub enum ProtoMeta {
    Add(Arc<ActionConfiguration>),
    UseDeclared(String),
    Remove(String),
}

impl MetaConfiguration {
    /// Apply this step to a route under construction
    pub fn apply(&self, ctx: &mut dyn ProtoRouteContext) -> Result<(), RouteError> {
        match self {
            MetaConfiguration::DeclareAction { actions, overridden } => actions
                .iter()
                .try_for_each(|a| ctx.declare_action(a, *overridden)),
            MetaConfiguration::DeclareRoute(route) => ctx.declare_route(route),
            MetaConfiguration::AddAction(action) => {
                ctx.add_meta(ProtoMeta::Add(Arc::new(action.clone())));
                Ok(())
            }
            MetaConfiguration::UseDeclaredAction(name) => {
                ctx.add_meta(ProtoMeta::UseDeclared(name.clone()));
                Ok(())
            }
            MetaConfiguration::RemoveAction(name) => {
                ctx.add_meta(ProtoMeta::Remove(name.clone()));
                Ok(())
            }
        }
    }
}

/// Validated, not yet resolved route
#[derive(Debug)]
pub struct ProtoRoute {
    namespace: String,
    full_name: String,
    depth: usize,
    predicate: Option<TopicPredicate>,
    declared: AHashMap<String, Arc<ActionConfiguration>>,
    metas: Vec<ProtoMeta>,
    sub_routes: Vec<ProtoRoute>,
}

impl ProtoRoute {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// 0 for the root
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// None for the root, which always applies
    pub fn predicate(&self) -> Option<&TopicPredicate> {
        self.predicate.as_ref()
    }

    pub fn metas(&self) -> &[ProtoMeta] {
        &self.metas
    }

    pub fn sub_routes(&self) -> &[ProtoRoute] {
        &self.sub_routes
    }

    pub fn find_declared_action(&self, name: &str) -> Option<&Arc<ActionConfiguration>> {
        self.declared.get(name)
    }

    pub fn declared_action_count(&self) -> usize {
        self.declared.len()
    }
}

/// Route under construction; the name table is shared by the whole run
struct RouteBuilder<'r> {
    names: &'r mut AHashSet<String>,
    route: ProtoRoute,
}

impl<'r> RouteBuilder<'r> {
    fn execute(&mut self, config: &RouteConfiguration) -> Result<(), RouteError> {
        for meta in &config.metas {
            meta.apply(self)?;
        }
        Ok(())
    }
}

fn check_validity(config: &RouteConfiguration, full_name: &str) -> Result<(), RouteError> {
    config.metas.iter().try_for_each(|m| m.check_validity(full_name))
}

impl ProtoRouteContext for RouteBuilder<'_> {
    fn declare_route(&mut self, sub: &SubRouteConfiguration) -> Result<(), RouteError> {
        let parent = &self.route;
        let full_name = format!("{}{}{}", parent.namespace, sub.route.namespace, sub.route.name);
        check_validity(&sub.route, &full_name)?;

        let child = ProtoRoute {
            namespace: format!("{}{}", parent.namespace, sub.route.namespace),
            full_name: full_name.clone(),
            depth: parent.depth + 1,
            predicate: Some(sub.predicate.clone()),
            declared: if sub.import_parent_declared_actions_above {
                parent.declared.clone()
            } else {
                AHashMap::new()
            },
            metas: if sub.import_parent_actions {
                parent.metas.clone()
            } else {
                Vec::new()
            },
            sub_routes: Vec::new(),
        };
        if !self.names.insert(full_name.clone()) {
            return Err(RouteError::DuplicateRoute(full_name));
        }

        debug!(route = %full_name, predicate = %sub.predicate, "Preprocessing route");
        let mut builder = RouteBuilder {
            names: &mut *self.names,
            route: child,
        };
        builder.execute(&sub.route)?;
        let child = builder.route;
        self.route.sub_routes.push(child);
        Ok(())
    }

    fn declare_action(&mut self, action: &ActionConfiguration, overridden: bool) -> Result<(), RouteError> {
        let name = action.name().to_string();
        if self.route.declared.contains_key(&name) {
            if !overridden {
                return Err(RouteError::DuplicateDeclaredAction {
                    route: self.route.full_name.clone(),
                    name,
                });
            }
            info!(route = %self.route.full_name, action = %name, "Action is overridden");
        }
        self.route.declared.insert(name, Arc::new(action.clone()));
        Ok(())
    }

    fn add_meta(&mut self, meta: ProtoMeta) {
        self.route.metas.push(meta);
    }
}

/// Result of the first phase
#[derive(Debug)]
pub struct ProtoResolution {
    pub root: ProtoRoute,
    /// Full names of every sub-route
    pub names: AHashSet<String>,
}

impl ProtoResolution {
    /// Depth-first lookup of a sub-route by full name
    pub fn find(&self, full_name: &str) -> Option<&ProtoRoute> {
        fn walk<'a>(route: &'a ProtoRoute, full_name: &str) -> Option<&'a ProtoRoute> {
            route
                .sub_routes
                .iter()
                .find_map(|s| if s.full_name == full_name { Some(s) } else { walk(s, full_name) })
        }
        if !self.names.contains(full_name) {
            return None;
        }
        walk(&self.root, full_name)
    }
}

/// Runs the first phase on a root route
pub struct ProtoResolver;

impl ProtoResolver {
    pub fn resolve(root: &RouteConfiguration) -> Result<ProtoResolution, RouteError> {
        let full_name = format!("{}{}", root.namespace, root.name);
        check_validity(root, &full_name)?;

        let mut names = AHashSet::new();
        let mut builder = RouteBuilder {
            names: &mut names,
            route: ProtoRoute {
                namespace: root.namespace.clone(),
                full_name,
                depth: 0,
                predicate: None,
                declared: AHashMap::new(),
                metas: Vec::new(),
                sub_routes: Vec::new(),
            },
        };
        builder.execute(root)?;
        let root = builder.route;
        debug!(routes = names.len() + 1, "Route tree preprocessed");
        Ok(ProtoResolution { root, names })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::MatchOptions;

    fn topic(pattern: &str) -> TopicPredicate {
        TopicPredicate::wildcard(pattern, MatchOptions::default()).unwrap()
    }

    #[test]
    fn test_full_names_and_namespaces() {
        let root = RouteConfiguration::new("Root").with_namespace("App.").declare_route(
            SubRouteConfiguration::new(
                RouteConfiguration::new("Sql").with_namespace("Db.").declare_route(SubRouteConfiguration::new(
                    RouteConfiguration::new("Query"),
                    topic("*Query"),
                )),
                topic("Sql*"),
            ),
        );
        let resolution = ProtoResolver::resolve(&root).unwrap();
        assert_eq!(resolution.root.full_name(), "App.Root");

        let sql = &resolution.root.sub_routes()[0];
        assert_eq!(sql.full_name(), "App.Db.Sql");
        assert_eq!(sql.namespace(), "App.Db.");
        assert_eq!(sql.depth(), 1);

        let query = resolution.find("App.Db.Query").unwrap();
        assert_eq!(query.depth(), 2);
        assert!(query.predicate().unwrap().is_match("SlowQuery"));
        assert!(resolution.find("App.Root").is_none());
    }

    #[test]
    fn test_duplicate_full_name_is_rejected() {
        let root = RouteConfiguration::new("")
            .declare_route(SubRouteConfiguration::new(RouteConfiguration::new("A"), topic("A*")))
            .declare_route(SubRouteConfiguration::new(
                RouteConfiguration::new("B").declare_route(SubRouteConfiguration::new(
                    RouteConfiguration::new("A"),
                    topic("*"),
                )),
                topic("B*"),
            ));
        let err = ProtoResolver::resolve(&root).unwrap_err();
        assert_eq!(err, RouteError::DuplicateRoute("A".to_string()));
    }

    #[test]
    fn test_namespace_disambiguates_names() {
        let root = RouteConfiguration::new("")
            .declare_route(SubRouteConfiguration::new(RouteConfiguration::new("A"), topic("A*")))
            .declare_route(SubRouteConfiguration::new(
                RouteConfiguration::new("A").with_namespace("Other."),
                topic("*"),
            ));
        let resolution = ProtoResolver::resolve(&root).unwrap();
        assert!(resolution.names.contains("A"));
        assert!(resolution.names.contains("Other.A"));
    }

    #[test]
    fn test_declared_action_override() {
        let first = ActionConfiguration::handler("Console", "X");
        let second = ActionConfiguration::handler("TextFile", "X");

        let root = RouteConfiguration::new("")
            .declare_action(first.clone())
            .declare_action(second.clone());
        assert!(matches!(
            ProtoResolver::resolve(&root),
            Err(RouteError::DuplicateDeclaredAction { name, .. }) if name == "X"
        ));

        let root = RouteConfiguration::new("").declare_action(first).override_action(second.clone());
        let resolution = ProtoResolver::resolve(&root).unwrap();
        assert_eq!(resolution.root.declared_action_count(), 1);
        assert_eq!(**resolution.root.find_declared_action("X").unwrap(), second);
    }

    #[test]
    fn test_import_only_what_is_declared_above() {
        let root = RouteConfiguration::new("")
            .declare_action(ActionConfiguration::handler("Console", "before"))
            .add_action(ActionConfiguration::handler("Console", "root-action"))
            .declare_route(
                SubRouteConfiguration::new(RouteConfiguration::new("Importing"), topic("*"))
                    .import_parent_actions(true),
            )
            .declare_route(
                SubRouteConfiguration::new(RouteConfiguration::new("Isolated"), topic("*"))
                    .import_parent_declared_actions_above(false),
            )
            .declare_action(ActionConfiguration::handler("Console", "after"));

        let resolution = ProtoResolver::resolve(&root).unwrap();
        let importing = resolution.find("Importing").unwrap();
        assert!(importing.find_declared_action("before").is_some());
        assert!(importing.find_declared_action("after").is_none());
        assert_eq!(importing.metas().len(), 1);

        let isolated = resolution.find("Isolated").unwrap();
        assert_eq!(isolated.declared_action_count(), 0);
        assert!(isolated.metas().is_empty());

        // imported composition steps share the parent's action
        let (ProtoMeta::Add(parent), ProtoMeta::Add(child)) = (&resolution.root.metas()[0], &importing.metas()[0]) else {
            panic!("expected Add steps");
        };
        assert!(Arc::ptr_eq(parent, child));
    }

    #[test]
    fn test_validity_errors_use_child_full_name() {
        let root = RouteConfiguration::new("").with_namespace("N.").declare_route(SubRouteConfiguration::new(
            RouteConfiguration::new("Bad").add_action(ActionConfiguration::handler("", "nameless-type")),
            topic("*"),
        ));
        let err = ProtoResolver::resolve(&root).unwrap_err();
        assert!(matches!(err, RouteError::InvalidAction { route, .. } if route == "N.Bad"));
    }

    #[test]
    fn test_unnamed_sub_route() {
        let root = RouteConfiguration::new("")
            .declare_route(SubRouteConfiguration::new(RouteConfiguration::new(""), topic("*")));
        assert!(matches!(
            ProtoResolver::resolve(&root),
            Err(RouteError::InvalidRouteName { .. })
        ));
    }
}
