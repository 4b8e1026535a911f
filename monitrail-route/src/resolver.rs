//! Second resolution phase
//!
//! Applies the composition steps recorded by the [`ProtoResolver`] to obtain
//! the final action list of every route, then answers "which actions apply to
//! this topic".

use crate::config::{ActionConfiguration, RouteConfiguration};
use crate::error::RouteError;
use crate::predicate::TopicPredicate;
use crate::proto::{ProtoMeta, ProtoResolver, ProtoRoute};
use std::sync::Arc;
use tracing::debug;

/// Fully resolved route tree
#[derive(Debug, Clone, Default)]
pub struct ResolvedRoute {
    full_name: String,
    predicate: Option<TopicPredicate>,
    actions: Vec<Arc<ActionConfiguration>>,
    sub_routes: Vec<ResolvedRoute>,
}

impl ResolvedRoute {
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn predicate(&self) -> Option<&TopicPredicate> {
        self.predicate.as_ref()
    }

    /// Actions of this route only, in order
    pub fn actions(&self) -> &[Arc<ActionConfiguration>] {
        &self.actions
    }

    pub fn sub_routes(&self) -> &[ResolvedRoute] {
        &self.sub_routes
    }

    fn applies_to(&self, topic: &str) -> bool {
        self.predicate.as_ref().map_or(true, |p| p.is_match(topic))
    }

    /// Actions that apply to `topic`
    ///
    /// The root always applies; a sub-route applies when its parent applied and
    /// its predicate matches. Actions are listed in tree order, each at most once.
    pub fn collect_actions(&self, topic: &str) -> Vec<Arc<ActionConfiguration>> {
        let mut chain = Vec::new();
        if self.applies_to(topic) {
            self.collect_into(topic, &mut chain);
        }
        chain
    }

    fn collect_into(&self, topic: &str, chain: &mut Vec<Arc<ActionConfiguration>>) {
        for action in &self.actions {
            push_unique(chain, action);
        }
        for sub in self.sub_routes.iter().filter(|s| s.applies_to(topic)) {
            sub.collect_into(topic, chain);
        }
    }

    /// Every distinct action of the tree
    pub fn all_actions(&self) -> Vec<Arc<ActionConfiguration>> {
        let mut all = Vec::new();
        self.visit(&mut |route| {
            for action in &route.actions {
                push_unique(&mut all, action);
            }
        });
        all
    }

    /// Full names of the routes applying to `topic`, root first
    pub fn matching_routes(&self, topic: &str) -> Vec<&str> {
        let mut names = Vec::new();
        if self.applies_to(topic) {
            self.matching_into(topic, &mut names);
        }
        names
    }

    fn matching_into<'a>(&'a self, topic: &str, names: &mut Vec<&'a str>) {
        names.push(&self.full_name);
        for sub in self.sub_routes.iter().filter(|s| s.applies_to(topic)) {
            sub.matching_into(topic, names);
        }
    }

    pub fn route_count(&self) -> usize {
        let mut count = 0;
        self.visit(&mut |_| count += 1);
        count
    }

    fn visit(&self, f: &mut dyn FnMut(&ResolvedRoute)) {
        f(self);
        for sub in &self.sub_routes {
            sub.visit(f);
        }
    }
}

fn push_unique(chain: &mut Vec<Arc<ActionConfiguration>>, action: &Arc<ActionConfiguration>) {
    if !chain.iter().any(|a| Arc::ptr_eq(a, action)) {
        chain.push(action.clone());
    }
}

/// Resolves a route configuration in two phases
pub struct RouteResolver;

impl RouteResolver {
    pub fn resolve(config: &RouteConfiguration) -> Result<ResolvedRoute, RouteError> {
        let proto = ProtoResolver::resolve(config)?;
        let resolved = Self::resolve_proto(&proto.root)?;
        debug!(
            routes = resolved.route_count(),
            actions = resolved.all_actions().len(),
            "Route configuration resolved"
        );
        Ok(resolved)
    }

    pub fn resolve_proto(proto: &ProtoRoute) -> Result<ResolvedRoute, RouteError> {
        let route = proto.full_name();
        let mut actions: Vec<Arc<ActionConfiguration>> = Vec::new();
        for meta in proto.metas() {
            match meta {
                ProtoMeta::Add(action) => add(&mut actions, route, action)?,
                ProtoMeta::UseDeclared(name) => {
                    let action = proto.find_declared_action(name).ok_or_else(|| {
                        RouteError::UnknownDeclaredAction {
                            route: route.to_string(),
                            name: name.clone(),
                        }
                    })?;
                    add(&mut actions, route, action)?;
                }
                ProtoMeta::Remove(name) => {
                    let index = actions.iter().position(|a| a.name() == name).ok_or_else(|| {
                        RouteError::UnknownAction {
                            route: route.to_string(),
                            name: name.clone(),
                        }
                    })?;
                    actions.remove(index);
                }
            }
        }
        let sub_routes = proto
            .sub_routes()
            .iter()
            .map(Self::resolve_proto)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ResolvedRoute {
            full_name: route.to_string(),
            predicate: proto.predicate().cloned(),
            actions,
            sub_routes,
        })
    }
}

fn add(
    actions: &mut Vec<Arc<ActionConfiguration>>,
    route: &str,
    action: &Arc<ActionConfiguration>,
) -> Result<(), RouteError> {
    if actions.iter().any(|a| a.name() == action.name()) {
        return Err(RouteError::DuplicateAction {
            route: route.to_string(),
            name: action.name().to_string(),
        });
    }
    actions.push(action.clone());
    Ok(())
}
