//! Monitrail Route Configuration
//!
//! Describes the tree of channels (routes) entries flow through, and resolves
//! it in two phases: the [`ProtoResolver`] validates the tree and records what
//! each route declares, then the [`RouteResolver`] composes the action list of
//! every route. A resolved tree gives, for any topic, the ordered list of
//! actions that apply.

pub mod config;
pub mod error;
pub mod predicate;
pub mod proto;
pub mod resolver;

pub use config::{
    ActionConfiguration, HandlerConfiguration, MetaConfiguration, RouteConfiguration,
    SubRouteConfiguration,
};
pub use error::{RouteError, RouteResult};
pub use predicate::{MatchOptions, PatternKind, TopicPredicate};
pub use proto::{ProtoMeta, ProtoResolution, ProtoResolver, ProtoRoute, ProtoRouteContext};
pub use resolver::{ResolvedRoute, RouteResolver};
