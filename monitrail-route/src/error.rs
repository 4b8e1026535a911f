//! Route configuration errors

use thiserror::Error;

/// Errors raised while validating or resolving a route configuration
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("Invalid action in route '{route}': {reason}")]
    InvalidAction { route: String, reason: String },

    #[error("Route named '{0}' is already declared")]
    DuplicateRoute(String),

    #[error("Action '{name}' is already declared in route '{route}'. Use Override to alter it or use another name")]
    DuplicateDeclaredAction { route: String, name: String },

    #[error("Action '{name}' is added twice to route '{route}'")]
    DuplicateAction { route: String, name: String },

    #[error("No declared action named '{name}' is visible from route '{route}'")]
    UnknownDeclaredAction { route: String, name: String },

    #[error("Cannot remove '{name}' from route '{route}': no such action")]
    UnknownAction { route: String, name: String },

    #[error("Invalid route name under '{parent}': {reason}")]
    InvalidRouteName { parent: String, reason: String },

    #[error("Invalid topic pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Unknown match option: {0}")]
    InvalidMatchOption(String),
}

/// Result type for route operations
pub type RouteResult<T> = Result<T, RouteError>;
