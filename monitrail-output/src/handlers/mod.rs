//! Handlers: the leaf units of work that consume dispatched events

mod builtin;
mod registry;

pub use builtin::{ConsoleHandler, OutputFormat, TextFileHandler};
pub use registry::{HandlerFactory, HandlerRegistry};

use crate::event::GrandOutputEventInfo;
use monitrail_core::panic_message;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Handler errors
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Unknown handler type '{0}'")]
    UnknownType(String),

    #[error("Invalid configuration for handler '{handler}': {reason}")]
    Config { handler: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("'{name}': {} of its actions failed: {}", failures.len(), failures.join("; "))]
    Composite { name: String, failures: Vec<String> },

    #[error("{0}")]
    Failed(String),
}

/// Consumer of dispatched events
///
/// Called from the dispatcher thread only (children of a parallel composite run
/// on scoped threads).
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;

    /// Process one event; `last_chance` is set when the event will not be
    /// retried anywhere else
    fn handle(&self, event: &GrandOutputEventInfo, last_chance: bool) -> Result<(), HandlerError>;

    /// Release resources; called once the handler is no more reachable
    fn close(&self) {}
}

fn composite_result(name: &str, failures: Vec<String>) -> Result<(), HandlerError> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(HandlerError::Composite {
            name: name.to_string(),
            failures,
        })
    }
}

/// Runs its children one after the other; a failing child does not stop the others
pub struct SequenceHandler {
    name: String,
    children: Vec<Arc<dyn Handler>>,
}

impl SequenceHandler {
    pub fn new(name: impl Into<String>, children: Vec<Arc<dyn Handler>>) -> Self {
        Self {
            name: name.into(),
            children,
        }
    }
}

impl Handler for SequenceHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, event: &GrandOutputEventInfo, last_chance: bool) -> Result<(), HandlerError> {
        let failures = self
            .children
            .iter()
            .filter_map(
                |child| match panic::catch_unwind(AssertUnwindSafe(|| child.handle(event, last_chance))) {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(format!("{}: {}", child.name(), e)),
                    Err(payload) => Some(format!("{}: {}", child.name(), panic_message(payload.as_ref()))),
                },
            )
            .collect();
        composite_result(&self.name, failures)
    }

    fn close(&self) {
        for child in &self.children {
            child.close();
        }
    }
}

/// Runs its children concurrently and waits for all of them
pub struct ParallelHandler {
    name: String,
    children: Vec<Arc<dyn Handler>>,
}

impl ParallelHandler {
    pub fn new(name: impl Into<String>, children: Vec<Arc<dyn Handler>>) -> Self {
        Self {
            name: name.into(),
            children,
        }
    }
}

impl Handler for ParallelHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, event: &GrandOutputEventInfo, last_chance: bool) -> Result<(), HandlerError> {
        let failures = std::thread::scope(|scope| {
            let running: Vec<_> = self
                .children
                .iter()
                .map(|child| (child.name(), scope.spawn(move || child.handle(event, last_chance))))
                .collect();
            running
                .into_iter()
                .filter_map(|(name, handle)| match handle.join() {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(format!("{}: {}", name, e)),
                    Err(payload) => Some(format!("{}: {}", name, panic_message(payload.as_ref()))),
                })
                .collect()
        });
        composite_result(&self.name, failures)
    }

    fn close(&self) {
        debug!(handler = %self.name, "Closing parallel handler");
        for child in &self.children {
            child.close();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_sequence_runs_every_child() {
        let a = Recorder::new("a");
        let b = Recorder::new("b");
        let seq = SequenceHandler::new("seq", vec![a.clone(), Arc::new(Broken), b.clone()]);

        let err = seq.handle(&event("hello"), false).unwrap_err();
        assert!(matches!(&err, HandlerError::Composite { failures, .. } if failures.len() == 1));
        assert!(err.to_string().contains("disk full"));
        assert_eq!(*a.seen.lock(), vec!["hello"]);
        assert_eq!(*b.seen.lock(), vec!["hello"]);

        seq.close();
        assert!(*a.closed.lock() && *b.closed.lock());
    }

    #[test]
    fn test_sequence_continues_after_panicking_child() {
        let after = Recorder::new("after");
        let seq = SequenceHandler::new("seq", vec![Arc::new(Panicking), after.clone()]);

        let err = seq.handle(&event("boom"), false).unwrap_err();
        assert!(matches!(&err, HandlerError::Composite { failures, .. } if failures.len() == 1));
        assert!(err.to_string().contains("panicking: panic: handler bug"));
        assert_eq!(*after.seen.lock(), vec!["boom"]);
    }

    #[test]
    fn test_parallel_isolates_panics() {
        let a = Recorder::new("a");
        let par = ParallelHandler::new("par", vec![a.clone(), Arc::new(Panicking)]);
        let err = par.handle(&event("x"), true).unwrap_err();
        assert!(err.to_string().contains("handler bug"));
        assert_eq!(a.seen.lock().len(), 1);
    }

    #[test]
    fn test_composite_success() {
        let par = ParallelHandler::new("par", vec![Recorder::new("a"), Recorder::new("b")]);
        assert!(par.handle(&event("ok"), false).is_ok());
    }
}
