//! Task Handler Registry
//!
//! Maps string task names (e.g., "divide") to executable handlers. The registry
//! is assembled once through [`TaskRegistryBuilder`] at process startup and is
//! immutable afterwards; the worker receives it by value in its constructor.

use super::types::{FailureKind, TaskFailure};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Error returned by a handler. Captured by the worker and stored as FAILURE.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HandlerError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("arithmetic error: {0}")]
    Arithmetic(String),

    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }

    /// Converts the error into the description persisted on the task record.
    pub fn into_failure(self) -> TaskFailure {
        let kind = match &self {
            HandlerError::InvalidArguments(_) => FailureKind::InvalidArguments,
            HandlerError::Arithmetic(_) => FailureKind::Arithmetic,
            HandlerError::Failed(_) => FailureKind::Handler,
        };
        TaskFailure::new(kind, self.to_string())
    }
}

pub type HandlerResult = Result<Value, HandlerError>;

/// A unit of executable task logic.
///
/// Execution may block for an arbitrary amount of time; the worker imposes no
/// timeout. Handlers may run more than once for the same task id (at-least-once
/// delivery), so side effects must tolerate being applied twice.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, args: Vec<Value>) -> HandlerResult;
}

/// Type alias for a thread-safe, asynchronous handler closure.
pub type TaskHandlerFn =
    Arc<dyn Fn(Vec<Value>) -> Pin<Box<dyn Future<Output = HandlerResult> + Send>> + Send + Sync>;

struct FnHandler(TaskHandlerFn);

#[async_trait]
impl TaskHandler for FnHandler {
    async fn execute(&self, args: Vec<Value>) -> HandlerResult {
        (self.0)(args).await
    }
}

/// Collects registrations before the registry is frozen.
#[derive(Default)]
pub struct TaskRegistryBuilder {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskRegistryBuilder {
    /// Registers a handler under `name`. A later registration replaces an earlier one.
    pub fn register<H>(mut self, name: &str, handler: H) -> Self
    where
        H: TaskHandler + 'static,
    {
        if self
            .handlers
            .insert(name.to_string(), Arc::new(handler))
            .is_some()
        {
            tracing::warn!("Task handler '{}' registered twice, keeping the last one", name);
        }
        tracing::info!("Registered task handler: {}", name);
        self
    }

    /// Registers an async closure as a handler.
    pub fn register_fn<F, Fut>(self, name: &str, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        // Box::pin type-erases the concrete future so different closures fit one map.
        let handler_fn: TaskHandlerFn = Arc::new(move |args: Vec<Value>| {
            Box::pin(handler(args)) as Pin<Box<dyn Future<Output = HandlerResult> + Send>>
        });
        self.register(name, FnHandler(handler_fn))
    }

    pub fn build(self) -> TaskRegistry {
        TaskRegistry {
            handlers: self.handlers,
        }
    }
}

/// Immutable mapping from task name to handler.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn builder() -> TaskRegistryBuilder {
        TaskRegistryBuilder::default()
    }

    /// Looks up the handler registered under `name`.
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Looks up a handler by name and runs it in place.
    ///
    /// An unknown name yields an `UNKNOWN_TASK` failure instead of an error
    /// the caller would have to special-case.
    pub async fn execute(&self, name: &str, args: Vec<Value>) -> Result<Value, TaskFailure> {
        match self.lookup(name) {
            Some(handler) => {
                tracing::debug!("Executing handler '{}' with {} argument(s)", name, args.len());
                handler.execute(args).await.map_err(HandlerError::into_failure)
            }
            None => {
                tracing::error!("Unknown task handler: {}", name);
                Err(TaskFailure::unknown_task(name))
            }
        }
    }

    /// Returns all registered handler names, sorted.
    pub fn list_handlers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("handlers", &self.list_handlers())
            .finish()
    }
}
