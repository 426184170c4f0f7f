//! Distributed Task Execution Library
//!
//! A producer hands work to a broker-mediated queue, independent worker
//! processes execute it, and callers poll a result store for the outcome.
//!
//! ## Architecture Modules
//!
//! - **`executor`**: the task lifecycle engine. Producer, worker pool, task
//!   registry and status reader, plus the HTTP API for submit and status.
//! - **`broker`**: the result store and broker queue behind traits, with
//!   in-memory, HTTP (broker node) and Redis implementations.
//! - **`config`**: command-line/environment settings.
//! - **`error`**: error types shared by all of the above.

pub mod broker;
pub mod config;
pub mod error;
pub mod executor;

pub use broker::connection::{Backend, connect};
pub use error::{BrokerError, Error};
pub use executor::executor::TaskExecutor;
pub use executor::producer::Producer;
pub use executor::registry::{HandlerError, TaskHandler, TaskRegistry};
pub use executor::status::StatusReader;
pub use executor::types::{TaskEnvelope, TaskId, TaskRecord, TaskState, TaskStatus};
