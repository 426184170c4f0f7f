//! Error taxonomy for the task lifecycle engine.
//!
//! - [`BrokerError`] covers the external collaborators (result store and broker
//!   queue): connectivity, wire and serialization failures.
//! - [`Error`] is what the producer, status reader and worker surface to callers.
//!
//! Handler errors never show up here: they are captured per task and stored as
//! a FAILURE record (see [`crate::executor::registry::HandlerError`]).

use crate::executor::types::{TaskId, TaskState};

/// Failures talking to the result store or the broker queue.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Network or connectivity failure; the caller should retry.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// The remote side answered, but not with what the protocol expects.
    #[error("broker protocol error: {0}")]
    Protocol(String),

    /// The credential in the connection string was rejected.
    #[error("broker rejected the credential")]
    Unauthorized,

    /// Connection string could not be parsed or names an unsupported backend.
    #[error("invalid connection string '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl BrokerError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            BrokerError::Unavailable(_) => true,
            #[cfg(feature = "redis")]
            BrokerError::Redis(e) => e.is_io_error() || e.is_timeout() || e.is_connection_dropped(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for BrokerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BrokerError::Protocol(e.to_string())
        } else {
            BrokerError::Unavailable(e.to_string())
        }
    }
}

/// Errors surfaced by the producer, status reader and worker.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No record exists for the task id.
    #[error("task {0} not found")]
    NotFound(TaskId),

    /// The PENDING record was written but publishing the envelope failed.
    /// The record stays orphaned in PENDING; nothing reconciles it.
    #[error("task {task_id} was recorded but could not be published: {source}")]
    Submission {
        task_id: TaskId,
        #[source]
        source: BrokerError,
    },

    /// A write would move a record back to an earlier lifecycle state.
    #[error("illegal transition for task {task_id}: {from} -> {to}")]
    IllegalTransition {
        task_id: TaskId,
        from: TaskState,
        to: TaskState,
    },

    /// Polling gave up before the task reached a terminal state.
    #[error("timed out waiting for task {task_id} (last state {state})")]
    Timeout { task_id: TaskId, state: TaskState },

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
