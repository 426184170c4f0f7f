//! Broker Module
//!
//! The external collaborators of the lifecycle engine, behind two traits:
//!
//! - **[`ResultStore`]**: key/value mapping from task id to [`TaskRecord`]. Every
//!   write is a single-key upsert; there is no compare-and-swap, so concurrent
//!   writers race and the last write wins.
//! - **[`BrokerQueue`]**: durable queue of [`TaskEnvelope`]s with at-least-once
//!   delivery. A consumed envelope stays in flight until it is acked; if the
//!   visibility timeout expires first it is handed out again.
//!
//! ## Backends
//! - **`memory`**: in-process implementation of both traits, used by tests, by
//!   `taskd standalone` and as the engine behind a broker node.
//! - **`handlers`/`protocol`**: the broker node, which serves a memory backend over HTTP.
//! - **`remote`**: HTTP client for a broker node, implementing both traits.
//! - **`redis`** (feature `redis`): Redis-backed implementation of both traits.
//! - **`connection`**: parses connection strings and picks the backend.

pub mod connection;
pub mod handlers;
pub mod memory;
pub mod protocol;
#[cfg(feature = "redis")]
pub mod redis;
pub mod remote;


use crate::error::BrokerError;
use crate::executor::types::{TaskEnvelope, TaskId, TaskRecord};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identifies one hand-out of an envelope. A redelivery gets a fresh tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DeliveryTag(pub String);

impl DeliveryTag {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for DeliveryTag {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An envelope handed to a consumer, plus broker-side delivery metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub envelope: TaskEnvelope,
    /// 1 on first delivery, incremented on every redelivery.
    pub delivery_count: u32,
}

impl Delivery {
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}

/// Key/value store of task records.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Reads the current record, `None` if the id was never written.
    async fn get(&self, id: &TaskId) -> Result<Option<TaskRecord>, BrokerError>;

    /// Unconditional upsert of the record under its id.
    async fn put(&self, record: &TaskRecord) -> Result<(), BrokerError>;
}

/// Durable queue of task envelopes with at-least-once delivery.
#[async_trait]
pub trait BrokerQueue: Send + Sync {
    /// Appends the envelope to the queue.
    async fn publish(&self, envelope: &TaskEnvelope) -> Result<(), BrokerError>;

    /// Waits up to `wait` for an envelope. `None` when nothing arrived in time.
    async fn consume(&self, wait: Duration) -> Result<Option<Delivery>, BrokerError>;

    /// Acknowledges a delivery so it is never handed out again.
    /// Returns `false` if the tag is no longer in flight (it expired and was requeued).
    async fn ack(&self, tag: &DeliveryTag) -> Result<bool, BrokerError>;

    /// Pushes the visibility deadline of an in-flight delivery forward.
    /// Returns `false` if the tag is no longer in flight.
    async fn extend(&self, tag: &DeliveryTag) -> Result<bool, BrokerError>;

    /// Visibility timeout applied to deliveries; workers renew at a fraction of it.
    fn visibility_timeout(&self) -> Duration;
}

/// Queue depth and record counts, as reported by a broker node.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BrokerStats {
    pub ready: usize,
    pub in_flight: usize,
    pub pending: usize,
    pub started: usize,
    pub success: usize,
    pub failure: usize,
}
