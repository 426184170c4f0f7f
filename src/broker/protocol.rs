//! Broker Node Wire Protocol
//!
//! Endpoints and Data Transfer Objects used between producers/workers and a
//! broker node. Everything travels as JSON over HTTP. When the node is started
//! with a credential, each request carries `Authorization: Bearer <credential>`.

use super::Delivery;
use super::DeliveryTag;
use crate::executor::types::TaskEnvelope;
use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Appends an envelope to the ready queue.
pub const ENDPOINT_PUBLISH: &str = "/broker/queue/publish";
/// Long-polls for the next delivery.
pub const ENDPOINT_CONSUME: &str = "/broker/queue/consume";
/// Acknowledges a delivery.
pub const ENDPOINT_ACK: &str = "/broker/queue/ack";
/// Renews the visibility deadline of a delivery.
pub const ENDPOINT_EXTEND: &str = "/broker/queue/extend";
/// Record get/put, followed by `/{task_id}`.
pub const ENDPOINT_RECORDS: &str = "/broker/records";
/// Queue depth and record counts.
pub const ENDPOINT_STATS: &str = "/broker/stats";

/// Upper bound on how long the node holds a consume request open.
pub const MAX_CONSUME_WAIT_MS: u64 = 20_000;

// --- Data Transfer Objects ---

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishRequest {
    pub envelope: TaskEnvelope,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConsumeRequest {
    /// How long the node may wait for an envelope before answering empty.
    pub wait_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConsumeResponse {
    pub delivery: Option<Delivery>,
}

/// Body of ack and extend requests.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeliveryTagRequest {
    pub tag: DeliveryTag,
}

/// Answer to ack and extend: `ok` is false when the delivery is no longer in flight.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeliveryTagResponse {
    pub ok: bool,
}
