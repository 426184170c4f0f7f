//! Producer API Protocol
//!
//! Endpoints and Data Transfer Objects of the HTTP surface that front ends call
//! to submit tasks and poll their status.

use super::types::*;
use serde::{Deserialize, Serialize};

pub const ENDPOINT_SUBMIT_TASK: &str = "/task/submit";
pub const ENDPOINT_TASK_STATUS: &str = "/task/status";
pub const ENDPOINT_HEALTH: &str = "/health";

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitTaskRequest {
    pub task_name: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

/// Query form of a submission: `GET /task/submit/divide?x=10&y=2`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SubmitTaskQuery {
    pub x: Option<String>,
    pub y: Option<String>,
}

impl SubmitTaskQuery {
    /// Positional arguments in `x`, `y` order, each parsed as a JSON literal
    /// and kept as a string when it is not one.
    pub fn into_args(self) -> Vec<serde_json::Value> {
        [self.x, self.y]
            .into_iter()
            .flatten()
            .map(|raw| parse_arg(&raw))
            .collect()
    }
}

/// Parses `10`, `2.5`, `true` or `"quoted"` as JSON; anything else stays a string.
pub fn parse_arg(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitTaskResponse {
    pub task_id: TaskId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub task_id: TaskId,
    pub task_name: String,
    #[serde(flatten)]
    pub status: TaskStatus,
    pub worker: Option<WorkerId>,
    pub attempts: u32,
    pub created_at: u64,
    pub updated_at: u64,
}

impl From<TaskRecord> for TaskStatusResponse {
    fn from(record: TaskRecord) -> Self {
        Self {
            task_id: record.id,
            task_name: record.task_name,
            status: record.status,
            worker: record.worker,
            attempts: record.attempts,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Stable error code identifier.
    pub code: String,
    pub message: String,
    /// Set when a task id was allocated before the failure (orphaned submission).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}
