//! Task submission.
//!
//! The producer does not consult a registry: it accepts any task name. A name no
//! worker knows is only detected when a worker consumes the envelope, which then
//! records FAILURE with kind `UNKNOWN_TASK`.

use super::types::{TaskEnvelope, TaskId, TaskRecord};
use crate::broker::{BrokerQueue, ResultStore};
use crate::error::Error;

use serde_json::Value;
use std::sync::Arc;

#[derive(Clone)]
pub struct Producer {
    store: Arc<dyn ResultStore>,
    queue: Arc<dyn BrokerQueue>,
}

impl Producer {
    pub fn new(store: Arc<dyn ResultStore>, queue: Arc<dyn BrokerQueue>) -> Self {
        Self { store, queue }
    }

    /// Submits a task and returns its id without waiting for execution.
    ///
    /// Steps, in order and without rollback: generate the id, write the PENDING
    /// record, publish the envelope. A failed publish returns
    /// [`Error::Submission`] and leaves the PENDING record orphaned.
    pub async fn submit(&self, task_name: &str, args: Vec<Value>) -> Result<TaskId, Error> {
        let envelope = TaskEnvelope::new(task_name, args);

        self.store.put(&TaskRecord::pending(&envelope)).await?;

        if let Err(source) = self.queue.publish(&envelope).await {
            tracing::error!(
                "Task {} recorded as PENDING but publish failed, record is orphaned: {}",
                envelope.id,
                source
            );
            return Err(Error::Submission {
                task_id: envelope.id,
                source,
            });
        }

        tracing::info!(
            "Task submitted: {} ({} with {} argument(s))",
            envelope.id,
            envelope.task_name,
            envelope.args.len()
        );
        Ok(envelope.id)
    }
}
