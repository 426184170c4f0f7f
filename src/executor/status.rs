//! Read-only view of task records.

use super::types::{TaskId, TaskRecord};
use crate::broker::ResultStore;
use crate::error::Error;

use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct StatusReader {
    store: Arc<dyn ResultStore>,
}

impl StatusReader {
    pub fn new(store: Arc<dyn ResultStore>) -> Self {
        Self { store }
    }

    /// Returns the most recently committed record for `task_id`.
    pub async fn status(&self, task_id: &TaskId) -> Result<TaskRecord, Error> {
        self.store
            .get(task_id)
            .await?
            .ok_or_else(|| Error::NotFound(task_id.clone()))
    }

    /// Caller-side polling loop: re-reads the record every `interval` until it
    /// is terminal or `timeout` elapses.
    ///
    /// A task that does not exist yet is polled like a PENDING one until the
    /// timeout, since submission and the first read may race.
    pub async fn wait_for_terminal(
        &self,
        task_id: &TaskId,
        interval: Duration,
        timeout: Duration,
    ) -> Result<TaskRecord, Error> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut last_state = None;

        loop {
            match self.status(task_id).await {
                Ok(record) if record.is_terminal() => return Ok(record),
                Ok(record) => {
                    if last_state != Some(record.state()) {
                        tracing::debug!("Task {} is {}", task_id, record.state());
                    }
                    last_state = Some(record.state());
                }
                Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }

            if tokio::time::Instant::now() + interval > deadline {
                return match last_state {
                    Some(state) => Err(Error::Timeout {
                        task_id: task_id.clone(),
                        state,
                    }),
                    None => Err(Error::NotFound(task_id.clone())),
                };
            }
            tokio::time::sleep(interval).await;
        }
    }
}
