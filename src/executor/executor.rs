//! Worker Pool Implementation
//!
//! Runs a configurable number of consume loops that pull deliveries from the
//! broker queue and drive each task through its lifecycle:
//!
//! 1. **Claim**: read the record and write PENDING -> STARTED.
//! 2. **Execute**: run the registered handler in its own tokio task while a
//!    sidecar keeps renewing the delivery's visibility lease.
//! 3. **Finish**: write the terminal record, then ack the delivery.
//!
//! The ack comes last. A worker that dies before the terminal write leaves the
//! delivery un-acked and the broker hands it out again once the lease lapses.

use super::registry::TaskRegistry;
use super::types::*;
use crate::broker::{BrokerQueue, Delivery, DeliveryTag, ResultStore};
use crate::config::WorkerSettings;
use crate::error::Error;

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The engine that drives task execution.
pub struct TaskExecutor {
    store: Arc<dyn ResultStore>,
    queue: Arc<dyn BrokerQueue>,
    /// Frozen at construction; never reloaded.
    registry: Arc<TaskRegistry>,
    settings: WorkerSettings,
    worker_id: WorkerId,
}

impl TaskExecutor {
    pub fn new(
        store: Arc<dyn ResultStore>,
        queue: Arc<dyn BrokerQueue>,
        registry: TaskRegistry,
        settings: WorkerSettings,
    ) -> Arc<Self> {
        let worker_id = settings
            .name
            .clone()
            .map(WorkerId)
            .unwrap_or_default();

        Arc::new(Self {
            store,
            queue,
            registry: Arc::new(registry),
            settings,
            worker_id,
        })
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Spawns the consume loops and returns their handles immediately.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        tracing::info!(
            "Starting {} task workers as {} (handlers: {:?})",
            self.settings.concurrency,
            self.worker_id,
            self.registry.list_handlers()
        );

        (0..self.settings.concurrency)
            .map(|loop_id| {
                let executor = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    executor.worker_loop(loop_id, shutdown).await;
                })
            })
            .collect()
    }

    /// Runs the consume loops until `shutdown` is cancelled and every loop
    /// has finished its current task.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        for handle in self.start(shutdown) {
            if let Err(e) = handle.await {
                tracing::error!("Worker loop terminated abnormally: {}", e);
            }
        }
        tracing::info!("Task executor {} stopped", self.worker_id);
    }

    /// The main loop for a single consumer.
    ///
    /// Nothing a task does can end this loop; only cancellation does.
    async fn worker_loop(&self, loop_id: usize, shutdown: CancellationToken) {
        tracing::info!("Worker {} loop {} started", self.worker_id, loop_id);

        loop {
            let consumed = tokio::select! {
                _ = shutdown.cancelled() => break,
                consumed = self.queue.consume(self.settings.poll_wait) => consumed,
            };

            match consumed {
                Ok(Some(delivery)) => {
                    tracing::info!(
                        "Worker {} loop {} received task {} (handler: {}, delivery #{})",
                        self.worker_id,
                        loop_id,
                        delivery.envelope.id,
                        delivery.envelope.task_name,
                        delivery.delivery_count
                    );

                    let task_id = delivery.envelope.id.clone();
                    if let Err(e) = self.process_delivery(delivery).await {
                        // Left un-acked: the broker redelivers it after the visibility timeout.
                        tracing::error!("Failed to process task {}: {}", task_id, e);
                    }
                }
                Ok(None) => {
                    tracing::trace!("Loop {} found no work", loop_id);
                }
                Err(e) => {
                    tracing::warn!("Loop {} failed to consume: {}", loop_id, e);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.error_backoff) => {}
                    }
                }
            }
        }

        tracing::info!("Worker {} loop {} stopped", self.worker_id, loop_id);
    }

    /// Drives one delivery to a terminal record and acks it.
    ///
    /// Errors are infrastructure failures (result store unreachable); the
    /// delivery is then left un-acked. Handler failures are not errors here:
    /// they come back as an `Ok` FAILURE record.
    pub async fn process_delivery(&self, delivery: Delivery) -> Result<TaskRecord, Error> {
        let envelope = &delivery.envelope;

        let mut record = match self.store.get(&envelope.id).await? {
            Some(record) => record,
            None => {
                tracing::warn!("No record for task {}, recreating it from the envelope", envelope.id);
                TaskRecord::pending(envelope)
            }
        };

        if !self.registry.has_handler(&envelope.task_name) {
            tracing::error!(
                "Task {} names unknown handler '{}', marking it failed",
                envelope.id,
                envelope.task_name
            );
            let error = TaskFailure::unknown_task(&envelope.task_name);
            record.transition(TaskStatus::Failure { error })?;
            return self.finish(record, &delivery.tag).await;
        }

        if record.is_terminal() {
            // Duplicate delivery of a finished task: run again, but never show it as STARTED.
            tracing::info!(
                "Task {} already {}, re-running duplicate delivery",
                envelope.id,
                record.state()
            );
            record.worker = Some(self.worker_id.clone());
            record.attempts += 1;
        } else {
            record.start(&self.worker_id)?;
            self.store.put(&record).await?;
            tracing::info!(
                "Task {} started on {} (attempt {})",
                envelope.id,
                self.worker_id,
                record.attempts
            );
        }

        let status = self.execute_with_lease(&delivery).await;
        record.transition(status)?;
        self.finish(record, &delivery.tag).await
    }

    /// Runs the handler while a sidecar keeps the delivery lease alive.
    async fn execute_with_lease(&self, delivery: &Delivery) -> TaskStatus {
        let renewal_handle = self.spawn_lease_renewal(&delivery.tag);

        let registry = self.registry.clone();
        let task_name = delivery.envelope.task_name.clone();
        let args = delivery.envelope.args.clone();
        // Own task so a panic stays contained in the JoinError.
        let outcome = tokio::spawn(async move { registry.execute(&task_name, args).await }).await;

        renewal_handle.abort();

        match outcome {
            Ok(Ok(result)) => TaskStatus::Success { result },
            Ok(Err(error)) => TaskStatus::Failure { error },
            Err(join_error) if join_error.is_panic() => TaskStatus::Failure {
                error: TaskFailure::new(
                    FailureKind::Panicked,
                    format!("handler panicked: {}", panic_message(join_error.into_panic())),
                ),
            },
            Err(join_error) => TaskStatus::Failure {
                error: TaskFailure::new(
                    FailureKind::Handler,
                    format!("handler was cancelled: {}", join_error),
                ),
            },
        }
    }

    /// Writes the terminal record and acks the delivery.
    async fn finish(&self, record: TaskRecord, tag: &DeliveryTag) -> Result<TaskRecord, Error> {
        self.store.put(&record).await?;

        match &record.status {
            TaskStatus::Success { .. } => tracing::info!("Task {} completed", record.id),
            TaskStatus::Failure { error } => {
                tracing::error!("Task {} failed: {}", record.id, error)
            }
            _ => {}
        }

        match self.queue.ack(tag).await {
            Ok(true) => tracing::debug!("Acked delivery {} of task {}", tag, record.id),
            Ok(false) => tracing::warn!(
                "Delivery {} of task {} expired before the ack; it may run again",
                tag,
                record.id
            ),
            Err(e) => tracing::warn!("Failed to ack delivery {} of task {}: {}", tag, record.id, e),
        }

        Ok(record)
    }

    /// Spawns a background task that renews the delivery lease at a third of
    /// the visibility timeout, so a long-running handler is not redelivered.
    fn spawn_lease_renewal(&self, tag: &DeliveryTag) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let tag = tag.clone();
        let every = (queue.visibility_timeout() / 3).max(Duration::from_millis(10));

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(every).await;

                match queue.extend(&tag).await {
                    Ok(true) => tracing::trace!("Renewed lease for delivery {}", tag),
                    Ok(false) => {
                        tracing::warn!("Lease for delivery {} lost, it may be redelivered", tag);
                        break;
                    }
                    Err(e) => tracing::warn!("Failed to renew lease for delivery {}: {}", tag, e),
                }
            }
        })
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
