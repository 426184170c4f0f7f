//! In-process broker: a record map plus a ready queue with visibility timeouts.
//!
//! Deliveries are leased: `consume` moves an envelope from the ready queue into
//! the in-flight table with a deadline. `ack` removes it for good, `extend`
//! renews the deadline, and anything whose deadline passes is moved back to the
//! front of the ready queue on the next `consume`.

use super::{BrokerQueue, BrokerStats, Delivery, DeliveryTag, ResultStore};
use crate::error::BrokerError;
use crate::executor::types::{TaskEnvelope, TaskId, TaskRecord, TaskState, now_ms};

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct Queued {
    envelope: TaskEnvelope,
    delivery_count: u32,
}

#[derive(Debug, Clone)]
struct InFlight {
    queued: Queued,
    /// Timestamp (ms) after which the delivery is considered abandoned.
    deadline: u64,
}

pub struct MemoryBroker {
    records: Arc<DashMap<TaskId, TaskRecord>>,
    ready: Mutex<VecDeque<Queued>>,
    in_flight: Arc<DashMap<DeliveryTag, InFlight>>,
    notify: Notify,
    visibility_timeout: Duration,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_visibility_timeout(DEFAULT_VISIBILITY_TIMEOUT)
    }

    pub fn with_visibility_timeout(visibility_timeout: Duration) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            ready: Mutex::new(VecDeque::new()),
            in_flight: Arc::new(DashMap::new()),
            notify: Notify::new(),
            visibility_timeout,
        }
    }

    fn lease_ms(&self) -> u64 {
        self.visibility_timeout.as_millis() as u64
    }

    /// Moves every expired in-flight delivery back to the front of the ready queue.
    fn requeue_expired(&self, ready: &mut VecDeque<Queued>) -> usize {
        let now = now_ms();
        let expired: Vec<DeliveryTag> = self
            .in_flight
            .iter()
            .filter(|entry| now > entry.value().deadline)
            .map(|entry| entry.key().clone())
            .collect();

        let mut requeued = 0;
        for tag in expired {
            if let Some((_, lease)) = self.in_flight.remove(&tag) {
                tracing::warn!(
                    "Delivery {} of task {} expired, requeueing",
                    tag,
                    lease.queued.envelope.id
                );
                ready.push_front(lease.queued);
                requeued += 1;
            }
        }
        requeued
    }

    /// Earliest in-flight deadline, used to wake up a waiting consumer when
    /// a lease is about to expire.
    fn next_deadline(&self) -> Option<u64> {
        self.in_flight.iter().map(|entry| entry.value().deadline).min()
    }

    async fn try_take(&self) -> Option<Delivery> {
        let mut ready = self.ready.lock().await;
        self.requeue_expired(&mut ready);

        let mut queued = ready.pop_front()?;
        queued.delivery_count += 1;

        let tag = DeliveryTag::new();
        let delivery = Delivery {
            tag: tag.clone(),
            envelope: queued.envelope.clone(),
            delivery_count: queued.delivery_count,
        };
        self.in_flight.insert(
            tag,
            InFlight {
                queued,
                deadline: now_ms() + self.lease_ms(),
            },
        );
        Some(delivery)
    }

    pub async fn ready_len(&self) -> usize {
        self.ready.lock().await.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub async fn stats(&self) -> BrokerStats {
        let mut stats = BrokerStats {
            ready: self.ready_len().await,
            in_flight: self.in_flight_len(),
            ..BrokerStats::default()
        };

        for entry in self.records.iter() {
            match entry.value().state() {
                TaskState::Pending => stats.pending += 1,
                TaskState::Started => stats.started += 1,
                TaskState::Success => stats.success += 1,
                TaskState::Failure => stats.failure += 1,
            }
        }
        stats
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultStore for MemoryBroker {
    async fn get(&self, id: &TaskId) -> Result<Option<TaskRecord>, BrokerError> {
        Ok(self.records.get(id).map(|entry| entry.value().clone()))
    }

    async fn put(&self, record: &TaskRecord) -> Result<(), BrokerError> {
        self.records.insert(record.id.clone(), record.clone());
        tracing::trace!("Stored record {} ({})", record.id, record.state());
        Ok(())
    }
}

#[async_trait]
impl BrokerQueue for MemoryBroker {
    async fn publish(&self, envelope: &TaskEnvelope) -> Result<(), BrokerError> {
        self.ready.lock().await.push_back(Queued {
            envelope: envelope.clone(),
            delivery_count: 0,
        });
        self.notify.notify_one();
        tracing::debug!("Published task {} ({})", envelope.id, envelope.task_name);
        Ok(())
    }

    async fn consume(&self, wait: Duration) -> Result<Option<Delivery>, BrokerError> {
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            // Register interest before checking, so a publish in between is not missed.
            let notified = self.notify.notified();

            if let Some(delivery) = self.try_take().await {
                return Ok(Some(delivery));
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            // Wake up no later than the next lease expiry.
            let mut wake_at = deadline;
            if let Some(lease_deadline) = self.next_deadline() {
                let until = lease_deadline.saturating_sub(now_ms()) + 1;
                wake_at = wake_at.min(now + Duration::from_millis(until));
            }

            let _ = tokio::time::timeout_at(wake_at, notified).await;
        }
    }

    async fn ack(&self, tag: &DeliveryTag) -> Result<bool, BrokerError> {
        match self.in_flight.remove(tag) {
            Some((_, lease)) => {
                tracing::debug!("Acked delivery {} of task {}", tag, lease.queued.envelope.id);
                Ok(true)
            }
            None => {
                tracing::debug!("Ack for unknown delivery {}", tag);
                Ok(false)
            }
        }
    }

    async fn extend(&self, tag: &DeliveryTag) -> Result<bool, BrokerError> {
        match self.in_flight.get_mut(tag) {
            Some(mut lease) => {
                lease.deadline = now_ms() + self.lease_ms();
                tracing::trace!("Extended delivery {}", tag);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn visibility_timeout(&self) -> Duration {
        self.visibility_timeout
    }
}
