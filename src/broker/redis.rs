//! Redis backend for both the result store and the broker queue.
//!
//! # Key Schema
//!
//! | Key Pattern | Type | Purpose |
//! |-------------|------|---------|
//! | `{prefix}:record:{task_id}` | String (JSON) | Task record |
//! | `{prefix}:queue` | List | Ready envelopes; published on the left, consumed from the right |
//! | `{prefix}:inflight` | Sorted Set | Delivery tags scored by visibility deadline (ms) |
//! | `{prefix}:deliveries` | Hash | Delivery tag -> envelope JSON |
//! | `{prefix}:attempts` | Hash | Task id -> number of deliveries so far |
//!
//! Consume, ack and extend are Lua scripts so that moving an envelope between
//! the ready list and the in-flight set happens in one round-trip.

use super::{BrokerQueue, Delivery, DeliveryTag, ResultStore};
use crate::error::BrokerError;
use crate::executor::types::{TaskEnvelope, TaskId, TaskRecord, now_ms};

use ::redis::aio::MultiplexedConnection;
use ::redis::{AsyncCommands, Script};
use async_trait::async_trait;
use std::time::Duration;

/// Requeues expired deliveries, then pops the next envelope into the in-flight set.
///
/// KEYS: queue, inflight, deliveries, attempts.
/// ARGV: now_ms, deadline_ms, new delivery tag.
/// Returns `{envelope_json, delivery_count}` or nil when the queue is empty.
const LUA_CONSUME: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', '(' .. ARGV[1])
for _, tag in ipairs(expired) do
    local item = redis.call('HGET', KEYS[3], tag)
    redis.call('ZREM', KEYS[2], tag)
    redis.call('HDEL', KEYS[3], tag)
    if item then
        redis.call('RPUSH', KEYS[1], item)
    end
end

local item = redis.call('RPOP', KEYS[1])
if not item then
    return false
end

redis.call('ZADD', KEYS[2], tonumber(ARGV[2]), ARGV[3])
redis.call('HSET', KEYS[3], ARGV[3], item)
local count = redis.call('HINCRBY', KEYS[4], cjson.decode(item)['id'], 1)
return {item, count}
"#;

/// KEYS: inflight, deliveries, attempts. ARGV: tag. Returns 1 if acked, 0 if unknown.
const LUA_ACK: &str = r#"
local item = redis.call('HGET', KEYS[2], ARGV[1])
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
    return 0
end
redis.call('HDEL', KEYS[2], ARGV[1])
if item then
    redis.call('HDEL', KEYS[3], cjson.decode(item)['id'])
end
return 1
"#;

/// KEYS: inflight. ARGV: tag, new deadline. Returns 1 if extended, 0 if unknown.
const LUA_EXTEND: &str = r#"
if redis.call('ZSCORE', KEYS[1], ARGV[1]) then
    redis.call('ZADD', KEYS[1], 'XX', tonumber(ARGV[2]), ARGV[1])
    return 1
end
return 0
"#;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct RedisBroker {
    conn: MultiplexedConnection,
    key_prefix: String,
    visibility_timeout: Duration,
    consume_script: Script,
    ack_script: Script,
    extend_script: Script,
}

impl RedisBroker {
    /// Connects to Redis at `url` (`redis://[:<password>@]<host>:<port>[/<db>]`).
    pub async fn connect(url: &str, visibility_timeout: Duration) -> Result<Self, BrokerError> {
        let client = ::redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;

        Ok(Self {
            conn,
            key_prefix: "taskd".to_string(),
            visibility_timeout,
            consume_script: Script::new(LUA_CONSUME),
            ack_script: Script::new(LUA_ACK),
            extend_script: Script::new(LUA_EXTEND),
        })
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.key_prefix = prefix.to_string();
        self
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.key_prefix, suffix)
    }

    fn record_key(&self, id: &TaskId) -> String {
        format!("{}:record:{}", self.key_prefix, id)
    }

    fn lease_ms(&self) -> u64 {
        self.visibility_timeout.as_millis() as u64
    }

    async fn try_take(&self) -> Result<Option<Delivery>, BrokerError> {
        let mut conn = self.conn.clone();
        let tag = DeliveryTag::new();
        let now = now_ms();

        let taken: Option<(String, u32)> = self
            .consume_script
            .key(self.key("queue"))
            .key(self.key("inflight"))
            .key(self.key("deliveries"))
            .key(self.key("attempts"))
            .arg(now)
            .arg(now + self.lease_ms())
            .arg(&tag.0)
            .invoke_async(&mut conn)
            .await?;

        match taken {
            Some((raw, delivery_count)) => {
                let envelope: TaskEnvelope = serde_json::from_str(&raw)?;
                Ok(Some(Delivery {
                    tag,
                    envelope,
                    delivery_count,
                }))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ResultStore for RedisBroker {
    async fn get(&self, id: &TaskId) -> Result<Option<TaskRecord>, BrokerError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.record_key(id)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, record: &TaskRecord) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(record)?;
        let _: () = conn.set(self.record_key(&record.id), raw).await?;
        Ok(())
    }
}

#[async_trait]
impl BrokerQueue for RedisBroker {
    async fn publish(&self, envelope: &TaskEnvelope) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(envelope)?;
        let _: () = conn.lpush(self.key("queue"), raw).await?;
        tracing::debug!("Published task {} to redis", envelope.id);
        Ok(())
    }

    async fn consume(&self, wait: Duration) -> Result<Option<Delivery>, BrokerError> {
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            if let Some(delivery) = self.try_take().await? {
                return Ok(Some(delivery));
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn ack(&self, tag: &DeliveryTag) -> Result<bool, BrokerError> {
        let mut conn = self.conn.clone();
        let acked: i64 = self
            .ack_script
            .key(self.key("inflight"))
            .key(self.key("deliveries"))
            .key(self.key("attempts"))
            .arg(&tag.0)
            .invoke_async(&mut conn)
            .await?;
        Ok(acked == 1)
    }

    async fn extend(&self, tag: &DeliveryTag) -> Result<bool, BrokerError> {
        let mut conn = self.conn.clone();
        let extended: i64 = self
            .extend_script
            .key(self.key("inflight"))
            .arg(&tag.0)
            .arg(now_ms() + self.lease_ms())
            .invoke_async(&mut conn)
            .await?;
        Ok(extended == 1)
    }

    fn visibility_timeout(&self) -> Duration {
        self.visibility_timeout
    }
}
