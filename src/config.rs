//! Process configuration.
//!
//! Settings come from command-line flags with environment variable fallbacks
//! (`TASKD_*`). The clap argument groups are flattened into the `taskd`
//! subcommands; library code only sees the plain settings structs.

use clap::Args;
use std::time::Duration;

/// Backoff applied by network clients to transient failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of tries, including the first one.
    pub attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(150),
            max_delay: Duration::from_millis(1200),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Where the broker queue and result store live, and how to talk to them.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub broker_url: String,
    /// Defaults to `broker_url` when unset.
    pub result_url: Option<String>,
    pub retry: RetryPolicy,
    pub visibility_timeout: Duration,
    /// Key namespace for backends that share a keyspace (Redis).
    pub key_prefix: String,
}

impl BrokerSettings {
    pub fn result_url(&self) -> &str {
        self.result_url.as_deref().unwrap_or(&self.broker_url)
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            broker_url: "memory://".to_string(),
            result_url: None,
            retry: RetryPolicy::default(),
            visibility_timeout: Duration::from_secs(30),
            key_prefix: "taskd".to_string(),
        }
    }
}

/// Tuning for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Number of independent consume loops in this process.
    pub concurrency: usize,
    /// Identity recorded on STARTED records; generated when unset.
    pub name: Option<String>,
    /// How long one consume call may block waiting for work.
    pub poll_wait: Duration,
    /// Pause after a failed consume call before trying again.
    pub error_backoff: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            name: None,
            poll_wait: Duration::from_secs(1),
            error_backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct BrokerArgs {
    /// Broker queue connection string (memory://, http://[:credential@]host:port, redis://...).
    #[arg(long, env = "TASKD_BROKER_URL", default_value = "http://127.0.0.1:6400")]
    pub broker_url: String,

    /// Result store connection string. Defaults to the broker URL.
    #[arg(long, env = "TASKD_RESULT_URL")]
    pub result_url: Option<String>,

    /// Attempts per network call before a transient failure is surfaced.
    #[arg(long, env = "TASKD_RETRY_ATTEMPTS", default_value_t = 3)]
    pub retry_attempts: usize,

    /// Initial backoff between attempts; doubles up to 1.2s.
    #[arg(long, env = "TASKD_RETRY_BASE_DELAY_MS", default_value_t = 150)]
    pub retry_base_delay_ms: u64,

    #[arg(long, env = "TASKD_REQUEST_TIMEOUT_MS", default_value_t = 5000)]
    pub request_timeout_ms: u64,

    /// Visibility timeout of the broker. Workers renew leases at a third of it.
    #[arg(long, env = "TASKD_VISIBILITY_TIMEOUT_SECS", default_value_t = 30)]
    pub visibility_timeout_secs: u64,

    /// Key prefix used by the Redis backend.
    #[arg(long, env = "TASKD_KEY_PREFIX", default_value = "taskd")]
    pub key_prefix: String,
}

impl BrokerArgs {
    pub fn settings(&self) -> BrokerSettings {
        BrokerSettings {
            broker_url: self.broker_url.clone(),
            result_url: self.result_url.clone(),
            retry: RetryPolicy {
                attempts: self.retry_attempts,
                base_delay: Duration::from_millis(self.retry_base_delay_ms),
                max_delay: Duration::from_millis(1200),
                request_timeout: Duration::from_millis(self.request_timeout_ms),
            },
            visibility_timeout: Duration::from_secs(self.visibility_timeout_secs),
            key_prefix: self.key_prefix.clone(),
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct WorkerArgs {
    /// Concurrent consume loops in this process.
    #[arg(long, env = "TASKD_CONCURRENCY", default_value_t = 4)]
    pub concurrency: usize,

    /// Worker name recorded on started tasks.
    #[arg(long, env = "TASKD_WORKER_NAME")]
    pub name: Option<String>,

    /// Longest time a single consume call waits for work.
    #[arg(long, env = "TASKD_POLL_WAIT_MS", default_value_t = 1000)]
    pub poll_wait_ms: u64,
}

impl WorkerArgs {
    pub fn settings(&self) -> WorkerSettings {
        WorkerSettings {
            concurrency: self.concurrency.max(1),
            name: self.name.clone(),
            poll_wait: Duration::from_millis(self.poll_wait_ms),
            ..WorkerSettings::default()
        }
    }
}
