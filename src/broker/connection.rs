//! Connection strings and backend selection.
//!
//! `scheme://[user][:credential@]host:port[/db]`, where the scheme picks the backend:
//! `memory://` (in-process), `http://`/`https://` (broker node), `redis://`/`rediss://`.

use super::memory::MemoryBroker;
use super::remote::HttpBroker;
use super::{BrokerQueue, ResultStore};
use crate::config::BrokerSettings;
use crate::error::BrokerError;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    Http,
    Redis,
}

/// A parsed connection string.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub kind: BackendKind,
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub credential: Option<String>,
    /// Path after the authority without the leading slash (the Redis db index).
    pub database: Option<String>,
    raw: String,
}

impl ConnectionInfo {
    pub fn parse(raw: &str) -> Result<Self, BrokerError> {
        let invalid = |reason: &str| BrokerError::InvalidUrl {
            url: redact(raw),
            reason: reason.to_string(),
        };

        let url = url::Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
        let kind = match url.scheme() {
            "memory" => BackendKind::Memory,
            "http" | "https" => BackendKind::Http,
            "redis" | "rediss" => BackendKind::Redis,
            other => return Err(invalid(&format!("unsupported scheme '{}'", other))),
        };

        let host = url.host_str().unwrap_or_default().to_string();
        if host.is_empty() && kind != BackendKind::Memory {
            return Err(invalid("missing host"));
        }

        let username = Some(url.username().to_string()).filter(|u| !u.is_empty());
        let credential = url.password().map(str::to_string);
        let database = Some(url.path().trim_matches('/').to_string()).filter(|p| !p.is_empty());

        Ok(Self {
            kind,
            scheme: url.scheme().to_string(),
            host,
            port: url.port(),
            username,
            credential,
            database,
            raw: raw.to_string(),
        })
    }

    /// `scheme://host[:port]` with the credential stripped.
    pub fn base_url(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}", self.scheme, self.host, port),
            None => format!("{}://{}", self.scheme, self.host),
        }
    }

    /// The connection string as given, credential included.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for ConnectionInfo {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("kind", &self.kind)
            .field("url", &redact(&self.raw))
            .finish()
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&redact(&self.raw))
    }
}

/// Replaces the password part of a connection string with `***` for logging.
pub fn redact(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut url) if url.password().is_some() => {
            let _ = url.set_password(Some("***"));
            url.to_string()
        }
        _ => raw.to_string(),
    }
}

/// The two collaborators the producer, status reader and worker talk to.
/// Both may point at the same service.
#[derive(Clone)]
pub struct Backend {
    pub store: Arc<dyn ResultStore>,
    pub queue: Arc<dyn BrokerQueue>,
}

impl Backend {
    /// A backend where one memory broker serves as both store and queue.
    pub fn memory(broker: Arc<MemoryBroker>) -> Self {
        Self {
            store: broker.clone(),
            queue: broker,
        }
    }
}

/// Connects to the result store and broker queue named in `settings`.
///
/// `memory://` URLs share a single in-process broker, so a store and queue both
/// configured as memory see the same state.
pub async fn connect(settings: &BrokerSettings) -> Result<Backend, BrokerError> {
    let queue_info = ConnectionInfo::parse(&settings.broker_url)?;
    let store_info = ConnectionInfo::parse(settings.result_url())?;
    tracing::info!("Broker queue: {}, result store: {}", queue_info, store_info);

    let memory = Arc::new(MemoryBroker::with_visibility_timeout(settings.visibility_timeout));

    let queue: Arc<dyn BrokerQueue> = match queue_info.kind {
        BackendKind::Memory => memory.clone(),
        BackendKind::Http => Arc::new(HttpBroker::new(
            &queue_info,
            settings.retry.clone(),
            settings.visibility_timeout,
        )),
        BackendKind::Redis => connect_redis(&queue_info, settings).await?,
    };

    let store: Arc<dyn ResultStore> = match store_info.kind {
        BackendKind::Memory => memory,
        BackendKind::Http => Arc::new(HttpBroker::new(
            &store_info,
            settings.retry.clone(),
            settings.visibility_timeout,
        )),
        BackendKind::Redis => connect_redis(&store_info, settings).await?,
    };

    Ok(Backend { store, queue })
}

#[cfg(feature = "redis")]
async fn connect_redis(
    info: &ConnectionInfo,
    settings: &BrokerSettings,
) -> Result<Arc<super::redis::RedisBroker>, BrokerError> {
    let broker = super::redis::RedisBroker::connect(info.as_str(), settings.visibility_timeout)
        .await?
        .with_prefix(&settings.key_prefix);
    Ok(Arc::new(broker))
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(
    info: &ConnectionInfo,
    _settings: &BrokerSettings,
) -> Result<Arc<MemoryBroker>, BrokerError> {
    Err(BrokerError::InvalidUrl {
        url: info.to_string(),
        reason: "redis support is not compiled in (enable the `redis` feature)".to_string(),
    })
}
