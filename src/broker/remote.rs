//! HTTP client for a broker node.
//!
//! Implements both [`ResultStore`] and [`BrokerQueue`] by calling the endpoints
//! in [`super::protocol`]. Transport failures are retried with exponential
//! backoff and jitter; once the attempts are exhausted the call fails with
//! [`BrokerError::Unavailable`] and the caller decides what to do.

use super::connection::ConnectionInfo;
use super::protocol::*;
use super::{BrokerQueue, BrokerStats, Delivery, DeliveryTag, ResultStore};
use crate::config::RetryPolicy;
use crate::error::BrokerError;
use crate::executor::types::{TaskEnvelope, TaskId, TaskRecord};

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

pub struct HttpBroker {
    base_url: String,
    credential: Option<String>,
    http_client: reqwest::Client,
    retry: RetryPolicy,
    visibility_timeout: Duration,
}

impl HttpBroker {
    pub fn new(connection: &ConnectionInfo, retry: RetryPolicy, visibility_timeout: Duration) -> Self {
        Self {
            base_url: connection.base_url(),
            credential: connection.credential.clone(),
            http_client: reqwest::Client::new(),
            retry,
            visibility_timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credential {
            Some(credential) => request.bearer_auth(credential),
            None => request,
        }
    }

    // --- HTTP Helpers with Backoff ---

    async fn send_with_retry<F>(&self, build: F, timeout: Duration) -> Result<reqwest::Response, BrokerError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let attempts = self.retry.attempts.max(1);
        let mut delay_ms = self.retry.base_delay.as_millis() as u64;
        let max_delay_ms = self.retry.max_delay.as_millis() as u64;

        for attempt in 0..attempts {
            let response = self.authorize(build()).timeout(timeout).send().await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == attempts {
                        return Err(BrokerError::Unavailable(e.to_string()));
                    }
                    tracing::debug!(
                        "Broker request failed (attempt {}/{}): {}",
                        attempt + 1,
                        attempts,
                        e
                    );
                    // Exponential backoff plus up to 50ms of jitter
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(max_delay_ms);
                }
            }
        }

        Err(BrokerError::Unavailable("Retry attempts exhausted".to_string()))
    }

    async fn post_json<T: serde::Serialize>(
        &self,
        path: &str,
        payload: &T,
        timeout: Duration,
    ) -> Result<reqwest::Response, BrokerError> {
        let url = self.url(path);
        let response = self
            .send_with_retry(|| self.http_client.post(&url).json(payload), timeout)
            .await?;
        check_status(response).await
    }

    pub async fn stats(&self) -> Result<BrokerStats, BrokerError> {
        let url = self.url(ENDPOINT_STATS);
        let response = self
            .send_with_retry(|| self.http_client.get(&url), self.retry.request_timeout)
            .await?;
        Ok(check_status(response).await?.json().await?)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BrokerError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(BrokerError::Unauthorized),
        s if s.is_server_error() => Err(BrokerError::Unavailable(format!(
            "broker node answered {}",
            s
        ))),
        s => Err(BrokerError::Protocol(format!("unexpected status {}", s))),
    }
}

#[async_trait]
impl ResultStore for HttpBroker {
    async fn get(&self, id: &TaskId) -> Result<Option<TaskRecord>, BrokerError> {
        let url = format!("{}/{}", self.url(ENDPOINT_RECORDS), id);
        let response = self
            .send_with_retry(|| self.http_client.get(&url), self.retry.request_timeout)
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let record: TaskRecord = check_status(response).await?.json().await?;
        Ok(Some(record))
    }

    async fn put(&self, record: &TaskRecord) -> Result<(), BrokerError> {
        let url = format!("{}/{}", self.url(ENDPOINT_RECORDS), record.id);
        let response = self
            .send_with_retry(
                || self.http_client.put(&url).json(record),
                self.retry.request_timeout,
            )
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

#[async_trait]
impl BrokerQueue for HttpBroker {
    async fn publish(&self, envelope: &TaskEnvelope) -> Result<(), BrokerError> {
        let payload = PublishRequest {
            envelope: envelope.clone(),
        };
        self.post_json(ENDPOINT_PUBLISH, &payload, self.retry.request_timeout)
            .await?;
        Ok(())
    }

    async fn consume(&self, wait: Duration) -> Result<Option<Delivery>, BrokerError> {
        let wait_ms = (wait.as_millis() as u64).min(MAX_CONSUME_WAIT_MS);
        let payload = ConsumeRequest { wait_ms };
        // The node holds the request open for up to `wait_ms`.
        let timeout = Duration::from_millis(wait_ms) + self.retry.request_timeout;

        let response: ConsumeResponse = self
            .post_json(ENDPOINT_CONSUME, &payload, timeout)
            .await?
            .json()
            .await?;
        Ok(response.delivery)
    }

    async fn ack(&self, tag: &DeliveryTag) -> Result<bool, BrokerError> {
        let payload = DeliveryTagRequest { tag: tag.clone() };
        let response: DeliveryTagResponse = self
            .post_json(ENDPOINT_ACK, &payload, self.retry.request_timeout)
            .await?
            .json()
            .await?;
        Ok(response.ok)
    }

    async fn extend(&self, tag: &DeliveryTag) -> Result<bool, BrokerError> {
        let payload = DeliveryTagRequest { tag: tag.clone() };
        let response: DeliveryTagResponse = self
            .post_json(ENDPOINT_EXTEND, &payload, self.retry.request_timeout)
            .await?
            .json()
            .await?;
        Ok(response.ok)
    }

    fn visibility_timeout(&self) -> Duration {
        self.visibility_timeout
    }
}
