use super::memory::MemoryBroker;
use super::protocol::*;
use super::{BrokerQueue, BrokerStats, ResultStore};
use crate::executor::types::{TaskId, TaskRecord};

use axum::extract::{Path, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use std::sync::Arc;
use std::time::Duration;

/// Builds the broker node router around a memory broker.
///
/// With `credential` set, every route requires `Authorization: Bearer <credential>`.
pub fn broker_router(broker: Arc<MemoryBroker>, credential: Option<String>) -> Router {
    let router = Router::new()
        .route(ENDPOINT_PUBLISH, post(handle_publish))
        .route(ENDPOINT_CONSUME, post(handle_consume))
        .route(ENDPOINT_ACK, post(handle_ack))
        .route(ENDPOINT_EXTEND, post(handle_extend))
        .route(
            &format!("{}/:task_id", ENDPOINT_RECORDS),
            get(handle_get_record).put(handle_put_record),
        )
        .route(ENDPOINT_STATS, get(handle_stats))
        .layer(Extension(broker));

    match credential {
        Some(credential) => router.layer(middleware::from_fn_with_state(
            Arc::<str>::from(credential),
            require_credential,
        )),
        None => router,
    }
}

async fn require_credential(
    State(credential): State<Arc<str>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    if presented == Some(&*credential) {
        Ok(next.run(request).await)
    } else {
        tracing::warn!("Rejected broker request to {} without valid credential", request.uri());
        Err(StatusCode::UNAUTHORIZED)
    }
}

pub async fn handle_publish(
    Extension(broker): Extension<Arc<MemoryBroker>>,
    Json(req): Json<PublishRequest>,
) -> StatusCode {
    match broker.publish(&req.envelope).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::error!("Failed to publish task {}: {}", req.envelope.id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub async fn handle_consume(
    Extension(broker): Extension<Arc<MemoryBroker>>,
    Json(req): Json<ConsumeRequest>,
) -> (StatusCode, Json<ConsumeResponse>) {
    let wait = Duration::from_millis(req.wait_ms.min(MAX_CONSUME_WAIT_MS));

    match broker.consume(wait).await {
        Ok(delivery) => {
            if let Some(delivery) = &delivery {
                tracing::debug!(
                    "Handing out task {} (delivery {}, attempt {})",
                    delivery.envelope.id,
                    delivery.tag,
                    delivery.delivery_count
                );
            }
            (StatusCode::OK, Json(ConsumeResponse { delivery }))
        }
        Err(e) => {
            tracing::error!("Consume failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ConsumeResponse { delivery: None }),
            )
        }
    }
}

pub async fn handle_ack(
    Extension(broker): Extension<Arc<MemoryBroker>>,
    Json(req): Json<DeliveryTagRequest>,
) -> (StatusCode, Json<DeliveryTagResponse>) {
    match broker.ack(&req.tag).await {
        Ok(ok) => (StatusCode::OK, Json(DeliveryTagResponse { ok })),
        Err(e) => {
            tracing::error!("Ack of {} failed: {}", req.tag, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(DeliveryTagResponse { ok: false }),
            )
        }
    }
}

pub async fn handle_extend(
    Extension(broker): Extension<Arc<MemoryBroker>>,
    Json(req): Json<DeliveryTagRequest>,
) -> (StatusCode, Json<DeliveryTagResponse>) {
    match broker.extend(&req.tag).await {
        Ok(ok) => (StatusCode::OK, Json(DeliveryTagResponse { ok })),
        Err(e) => {
            tracing::error!("Extend of {} failed: {}", req.tag, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(DeliveryTagResponse { ok: false }),
            )
        }
    }
}

pub async fn handle_get_record(
    Extension(broker): Extension<Arc<MemoryBroker>>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskRecord>, StatusCode> {
    let task_id = TaskId(task_id);

    match broker.get(&task_id).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => {
            tracing::debug!("Record not found: {}", task_id);
            Err(StatusCode::NOT_FOUND)
        }
        Err(e) => {
            tracing::error!("Failed to read record {}: {}", task_id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn handle_put_record(
    Extension(broker): Extension<Arc<MemoryBroker>>,
    Path(task_id): Path<String>,
    Json(record): Json<TaskRecord>,
) -> StatusCode {
    if record.id.0 != task_id {
        tracing::warn!("Record id {} does not match path {}", record.id, task_id);
        return StatusCode::BAD_REQUEST;
    }

    match broker.put(&record).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::error!("Failed to store record {}: {}", task_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub async fn handle_stats(Extension(broker): Extension<Arc<MemoryBroker>>) -> Json<BrokerStats> {
    Json(broker.stats().await)
}
