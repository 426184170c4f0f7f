use super::producer::Producer;
use super::protocol::*;
use super::status::StatusReader;
use super::types::*;
use crate::error::Error;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};

/// Builds the producer/status router.
pub fn api_router(producer: Producer, status: StatusReader) -> Router {
    Router::new()
        .route(ENDPOINT_SUBMIT_TASK, post(handle_submit_task))
        .route(
            &format!("{}/:task_name", ENDPOINT_SUBMIT_TASK),
            get(handle_submit_task_query),
        )
        .route(
            &format!("{}/:task_id", ENDPOINT_TASK_STATUS),
            get(handle_get_task_status),
        )
        .route(ENDPOINT_HEALTH, get(handle_health))
        .layer(Extension(producer))
        .layer(Extension(status))
}

/// Errors of the HTTP surface, mapped to status codes and a JSON body.
#[derive(Debug)]
pub enum ApiError {
    Task(Error),
    /// The request body or parameters could not be decoded.
    BadRequest(String),
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError::Task(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = match self {
            ApiError::Task(error) => error,
            ApiError::BadRequest(message) => {
                let body = ErrorResponse {
                    error: ErrorDetail {
                        code: "BAD_REQUEST".to_string(),
                        message,
                        task_id: None,
                    },
                };
                return (StatusCode::BAD_REQUEST, Json(body)).into_response();
            }
        };

        let (status, code, task_id) = match &error {
            Error::NotFound(id) => (StatusCode::NOT_FOUND, "NOT_FOUND", Some(id.clone())),
            Error::Submission { task_id, .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SUBMISSION_FAILED",
                Some(task_id.clone()),
            ),
            Error::Broker(_) => (StatusCode::SERVICE_UNAVAILABLE, "BROKER_UNAVAILABLE", None),
            Error::Timeout { task_id, .. } => (
                StatusCode::GATEWAY_TIMEOUT,
                "TIMEOUT",
                Some(task_id.clone()),
            ),
            Error::IllegalTransition { task_id, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                Some(task_id.clone()),
            ),
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message: error.to_string(),
                task_id,
            },
        };
        (status, Json(body)).into_response()
    }
}

pub async fn handle_submit_task(
    Extension(producer): Extension<Producer>,
    payload: Result<Json<SubmitTaskRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitTaskResponse>), ApiError> {
    let Json(req) = payload.inspect_err(|rejection| {
        tracing::debug!("Rejected submit request: {}", rejection.body_text());
    })?;
    submit(&producer, &req.task_name, req.args).await
}

pub async fn handle_submit_task_query(
    Extension(producer): Extension<Producer>,
    Path(task_name): Path<String>,
    Query(query): Query<SubmitTaskQuery>,
) -> Result<(StatusCode, Json<SubmitTaskResponse>), ApiError> {
    submit(&producer, &task_name, query.into_args()).await
}

async fn submit(
    producer: &Producer,
    task_name: &str,
    args: Vec<serde_json::Value>,
) -> Result<(StatusCode, Json<SubmitTaskResponse>), ApiError> {
    match producer.submit(task_name, args).await {
        Ok(task_id) => Ok((StatusCode::ACCEPTED, Json(SubmitTaskResponse { task_id }))),
        Err(e) => {
            tracing::error!("Failed to submit task {}: {}", task_name, e);
            Err(e.into())
        }
    }
}

pub async fn handle_get_task_status(
    Extension(status): Extension<StatusReader>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    let task_id = TaskId(task_id);

    let record = status.status(&task_id).await.inspect_err(|e| {
        tracing::debug!("Task status query for {} failed: {}", task_id, e);
    })?;
    tracing::debug!("Task status query: {} -> {}", task_id, record.state());
    Ok(Json(record.into()))
}

pub async fn handle_health() -> &'static str {
    "ok"
}
