//! HTTP transport for the worker RPC surface

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::json;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::rpc::{RpcError, StartProcessingRequest};

use super::WorkerService;

/// Build the worker service router.
pub fn router(service: Arc<WorkerService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/rpc/start-processing", post(start_processing))
        .route("/rpc/jobs/:id/progress", get(observe_progress))
        .with_state(service)
        .layer(TraceLayer::new_for_http())
}

async fn health(State(service): State<Arc<WorkerService>>) -> StatusCode {
    match tokio::time::timeout(Duration::from_secs(3), service.ping_store()).await {
        Ok(Ok(())) => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn start_processing(
    State(service): State<Arc<WorkerService>>,
    Json(request): Json<StartProcessingRequest>,
) -> Response {
    match service.accept(request).await {
        Ok(accepted) => (StatusCode::OK, Json(accepted)).into_response(),
        Err(err) => rpc_error_response(err),
    }
}

/// Server-stream of progress updates as newline-delimited JSON.
async fn observe_progress(
    State(service): State<Arc<WorkerService>>,
    Path(job_id): Path<Uuid>,
) -> Response {
    match service.observe_progress(job_id).await {
        Ok(updates) => {
            let body = Body::from_stream(updates.map(|update| {
                let mut line = serde_json::to_string(&update).unwrap_or_default();
                line.push('\n');
                Ok::<_, std::convert::Infallible>(Bytes::from(line))
            }));
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/x-ndjson")],
                body,
            )
                .into_response()
        }
        Err(err) => rpc_error_response(err),
    }
}

fn rpc_error_response(err: RpcError) -> Response {
    let status = StatusCode::from_u16(err.status.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = Json(json!({
        "statusCode": status.as_u16(),
        "message": err.message,
        "error": err.status.as_str(),
    }));
    (status, body).into_response()
}
