//! Front service: router assembly and document endpoints

pub mod state;

use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{Error, Result};
use crate::{collab, ingest, stream};
use state::AppState;

/// Build the front service router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // The explicit size check in the upload handler produces the precise
    // 413 body; the transport limit above it only stops runaway bodies.
    let body_limit = state.config().server.max_upload_bytes * 2;

    Router::new()
        .route("/health", get(health))
        .route(
            "/documents/upload",
            post(ingest::upload_document).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/documents/:id/progress", get(stream::stream_progress))
        .route("/documents/:id", delete(delete_document))
        .route("/collab", get(collab::collab_socket))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// GET /health: 200 when the database answers within 3 seconds.
async fn health(State(state): State<AppState>) -> StatusCode {
    match tokio::time::timeout(Duration::from_secs(3), state.store().ping()).await {
        Ok(Ok(())) => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// DELETE /documents/:id: owner-checked; cascades to jobs and
/// annotations, then removes the stored object best-effort.
async fn delete_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
) -> Result<StatusCode> {
    let Some(document) = state.store().find_document(document_id, None).await? else {
        return Err(Error::not_found(format!("Document {document_id} not found")));
    };
    if document.owner_id != user.id() {
        return Err(Error::Ownership);
    }

    let deleted = state.store().delete_document(document_id, user.id()).await?;
    if !deleted {
        return Err(Error::not_found(format!("Document {document_id} not found")));
    }

    if let Err(err) = state.objects().delete(&document.storage_key).await {
        tracing::warn!(
            document_id = %document_id,
            key = %document.storage_key,
            error = %err,
            "stored object left behind after delete"
        );
    }

    Ok(StatusCode::NO_CONTENT)
}
