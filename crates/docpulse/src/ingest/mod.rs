//! Ingest orchestrator
//!
//! Accepts a client upload and makes it runnable: validate, push the
//! bytes to object storage, create the Document + Job pair in one
//! transaction, then dispatch to the worker under a hard deadline. A
//! dispatch failure is never fatal; the job stays Pending and the client
//! still gets a fully formed body it can stream against.

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Datelike, Utc};
use tokio::time::timeout;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{Error, Result};
use crate::rpc::StartProcessingRequest;
use crate::server::state::AppState;
use crate::types::{NewDocument, UploadResponse};

/// POST /documents/upload
pub async fn upload_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    multipart: Multipart,
) -> Result<Response> {
    let config = &state.config().server;
    let upload = read_upload(multipart, config.max_title_len).await?;

    // Validation order matters for the error a client sees: presence,
    // media type, then size.
    if upload.data.is_empty() {
        return Err(Error::MissingFile);
    }
    if !config
        .allowed_media_types
        .iter()
        .any(|allowed| allowed == &upload.mime_type)
    {
        return Err(Error::UnsupportedMediaType(format!(
            "'{}' is not supported; allowed types: {}",
            upload.mime_type,
            config.allowed_media_types.join(", ")
        )));
    }
    if upload.data.len() > config.max_upload_bytes {
        return Err(Error::PayloadTooLarge {
            limit: config.max_upload_bytes,
        });
    }

    let title = match upload.title {
        Some(title) if !title.is_empty() => title,
        _ => upload.filename.trim().to_string(),
    };

    // Object storage first: if this fails nothing exists yet and the
    // client simply retries. The reverse order would leak rows pointing
    // at nothing.
    let storage_key = storage_key(&upload.filename);
    state
        .objects()
        .put(&storage_key, &upload.data)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "object storage rejected upload");
            e
        })?;

    let (document, job) = state
        .store()
        .create_document_and_job(NewDocument {
            owner_id: user.id().to_string(),
            title,
            storage_key: storage_key.clone(),
            mime_type: upload.mime_type.clone(),
            size_bytes: upload.data.len() as i64,
        })
        .await?;

    tracing::info!(
        document_id = %document.id,
        job_id = %job.id,
        size = document.size_bytes,
        "upload committed"
    );

    // Bounded dispatch. Deadline exceeded, worker unreachable or any RPC
    // error all land in the same place: 202, job stays Pending, a future
    // reconciler re-drives it.
    let dispatch = timeout(
        config.dispatch_timeout(),
        state.rpc().start_processing(StartProcessingRequest {
            document_id: document.id.to_string(),
            owner_id: document.owner_id.clone(),
            storage_key,
            mime_type: document.mime_type.clone(),
        }),
    )
    .await;

    let status = match dispatch {
        Ok(Ok(accepted)) => {
            tracing::debug!(job_id = %accepted.job_id, "worker accepted job");
            StatusCode::CREATED
        }
        Ok(Err(err)) => {
            tracing::warn!(job_id = %job.id, error = %err, "worker dispatch failed");
            StatusCode::ACCEPTED
        }
        Err(_) => {
            tracing::warn!(job_id = %job.id, "worker dispatch deadline exceeded");
            StatusCode::ACCEPTED
        }
    };

    Ok((status, Json(UploadResponse::new(&document, &job))).into_response())
}

struct Upload {
    data: Vec<u8>,
    filename: String,
    mime_type: String,
    title: Option<String>,
}

/// Pull the `file` and optional `title` fields out of the multipart
/// body. Titles over the limit are rejected here, before any side
/// effects.
async fn read_upload(mut multipart: Multipart, max_title_len: usize) -> Result<Upload> {
    let mut upload = Upload {
        data: Vec::new(),
        filename: String::new(),
        mime_type: "application/octet-stream".to_string(),
        title: None,
    };
    let mut saw_file = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(format!("Failed to read multipart field: {e}")))?
    {
        match field.name().unwrap_or("") {
            "title" => {
                let title = field
                    .text()
                    .await
                    .map_err(|e| Error::Validation(format!("Failed to read title: {e}")))?;
                let title = title.trim().to_string();
                if title.chars().count() > max_title_len {
                    return Err(Error::Validation(format!(
                        "Title exceeds the maximum length of {max_title_len} characters"
                    )));
                }
                upload.title = Some(title);
            }
            "file" => {
                saw_file = true;
                upload.filename = field
                    .file_name()
                    .map(|name| name.to_string())
                    .unwrap_or_else(|| format!("upload-{}", Uuid::new_v4()));
                if let Some(content_type) = field.content_type() {
                    upload.mime_type = content_type.to_string();
                }
                upload.data = field
                    .bytes()
                    .await
                    .map_err(|e| Error::Validation(format!("Failed to read file: {e}")))?
                    .to_vec();
            }
            other => {
                tracing::debug!(field = other, "ignoring unknown multipart field");
            }
        }
    }

    if !saw_file {
        return Err(Error::MissingFile);
    }
    Ok(upload)
}

/// Opaque object key: `{year}/{uuid}-{sanitized filename}`.
fn storage_key(filename: &str) -> String {
    format!(
        "{}/{}-{}",
        Utc::now().year(),
        Uuid::new_v4(),
        sanitize_filename(filename)
    )
}

fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();

    if cleaned.trim_matches('-').is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}
