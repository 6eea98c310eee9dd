//! HTTP response bodies

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::document::Document;
use super::event::ProgressEvent;
use super::job::{JobStatus, ProcessingJob};

/// Body returned by `POST /documents/upload` on both 201 and 202.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub document_id: Uuid,
    pub job_id: Uuid,
    pub status: JobStatus,
    pub title: String,
    pub storage_key: String,
    pub size: i64,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
}

impl UploadResponse {
    pub fn new(document: &Document, job: &ProcessingJob) -> Self {
        Self {
            document_id: document.id,
            job_id: job.id,
            status: job.status,
            title: document.title.clone(),
            storage_key: document.storage_key.clone(),
            size: document.size_bytes,
            mime_type: document.mime_type.clone(),
            created_at: document.created_at,
        }
    }
}

/// Data payload of `progress` frames on the SSE stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamPayload {
    pub job_id: Uuid,
    pub document_id: Uuid,
    pub percent: i16,
    /// Uppercase job status
    pub stage: String,
    pub message: String,
    pub current_page: u32,
    pub total_pages: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StreamPayload {
    /// Snapshot frame built from the stored job row. Page counters are
    /// zero here; only live events carry them.
    pub fn snapshot(job: &ProcessingJob) -> Self {
        let message = match job.status {
            JobStatus::Pending => "Job is queued for processing".to_string(),
            JobStatus::Running => {
                format!("Processing in progress — {}% complete", job.progress)
            }
            JobStatus::Completed => "Processing completed successfully".to_string(),
            JobStatus::Failed => job
                .error_message
                .clone()
                .unwrap_or_else(|| "Processing failed".to_string()),
        };

        Self {
            job_id: job.id,
            document_id: job.document_id,
            percent: job.progress,
            stage: job.status.stage_label().to_string(),
            message,
            current_page: 0,
            total_pages: 0,
            error_message: job.error_message.clone(),
            timestamp: job.updated_at,
        }
    }

    /// Translation of a live channel event.
    pub fn from_event(event: &ProgressEvent) -> Self {
        Self {
            job_id: event.job_id,
            document_id: event.document_id,
            percent: event.progress,
            stage: event.status.stage_label().to_string(),
            message: event.message.clone(),
            current_page: event.current_page,
            total_pages: event.total_pages,
            error_message: event.error_message.clone(),
            timestamp: event.published_at,
        }
    }
}
