//! Transient progress events carried on the event channel
//!
//! Events are never persisted; the durable store stays authoritative and
//! every durable write happens before the matching publish.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::JobStatus;

/// Channel key for one job's progress events. Stable across restarts of
/// both producer and consumer.
pub fn progress_channel(job_id: Uuid) -> String {
    format!("doc:{job_id}:progress")
}

/// Channel key for one document's collaboration room.
pub fn room_channel(document_id: &str) -> String {
    format!("room:doc:{document_id}")
}

/// Wire shape published on `doc:{jobId}:progress`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub job_id: Uuid,
    pub document_id: Uuid,
    pub status: JobStatus,
    /// Percent in [0, 100]; Running events stay below 100
    pub progress: i16,
    /// Human-readable description of the current activity
    pub message: String,
    pub current_page: u32,
    pub total_pages: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub published_at: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn running(
        job_id: Uuid,
        document_id: Uuid,
        progress: i16,
        message: String,
        current_page: u32,
        total_pages: u32,
    ) -> Self {
        Self {
            job_id,
            document_id,
            status: JobStatus::Running,
            progress,
            message,
            current_page,
            total_pages,
            error_message: None,
            published_at: Utc::now(),
        }
    }

    pub fn completed(job_id: Uuid, document_id: Uuid, total_pages: u32) -> Self {
        Self {
            job_id,
            document_id,
            status: JobStatus::Completed,
            progress: 100,
            message: format!("Processing complete — {total_pages} pages extracted"),
            current_page: total_pages,
            total_pages,
            error_message: None,
            published_at: Utc::now(),
        }
    }

    pub fn failed(job_id: Uuid, document_id: Uuid, error: &str) -> Self {
        Self {
            job_id,
            document_id,
            status: JobStatus::Failed,
            progress: 0,
            message: "Processing failed".to_string(),
            current_page: 0,
            total_pages: 0,
            error_message: Some(error.to_string()),
            published_at: Utc::now(),
        }
    }
}
