//! Document entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of an uploaded document.
///
/// Created as Uploaded by the ingest orchestrator, transitioned by the
/// worker pipeline; Completed and Failed are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploaded" => Some(Self::Uploaded),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// An uploaded artifact. Belongs to exactly one owner; deletion cascades
/// to its processing jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: Uuid,
    /// Opaque authenticated principal
    pub owner_id: String,
    pub title: String,
    /// Opaque object storage key
    pub storage_key: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub status: DocumentStatus,
    /// Set iff status is Completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for the transactional document + job creation.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub owner_id: String,
    pub title: String,
    pub storage_key: String,
    pub mime_type: String,
    pub size_bytes: i64,
}

/// Partial update applied by the worker pipeline.
#[derive(Debug, Clone, Default)]
pub struct DocumentPatch {
    pub status: Option<DocumentStatus>,
    pub page_count: Option<i32>,
}

impl DocumentPatch {
    pub fn status(status: DocumentStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn completed(page_count: i32) -> Self {
        Self {
            status: Some(DocumentStatus::Completed),
            page_count: Some(page_count),
        }
    }
}
