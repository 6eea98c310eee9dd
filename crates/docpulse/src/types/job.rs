//! Processing job entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a single processing attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Uppercase form used as the `stage` field on stream frames.
    pub fn stage_label(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One processing attempt on a document.
///
/// Invariants:
/// - progress is monotonically non-decreasing within a Running session
/// - `completed_at` is set iff the status is terminal
/// - `started_at` is set iff the job has ever been Running
/// - `result` implies Completed; `error_message` implies Failed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingJob {
    pub id: Uuid,
    pub document_id: Uuid,
    pub status: JobStatus,
    /// Percent in [0, 100]; 100 is only written together with a terminal status
    pub progress: i16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update applied through the store. `None` leaves the column
/// untouched; the caller is responsible for the lifecycle invariants.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub progress: Option<i16>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobPatch {
    pub fn running(started_at: DateTime<Utc>) -> Self {
        Self {
            status: Some(JobStatus::Running),
            progress: Some(0),
            started_at: Some(started_at),
            ..Self::default()
        }
    }

    pub fn progress(progress: i16) -> Self {
        Self {
            progress: Some(progress),
            ..Self::default()
        }
    }

    pub fn completed(result: serde_json::Value, completed_at: DateTime<Utc>) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            progress: Some(100),
            result: Some(result),
            completed_at: Some(completed_at),
            ..Self::default()
        }
    }

    pub fn failed(error_message: String, completed_at: DateTime<Utc>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error_message: Some(error_message),
            completed_at: Some(completed_at),
            ..Self::default()
        }
    }
}
