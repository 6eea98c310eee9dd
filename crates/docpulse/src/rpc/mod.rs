//! Typed RPC contract between the front service and the worker
//!
//! The contract is transport-independent: request, response and status
//! types live here, the worker serves them over HTTP (unary JSON for
//! StartProcessing, newline-delimited JSON for the ObserveProgress
//! stream) and [`HttpProcessingRpc`] is the dialing side.

mod client;

pub use client::HttpProcessingRpc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::JobStatus;

/// Status codes of the RPC surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcStatus {
    InvalidArgument,
    NotFound,
    Internal,
    /// Reserved for transport failures; never produced by the worker.
    Unavailable,
}

impl RpcStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::NotFound => "not_found",
            Self::Internal => "internal",
            Self::Unavailable => "unavailable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "invalid_argument" => Some(Self::InvalidArgument),
            "not_found" => Some(Self::NotFound),
            "internal" => Some(Self::Internal),
            "unavailable" => Some(Self::Unavailable),
            _ => None,
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidArgument => 400,
            Self::NotFound => 404,
            Self::Internal => 500,
            Self::Unavailable => 503,
        }
    }
}

/// RPC failure with its status code.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{status:?}: {message}")]
pub struct RpcError {
    pub status: RpcStatus,
    pub message: String,
}

impl RpcError {
    pub fn new(status: RpcStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(RpcStatus::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RpcStatus::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(RpcStatus::Internal, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(RpcStatus::Unavailable, message)
    }
}

/// Instant as a seconds/nanos pair, matching protobuf timestamp shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTimestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl From<DateTime<Utc>> for WireTimestamp {
    fn from(t: DateTime<Utc>) -> Self {
        Self {
            seconds: t.timestamp(),
            nanos: t.timestamp_subsec_nanos() as i32,
        }
    }
}

impl WireTimestamp {
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.seconds, self.nanos.max(0) as u32).single()
    }
}

/// Input of StartProcessing. Ids travel as strings so empty values can
/// be rejected with `invalid_argument` rather than a transport error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartProcessingRequest {
    pub document_id: String,
    pub owner_id: String,
    pub storage_key: String,
    pub mime_type: String,
}

/// Acknowledgement of StartProcessing; returned before any page work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingAccepted {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub accepted_at: WireTimestamp,
}

/// One element of the ObserveProgress stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: i16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub updated_at: WireTimestamp,
}

/// Dialing side of the worker RPC surface. The in-process
/// [`crate::worker::WorkerService`] implements it directly for tests
/// and single-process runs.
#[async_trait]
pub trait ProcessingRpc: Send + Sync {
    async fn start_processing(
        &self,
        request: StartProcessingRequest,
    ) -> std::result::Result<ProcessingAccepted, RpcError>;
}
