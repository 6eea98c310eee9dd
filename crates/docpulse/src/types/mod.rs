//! Core domain types

pub mod document;
pub mod event;
pub mod job;
pub mod response;

pub use document::{Document, DocumentPatch, DocumentStatus, NewDocument};
pub use event::{progress_channel, room_channel, ProgressEvent};
pub use job::{JobPatch, JobStatus, ProcessingJob};
pub use response::{StreamPayload, UploadResponse};
