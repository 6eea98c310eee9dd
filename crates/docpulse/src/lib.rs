//! docpulse: document processing platform with live progress streaming
//!
//! Two services share this library: the front service (upload ingestion,
//! SSE progress bridge, collaboration fan-out) and the worker service
//! (processing RPC surface plus the background execution engine). They
//! communicate through a durable store (PostgreSQL) and an ephemeral
//! event channel (Redis pub/sub); the store is always authoritative.

pub mod auth;
pub mod collab;
pub mod config;
pub mod error;
pub mod events;
pub mod ingest;
pub mod rpc;
pub mod server;
pub mod storage;
pub mod stream;
pub mod types;
pub mod worker;

pub use config::Config;
pub use error::{Error, Result};
pub use types::{
    document::{Document, DocumentStatus},
    event::ProgressEvent,
    job::{JobStatus, ProcessingJob},
};
