//! Transactional persistence for documents and processing jobs

mod memory;
mod object;
mod postgres;

pub use memory::MemStore;
pub use object::{FsObjectStore, MemoryObjectStore, ObjectStore};
pub use postgres::PgStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{Document, DocumentPatch, JobPatch, NewDocument, ProcessingJob};

/// Source of truth for document and job state.
///
/// Implementations: [`PgStore`] (production) and [`MemStore`] (tests and
/// local development). All reads are snapshot-consistent; the document
/// and job created by [`Store::create_document_and_job`] either both
/// exist or neither does.
#[async_trait]
pub trait Store: Send + Sync {
    /// Create a document and its initial Pending job in one transaction.
    async fn create_document_and_job(
        &self,
        new: NewDocument,
    ) -> Result<(Document, ProcessingJob)>;

    async fn find_job(&self, job_id: Uuid) -> Result<Option<ProcessingJob>>;

    /// Look up a document; `owner_id`, when given, enforces ownership.
    async fn find_document(
        &self,
        document_id: Uuid,
        owner_id: Option<&str>,
    ) -> Result<Option<Document>>;

    /// Partial job update. Callers are responsible for the lifecycle
    /// invariants; the store applies the patch as given.
    async fn transition_job(&self, job_id: Uuid, patch: JobPatch) -> Result<()>;

    async fn update_document(&self, document_id: Uuid, patch: DocumentPatch) -> Result<()>;

    /// Guard against concurrent duplicate runs on one document.
    async fn find_running_job(&self, document_id: Uuid) -> Result<Option<ProcessingJob>>;

    /// Newest Pending job for a document, if any. Lets the worker adopt
    /// the job created at upload time instead of minting a second one.
    async fn find_latest_pending_job(&self, document_id: Uuid) -> Result<Option<ProcessingJob>>;

    /// Create an additional Pending job for an existing document.
    async fn create_job(&self, document_id: Uuid) -> Result<ProcessingJob>;

    /// Delete an owner's document; cascades to jobs and annotations.
    /// Returns false when nothing matched.
    async fn delete_document(&self, document_id: Uuid, owner_id: &str) -> Result<bool>;

    /// Cheap connectivity probe for health checks.
    async fn ping(&self) -> Result<()>;
}
