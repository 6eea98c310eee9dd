//! In-memory store for tests and local development

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{
    Document, DocumentPatch, DocumentStatus, JobPatch, JobStatus, NewDocument, ProcessingJob,
};

use super::Store;

#[derive(Default)]
pub struct MemStore {
    documents: DashMap<Uuid, Document>,
    jobs: DashMap<Uuid, ProcessingJob>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply_job_patch(job: &mut ProcessingJob, patch: JobPatch) {
        if let Some(status) = patch.status {
            job.status = status;
        }
        if let Some(progress) = patch.progress {
            job.progress = progress;
        }
        if let Some(result) = patch.result {
            job.result = Some(result);
        }
        if let Some(error_message) = patch.error_message {
            job.error_message = Some(error_message);
        }
        if let Some(started_at) = patch.started_at {
            job.started_at = Some(started_at);
        }
        if let Some(completed_at) = patch.completed_at {
            job.completed_at = Some(completed_at);
        }
        job.updated_at = Utc::now();
    }
}

#[async_trait]
impl Store for MemStore {
    async fn create_document_and_job(
        &self,
        new: NewDocument,
    ) -> Result<(Document, ProcessingJob)> {
        let now = Utc::now();
        let document = Document {
            id: Uuid::new_v4(),
            owner_id: new.owner_id,
            title: new.title,
            storage_key: new.storage_key,
            mime_type: new.mime_type,
            size_bytes: new.size_bytes,
            status: DocumentStatus::Uploaded,
            page_count: None,
            created_at: now,
            updated_at: now,
        };
        let job = ProcessingJob {
            id: Uuid::new_v4(),
            document_id: document.id,
            status: JobStatus::Pending,
            progress: 0,
            result: None,
            error_message: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };

        self.documents.insert(document.id, document.clone());
        self.jobs.insert(job.id, job.clone());
        Ok((document, job))
    }

    async fn find_job(&self, job_id: Uuid) -> Result<Option<ProcessingJob>> {
        Ok(self.jobs.get(&job_id).map(|j| j.clone()))
    }

    async fn find_document(
        &self,
        document_id: Uuid,
        owner_id: Option<&str>,
    ) -> Result<Option<Document>> {
        Ok(self
            .documents
            .get(&document_id)
            .map(|d| d.clone())
            .filter(|d| owner_id.map_or(true, |owner| d.owner_id == owner)))
    }

    async fn transition_job(&self, job_id: Uuid, patch: JobPatch) -> Result<()> {
        let mut job = self
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| Error::not_found(format!("Job {job_id} not found")))?;
        Self::apply_job_patch(&mut job, patch);
        Ok(())
    }

    async fn update_document(&self, document_id: Uuid, patch: DocumentPatch) -> Result<()> {
        let mut document = self
            .documents
            .get_mut(&document_id)
            .ok_or_else(|| Error::not_found(format!("Document {document_id} not found")))?;
        if let Some(status) = patch.status {
            document.status = status;
        }
        if let Some(page_count) = patch.page_count {
            document.page_count = Some(page_count);
        }
        document.updated_at = Utc::now();
        Ok(())
    }

    async fn find_running_job(&self, document_id: Uuid) -> Result<Option<ProcessingJob>> {
        Ok(self
            .jobs
            .iter()
            .filter(|j| j.document_id == document_id && j.status == JobStatus::Running)
            .max_by_key(|j| j.created_at)
            .map(|j| j.clone()))
    }

    async fn find_latest_pending_job(&self, document_id: Uuid) -> Result<Option<ProcessingJob>> {
        Ok(self
            .jobs
            .iter()
            .filter(|j| j.document_id == document_id && j.status == JobStatus::Pending)
            .max_by_key(|j| j.created_at)
            .map(|j| j.clone()))
    }

    async fn create_job(&self, document_id: Uuid) -> Result<ProcessingJob> {
        if !self.documents.contains_key(&document_id) {
            return Err(Error::not_found(format!("Document {document_id} not found")));
        }

        let now = Utc::now();
        let job = ProcessingJob {
            id: Uuid::new_v4(),
            document_id,
            status: JobStatus::Pending,
            progress: 0,
            result: None,
            error_message: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn delete_document(&self, document_id: Uuid, owner_id: &str) -> Result<bool> {
        let owned = self
            .documents
            .get(&document_id)
            .map(|d| d.owner_id == owner_id)
            .unwrap_or(false);
        if !owned {
            return Ok(false);
        }

        self.documents.remove(&document_id);
        self.jobs.retain(|_, job| job.document_id != document_id);
        Ok(true)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
