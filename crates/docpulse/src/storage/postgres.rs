//! PostgreSQL store

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Executor, Row};
use tracing::instrument;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::types::{
    Document, DocumentPatch, DocumentStatus, JobPatch, JobStatus, NewDocument, ProcessingJob,
};

use super::Store;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and apply the schema.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await?;

        (&pool).execute(include_str!("schema.sql")).await?;

        tracing::info!("database schema applied");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_document(row: &PgRow) -> Result<Document> {
        let status: String = row.try_get("status")?;
        let status = DocumentStatus::parse(&status)
            .ok_or_else(|| Error::Database(format!("unknown document status '{status}'")))?;

        Ok(Document {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            title: row.try_get("title")?,
            storage_key: row.try_get("storage_key")?,
            mime_type: row.try_get("mime_type")?,
            size_bytes: row.try_get("size_bytes")?,
            status,
            page_count: row.try_get("page_count")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_job(row: &PgRow) -> Result<ProcessingJob> {
        let status: String = row.try_get("status")?;
        let status = JobStatus::parse(&status)
            .ok_or_else(|| Error::Database(format!("unknown job status '{status}'")))?;

        Ok(ProcessingJob {
            id: row.try_get("id")?,
            document_id: row.try_get("document_id")?,
            status,
            progress: row.try_get("progress")?,
            result: row.try_get("result")?,
            error_message: row.try_get("error_message")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl Store for PgStore {
    #[instrument(name = "db.create_document_and_job", skip_all, fields(owner = %new.owner_id))]
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

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO documents \
             (id, owner_id, title, storage_key, mime_type, size_bytes, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(document.id)
        .bind(&document.owner_id)
        .bind(&document.title)
        .bind(&document.storage_key)
        .bind(&document.mime_type)
        .bind(document.size_bytes)
        .bind(document.status.as_str())
        .bind(document.created_at)
        .bind(document.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO processing_jobs \
             (id, document_id, status, progress, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(job.id)
        .bind(job.document_id)
        .bind(job.status.as_str())
        .bind(job.progress)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok((document, job))
    }

    async fn find_job(&self, job_id: Uuid) -> Result<Option<ProcessingJob>> {
        let row = sqlx::query("SELECT * FROM processing_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn find_document(
        &self,
        document_id: Uuid,
        owner_id: Option<&str>,
    ) -> Result<Option<Document>> {
        let row = match owner_id {
            Some(owner) => {
                sqlx::query("SELECT * FROM documents WHERE id = $1 AND owner_id = $2")
                    .bind(document_id)
                    .bind(owner)
                    .fetch_optional(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM documents WHERE id = $1")
                    .bind(document_id)
                    .fetch_optional(&self.pool)
                    .await?
            }
        };

        row.as_ref().map(Self::row_to_document).transpose()
    }

    #[instrument(name = "db.transition_job", skip_all, fields(job_id = %job_id))]
    async fn transition_job(&self, job_id: Uuid, patch: JobPatch) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE processing_jobs SET \
                status = COALESCE($2, status), \
                progress = COALESCE($3, progress), \
                result = COALESCE($4, result), \
                error_message = COALESCE($5, error_message), \
                started_at = COALESCE($6, started_at), \
                completed_at = COALESCE($7, completed_at), \
                updated_at = now() \
             WHERE id = $1",
        )
        .bind(job_id)
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.progress)
        .bind(patch.result)
        .bind(patch.error_message)
        .bind(patch.started_at)
        .bind(patch.completed_at)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(Error::not_found(format!("Job {job_id} not found")));
        }
        Ok(())
    }

    #[instrument(name = "db.update_document", skip_all, fields(document_id = %document_id))]
    async fn update_document(&self, document_id: Uuid, patch: DocumentPatch) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE documents SET \
                status = COALESCE($2, status), \
                page_count = COALESCE($3, page_count), \
                updated_at = now() \
             WHERE id = $1",
        )
        .bind(document_id)
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.page_count)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(Error::not_found(format!("Document {document_id} not found")));
        }
        Ok(())
    }

    async fn find_running_job(&self, document_id: Uuid) -> Result<Option<ProcessingJob>> {
        let row = sqlx::query(
            "SELECT * FROM processing_jobs \
             WHERE document_id = $1 AND status = 'running' \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn find_latest_pending_job(&self, document_id: Uuid) -> Result<Option<ProcessingJob>> {
        let row = sqlx::query(
            "SELECT * FROM processing_jobs \
             WHERE document_id = $1 AND status = 'pending' \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn create_job(&self, document_id: Uuid) -> Result<ProcessingJob> {
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

        sqlx::query(
            "INSERT INTO processing_jobs \
             (id, document_id, status, progress, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(job.id)
        .bind(job.document_id)
        .bind(job.status.as_str())
        .bind(job.progress)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(job)
    }

    #[instrument(name = "db.delete_document", skip_all, fields(document_id = %document_id))]
    async fn delete_document(&self, document_id: Uuid, owner_id: &str) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM documents WHERE id = $1 AND owner_id = $2")
            .bind(document_id)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;

        Ok(deleted.rows_affected() > 0)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
