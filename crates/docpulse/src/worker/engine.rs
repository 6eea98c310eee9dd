//! Background execution engine
//!
//! One detached task per accepted job. Tasks are independent; they share
//! nothing but the store and the event channel. The durable write always
//! precedes the event publish so a late subscriber can re-read the store
//! and reconcile.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::sleep;
use uuid::Uuid;

use crate::config::ProcessingConfig;
use crate::error::Result;
use crate::events::{publish_event, EventBus};
use crate::storage::Store;
use crate::types::{
    progress_channel, DocumentPatch, DocumentStatus, JobPatch, ProcessingJob, ProgressEvent,
};

/// Reported progress for one finished page. The value 100 is reserved
/// for the completion step, which keeps Running events strictly below it.
pub fn page_progress(page: u32, total_pages: u32) -> i16 {
    (f64::from(page) * 95.0 / f64::from(total_pages)).round() as i16
}

#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn Store>,
    bus: Arc<dyn EventBus>,
    config: ProcessingConfig,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, bus: Arc<dyn EventBus>, config: ProcessingConfig) -> Self {
        Self { store, bus, config }
    }

    /// Start one execution task for an accepted job and return without
    /// waiting. A crash inside the task is captured and recorded; it
    /// never stalls or takes down the process.
    pub fn spawn(&self, job: &ProcessingJob) {
        let engine = self.clone();
        let job_id = job.id;
        let document_id = job.document_id;

        tokio::spawn(async move {
            let run = {
                let engine = engine.clone();
                tokio::spawn(async move { engine.run(job_id, document_id).await })
            };

            match run.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => engine.fail(job_id, document_id, &err.to_string()).await,
                Err(join_err) => {
                    engine
                        .fail(job_id, document_id, &format!("execution task crashed: {join_err}"))
                        .await
                }
            }
        });
    }

    async fn run(&self, job_id: Uuid, document_id: Uuid) -> Result<()> {
        let total_pages = self.config.simulated_pages;
        let channel = progress_channel(job_id);

        tracing::info!(job_id = %job_id, document_id = %document_id, total_pages, "processing started");

        self.store
            .transition_job(job_id, JobPatch::running(Utc::now()))
            .await?;
        publish_event(
            self.bus.as_ref(),
            &channel,
            &ProgressEvent::running(
                job_id,
                document_id,
                0,
                format!("Processing started — {total_pages} pages queued"),
                0,
                total_pages,
            ),
        )
        .await;

        for page in 1..=total_pages {
            sleep(self.config.page_delay()).await;

            let progress = page_progress(page, total_pages);
            self.store
                .transition_job(job_id, JobPatch::progress(progress))
                .await?;
            publish_event(
                self.bus.as_ref(),
                &channel,
                &ProgressEvent::running(
                    job_id,
                    document_id,
                    progress,
                    format!("Processing page {page} of {total_pages}"),
                    page,
                    total_pages,
                ),
            )
            .await;
        }

        self.store
            .transition_job(
                job_id,
                JobPatch::completed(serde_json::json!({ "pageCount": total_pages }), Utc::now()),
            )
            .await?;
        self.store
            .update_document(document_id, DocumentPatch::completed(total_pages as i32))
            .await?;
        publish_event(
            self.bus.as_ref(),
            &channel,
            &ProgressEvent::completed(job_id, document_id, total_pages),
        )
        .await;

        tracing::info!(job_id = %job_id, "processing complete");
        Ok(())
    }

    /// Failure path: persist first, publish last. A publish failure here
    /// is tolerated silently; the store already carries the truth.
    async fn fail(&self, job_id: Uuid, document_id: Uuid, error: &str) {
        tracing::error!(job_id = %job_id, error, "processing job failed");

        if let Err(persist_err) = self
            .store
            .transition_job(job_id, JobPatch::failed(error.to_string(), Utc::now()))
            .await
        {
            tracing::error!(job_id = %job_id, error = %persist_err, "failed to persist job failure");
        }
        if let Err(doc_err) = self
            .store
            .update_document(document_id, DocumentPatch::status(DocumentStatus::Failed))
            .await
        {
            tracing::error!(document_id = %document_id, error = %doc_err, "failed to mark document failed");
        }

        let event = ProgressEvent::failed(job_id, document_id, error);
        if let Ok(payload) = serde_json::to_vec(&event) {
            let _ = self
                .bus
                .publish(&progress_channel(job_id), &payload)
                .await;
        }
    }
}
