//! Worker pipeline: RPC surface plus the background execution engine

pub mod engine;
pub mod rpc_server;

pub use engine::Engine;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use uuid::Uuid;

use crate::config::ProcessingConfig;
use crate::error::Error;
use crate::events::EventBus;
use crate::rpc::{
    ProcessingAccepted, ProcessingRpc, ProgressUpdate, RpcError, StartProcessingRequest,
};
use crate::storage::Store;
use crate::types::{progress_channel, DocumentPatch, DocumentStatus, ProgressEvent};

/// Server side of the processing RPC surface.
///
/// Accepts jobs, hands them to the engine without waiting, and serves
/// progress observation. Also implements [`ProcessingRpc`] directly so
/// tests and single-process deployments can skip the HTTP hop.
pub struct WorkerService {
    store: Arc<dyn Store>,
    bus: Arc<dyn EventBus>,
    engine: Engine,
}

impl WorkerService {
    pub fn new(
        store: Arc<dyn Store>,
        bus: Arc<dyn EventBus>,
        processing: ProcessingConfig,
    ) -> Arc<Self> {
        let engine = Engine::new(store.clone(), bus.clone(), processing);
        Arc::new(Self { store, bus, engine })
    }

    /// Accept a processing request. Returns quickly: the page loop runs
    /// on a detached engine task.
    pub async fn accept(
        &self,
        request: StartProcessingRequest,
    ) -> Result<ProcessingAccepted, RpcError> {
        let document_id = request.document_id.trim();
        let owner_id = request.owner_id.trim();
        if document_id.is_empty() || owner_id.is_empty() {
            return Err(RpcError::invalid_argument(
                "documentId and ownerId must be non-empty",
            ));
        }
        let document_id = Uuid::parse_str(document_id)
            .map_err(|_| RpcError::invalid_argument("documentId must be a UUID"))?;

        let document = self
            .store
            .find_document(document_id, Some(owner_id))
            .await
            .map_err(internal)?;
        if document.is_none() {
            return Err(RpcError::not_found(format!(
                "Document {document_id} not found"
            )));
        }

        // Idempotence under retry: an in-flight run wins.
        if let Some(running) = self
            .store
            .find_running_job(document_id)
            .await
            .map_err(internal)?
        {
            tracing::debug!(job_id = %running.id, "document already has a running job");
            return Ok(ProcessingAccepted {
                job_id: running.id,
                status: running.status,
                accepted_at: Utc::now().into(),
            });
        }

        // Adopt the Pending job created at upload time; only mint a new
        // one when the document has no open job (direct re-processing).
        let job = match self
            .store
            .find_latest_pending_job(document_id)
            .await
            .map_err(internal)?
        {
            Some(job) => job,
            None => self.store.create_job(document_id).await.map_err(internal)?,
        };

        self.store
            .update_document(document_id, DocumentPatch::status(DocumentStatus::Processing))
            .await
            .map_err(internal)?;

        self.engine.spawn(&job);

        Ok(ProcessingAccepted {
            job_id: job.id,
            status: job.status,
            accepted_at: Utc::now().into(),
        })
    }

    /// Store connectivity probe for the health endpoint.
    pub async fn ping_store(&self) -> crate::error::Result<()> {
        self.store.ping().await
    }

    /// Server-stream of progress updates for one job.
    ///
    /// Unknown jobs fail with `not_found` before the first item. A
    /// terminal job yields exactly one synthetic update built from the
    /// stored row. Otherwise channel events are forwarded until the
    /// terminal one; dropping the stream unsubscribes immediately.
    pub async fn observe_progress(
        &self,
        job_id: Uuid,
    ) -> Result<BoxStream<'static, ProgressUpdate>, RpcError> {
        let job = self
            .store
            .find_job(job_id)
            .await
            .map_err(internal)?
            .ok_or_else(|| RpcError::not_found(format!("Job {job_id} not found")))?;

        if job.status.is_terminal() {
            let update = ProgressUpdate {
                job_id: job.id,
                status: job.status,
                progress: job.progress,
                error_message: job.error_message,
                updated_at: job.updated_at.into(),
            };
            return Ok(futures_util::stream::iter([update]).boxed());
        }

        let subscription = self
            .bus
            .subscribe(&progress_channel(job_id))
            .await
            .map_err(|e| RpcError::internal(e.to_string()))?;

        let state = ForwardState {
            subscription,
            done: false,
        };
        Ok(futures_util::stream::unfold(state, |mut state| async move {
            state.next().await.map(|update| (update, state))
        })
        .boxed())
    }
}

struct ForwardState {
    subscription: crate::events::Subscription,
    done: bool,
}

impl ForwardState {
    async fn next(&mut self) -> Option<ProgressUpdate> {
        if self.done {
            return None;
        }
        loop {
            match self.subscription.recv().await {
                Some(Ok(payload)) => match serde_json::from_slice::<ProgressEvent>(&payload) {
                    Ok(event) => {
                        if event.status.is_terminal() {
                            self.done = true;
                        }
                        return Some(ProgressUpdate {
                            job_id: event.job_id,
                            status: event.status,
                            progress: event.progress,
                            error_message: event.error_message,
                            updated_at: event.published_at.into(),
                        });
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "skipping malformed progress payload");
                    }
                },
                Some(Err(err)) => {
                    tracing::warn!(error = %err, "progress subscription terminated");
                    return None;
                }
                None => return None,
            }
        }
    }
}

fn internal(err: Error) -> RpcError {
    RpcError::internal(err.to_string())
}

#[async_trait]
impl ProcessingRpc for WorkerService {
    async fn start_processing(
        &self,
        request: StartProcessingRequest,
    ) -> Result<ProcessingAccepted, RpcError> {
        self.accept(request).await
    }
}
