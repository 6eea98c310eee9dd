//! HTTP client for the worker RPC surface

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use super::{
    ProcessingAccepted, ProcessingRpc, ProgressUpdate, RpcError, RpcStatus,
    StartProcessingRequest,
};

/// Error envelope the worker returns on RPC failures.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    message: String,
    error: String,
}

pub struct HttpProcessingRpc {
    http: reqwest::Client,
    base_url: String,
    deadline: Duration,
}

impl HttpProcessingRpc {
    /// `deadline` bounds the unary calls; the ingest side relies on
    /// this as its hard dispatch timeout. The progress stream is not
    /// bounded, it lives until the terminal update.
    pub fn new(base_url: impl Into<String>, deadline: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            deadline,
        }
    }

    async fn decode_error(response: reqwest::Response) -> RpcError {
        let http_status = response.status();
        match response.json::<ErrorEnvelope>().await {
            Ok(envelope) => {
                let status = RpcStatus::parse(&envelope.error).unwrap_or(RpcStatus::Internal);
                RpcError::new(status, envelope.message)
            }
            Err(_) => RpcError::internal(format!("worker returned HTTP {http_status}")),
        }
    }

    /// Open the server-stream of progress updates for one job.
    ///
    /// Updates arrive as one JSON object per line; undecodable lines are
    /// logged and skipped. Dropping the stream cancels the request and
    /// with it the worker-side channel subscription.
    pub async fn observe_progress(
        &self,
        job_id: Uuid,
    ) -> Result<impl Stream<Item = Result<ProgressUpdate, RpcError>>, RpcError> {
        let url = format!("{}/rpc/jobs/{job_id}/progress", self.base_url);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| RpcError::unavailable(format!("worker unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(Self::decode_error(response).await);
        }

        let state = DecodeState {
            bytes: Box::pin(response.bytes_stream()),
            buffer: Vec::new(),
            pending: VecDeque::new(),
            done: false,
        };

        Ok(futures_util::stream::unfold(state, |mut state| async move {
            state.next_update().await.map(|item| (item, state))
        }))
    }
}

/// Line-buffered NDJSON decoder over the response body.
struct DecodeState {
    bytes: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: Vec<u8>,
    pending: VecDeque<Result<ProgressUpdate, RpcError>>,
    done: bool,
}

impl DecodeState {
    async fn next_update(&mut self) -> Option<Result<ProgressUpdate, RpcError>> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }
            if self.done {
                return None;
            }

            match self.bytes.next().await {
                Some(Ok(chunk)) => {
                    self.buffer.extend_from_slice(&chunk);
                    self.drain_lines();
                }
                Some(Err(err)) => {
                    self.done = true;
                    self.pending
                        .push_back(Err(RpcError::unavailable(format!("stream error: {err}"))));
                }
                None => {
                    self.done = true;
                }
            }
        }
    }

    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = &line[..line.len() - 1];
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<ProgressUpdate>(line) {
                Ok(update) => self.pending.push_back(Ok(update)),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping undecodable progress line");
                }
            }
        }
    }
}

#[async_trait]
impl ProcessingRpc for HttpProcessingRpc {
    async fn start_processing(
        &self,
        request: StartProcessingRequest,
    ) -> Result<ProcessingAccepted, RpcError> {
        let url = format!("{}/rpc/start-processing", self.base_url);
        let response = self
            .http
            .post(url)
            .timeout(self.deadline)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RpcError::unavailable("worker dispatch deadline exceeded".to_string())
                } else {
                    RpcError::unavailable(format!("worker unreachable: {e}"))
                }
            })?;

        if !response.status().is_success() {
            return Err(Self::decode_error(response).await);
        }

        response
            .json::<ProcessingAccepted>()
            .await
            .map_err(|e| RpcError::internal(format!("malformed worker response: {e}")))
    }
}
