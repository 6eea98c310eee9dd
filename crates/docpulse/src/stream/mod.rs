//! Progress stream bridge
//!
//! Delivers live job progress to one HTTP client per connection as a
//! Server-Sent Events stream. Each connection walks a small state
//! machine: validate the job, emit a durable snapshot, subscribe to the
//! job's event channel, multiplex heartbeats and the lifetime deadline,
//! and tear everything down on the first terminal condition. The whole
//! connection is one stream value, so a client disconnect drops the
//! channel subscription and both timers synchronously.

use std::collections::VecDeque;
use std::pin::Pin;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::json;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior, Sleep};
use uuid::Uuid;

use crate::error::Error;
use crate::events::{BusError, Subscription};
use crate::server::state::AppState;
use crate::types::{progress_channel, ProcessingJob, ProgressEvent, StreamPayload};

/// GET /documents/:id/progress
///
/// Unknown jobs get a plain 404 JSON body; the response never switches
/// to the event-stream media type in that case. Ownership is not
/// checked here: any authenticated caller holding the job id may
/// subscribe.
pub async fn stream_progress(
    State(state): State<AppState>,
    _user: crate::auth::AuthenticatedUser,
    Path(job_id): Path<Uuid>,
) -> Response {
    let job = match state.store().find_job(job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            return Error::not_found(format!("Job {job_id} not found")).into_response();
        }
        Err(err) => return err.into_response(),
    };

    let connection = SseConnection::open(&state, job).await;

    let stream = futures_util::stream::unfold(connection, |mut connection| async move {
        connection
            .next_frame()
            .await
            .map(|frame| (Ok::<_, std::convert::Infallible>(frame), connection))
    });

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            // Tells buffering intermediaries (nginx) to pass frames through.
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

/// Why a connection stopped producing event frames.
enum CloseReason {
    Timeout,
    Upstream(String),
}

/// Outcome of one multiplexing turn.
enum Step {
    Deadline,
    Heartbeat,
    Received(Option<std::result::Result<Vec<u8>, BusError>>),
}

enum Phase {
    /// Live: multiplexing channel events, heartbeats and the deadline.
    Streaming {
        subscription: Subscription,
        heartbeat: Interval,
        deadline: Pin<Box<Sleep>>,
    },
    /// Closing: flush queued frames, then end the body.
    Draining,
}

/// Per-connection state. Dropping it is the teardown: subscription,
/// heartbeat and deadline all die with it, from any exit path.
struct SseConnection {
    job_id: Uuid,
    counter: u64,
    queued: VecDeque<String>,
    phase: Phase,
}

impl SseConnection {
    /// Build a connection for a validated job: reconnect directive and
    /// snapshot frame first, then either drain (terminal job) or go
    /// live on the job's channel.
    async fn open(state: &AppState, job: ProcessingJob) -> Self {
        let stream_config = &state.config().stream;

        let mut connection = Self {
            job_id: job.id,
            counter: 0,
            queued: VecDeque::new(),
            phase: Phase::Draining,
        };

        connection
            .queued
            .push_back(format!("retry: {}\n\n", stream_config.retry_ms));

        let snapshot = StreamPayload::snapshot(&job);
        let snapshot_frame = connection.event_frame("progress", &snapshot);
        connection.queued.push_back(snapshot_frame);

        // Terminal on open: one snapshot frame, then close. No
        // subscription is made.
        if job.status.is_terminal() {
            return connection;
        }

        match state.bus().subscribe(&progress_channel(job.id)).await {
            Ok(subscription) => {
                let period = stream_config.heartbeat();
                let mut heartbeat = interval_at(Instant::now() + period, period);
                heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

                connection.phase = Phase::Streaming {
                    subscription,
                    heartbeat,
                    deadline: Box::pin(sleep(stream_config.max_lifetime())),
                };
            }
            Err(err) => {
                tracing::warn!(job_id = %job.id, error = %err, "progress subscription failed");
                connection.close(CloseReason::Upstream(err.to_string()));
            }
        }

        connection
    }

    /// Produce the next chunk of response bytes, or `None` to end the
    /// body. Heartbeats bypass the counter; every other frame carries a
    /// strictly increasing `id:` starting at 1.
    async fn next_frame(&mut self) -> Option<String> {
        loop {
            if let Some(frame) = self.queued.pop_front() {
                return Some(frame);
            }

            let step = {
                let Phase::Streaming {
                    subscription,
                    heartbeat,
                    deadline,
                } = &mut self.phase
                else {
                    return None;
                };

                tokio::select! {
                    // The deadline wins ties against a heartbeat due at
                    // the same instant.
                    biased;

                    () = deadline.as_mut() => Step::Deadline,
                    _ = heartbeat.tick() => Step::Heartbeat,
                    received = subscription.recv() => Step::Received(received),
                }
            };

            match step {
                Step::Deadline => self.close(CloseReason::Timeout),
                Step::Heartbeat => return Some(": heartbeat\n\n".to_string()),
                Step::Received(Some(Ok(payload))) => {
                    match serde_json::from_slice::<ProgressEvent>(&payload) {
                        Ok(event) => {
                            let payload = StreamPayload::from_event(&event);
                            let frame = self.event_frame("progress", &payload);
                            self.queued.push_back(frame);
                            if event.status.is_terminal() {
                                self.phase = Phase::Draining;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(
                                job_id = %self.job_id,
                                error = %err,
                                "skipping malformed progress payload"
                            );
                        }
                    }
                }
                Step::Received(Some(Err(BusError::Overflowed))) => {
                    self.close(CloseReason::Upstream(
                        "subscriber buffer overflowed".to_string(),
                    ));
                }
                Step::Received(None) => {
                    self.close(CloseReason::Upstream("event channel closed".to_string()));
                }
            }
        }
    }

    /// Queue the closing frame for `reason` and stop multiplexing.
    /// Safe to reach from any path; once draining, later calls cannot
    /// happen because the select arms are gone.
    fn close(&mut self, reason: CloseReason) {
        match reason {
            CloseReason::Timeout => {
                let frame = self.event_frame(
                    "timeout",
                    &json!({
                        "jobId": self.job_id,
                        "message":
                            "Stream timed out — please reconnect or check job status via API",
                    }),
                );
                self.queued.push_back(frame);
            }
            CloseReason::Upstream(detail) => {
                let frame = self.event_frame(
                    "error",
                    &json!({
                        "jobId": self.job_id,
                        "stage": "FAILED",
                        "percent": 0,
                        "message": "Stream error — please retry",
                        "errorMessage": detail,
                        "timestamp": Utc::now(),
                    }),
                );
                self.queued.push_back(frame);
            }
        }
        self.phase = Phase::Draining;
    }

    /// Render one counted frame: `id:`, `event:`, `data:`, blank line.
    fn event_frame<T: serde::Serialize>(&mut self, event: &str, data: &T) -> String {
        self.counter += 1;
        let data = serde_json::to_string(data).unwrap_or_else(|_| "{}".to_string());
        format!("id: {}\nevent: {}\ndata: {}\n\n", self.counter, event, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobStatus, ProcessingJob};

    fn job(status: JobStatus, progress: i16) -> ProcessingJob {
        let now = Utc::now();
        ProcessingJob {
            id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            status,
            progress,
            result: None,
            error_message: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn bare_connection(job: &ProcessingJob) -> SseConnection {
        SseConnection {
            job_id: job.id,
            counter: 0,
            queued: VecDeque::new(),
            phase: Phase::Draining,
        }
    }

    #[test]
    fn frames_match_the_wire_format() {
        let job = job(JobStatus::Running, 40);
        let mut connection = bare_connection(&job);

        let frame = connection.event_frame("progress", &StreamPayload::snapshot(&job));
        assert!(frame.starts_with("id: 1\nevent: progress\ndata: {"));
        assert!(frame.ends_with("}\n\n"));

        let frame = connection.event_frame("timeout", &json!({"jobId": job.id}));
        assert!(frame.starts_with("id: 2\nevent: timeout\n"));
    }

    #[tokio::test]
    async fn draining_connection_flushes_queue_then_ends() {
        let job = job(JobStatus::Completed, 100);
        let mut connection = bare_connection(&job);
        connection.queued.push_back("retry: 3000\n\n".to_string());
        let frame = connection.event_frame("progress", &StreamPayload::snapshot(&job));
        connection.queued.push_back(frame);

        assert_eq!(connection.next_frame().await.unwrap(), "retry: 3000\n\n");
        let snapshot = connection.next_frame().await.unwrap();
        assert!(snapshot.contains("\"stage\":\"COMPLETED\""));
        assert!(connection.next_frame().await.is_none());
    }

    #[test]
    fn timeout_close_queues_the_spec_frame() {
        let job = job(JobStatus::Running, 10);
        let mut connection = bare_connection(&job);
        connection.close(CloseReason::Timeout);

        let frame = connection.queued.pop_front().unwrap();
        assert!(frame.contains("event: timeout"));
        assert!(frame.contains("Stream timed out — please reconnect or check job status via API"));
    }

    #[test]
    fn upstream_close_queues_an_error_frame() {
        let job = job(JobStatus::Running, 10);
        let mut connection = bare_connection(&job);
        connection.close(CloseReason::Upstream("subscriber buffer overflowed".into()));

        let frame = connection.queued.pop_front().unwrap();
        assert!(frame.contains("event: error"));
        assert!(frame.contains("\"stage\":\"FAILED\""));
        assert!(frame.contains("Stream error — please retry"));
        assert!(frame.contains("subscriber buffer overflowed"));
    }
}
