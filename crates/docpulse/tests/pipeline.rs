//! End-to-end pipeline tests over the in-memory store and bus
//!
//! The front service router runs with the worker service wired in
//! directly as the RPC implementation, so upload, dispatch, execution
//! and stream delivery all exercise the same code paths as production
//! minus the network hops.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use futures_util::StreamExt;
use tower::util::ServiceExt;
use uuid::Uuid;

use docpulse::config::{Config, ProcessingConfig};
use docpulse::events::LocalEventBus;
use docpulse::rpc::{
    ProcessingAccepted, ProcessingRpc, RpcError, StartProcessingRequest,
};
use docpulse::server::{build_router, state::AppState};
use docpulse::storage::{MemStore, MemoryObjectStore, Store};
use docpulse::types::JobStatus;
use docpulse::worker::WorkerService;

const BOUNDARY: &str = "docpulse-test-boundary";

struct TestApp {
    router: Router,
    store: Arc<MemStore>,
    objects: Arc<MemoryObjectStore>,
}

fn test_app(page_delay_ms: u64) -> TestApp {
    let store = Arc::new(MemStore::new());
    let bus = Arc::new(LocalEventBus::default());
    let objects = Arc::new(MemoryObjectStore::new());

    let worker = WorkerService::new(
        store.clone(),
        bus.clone(),
        ProcessingConfig {
            page_delay_ms,
            simulated_pages: 12,
        },
    );

    let state = AppState::new(
        Config::default(),
        store.clone(),
        bus,
        objects.clone(),
        worker,
    );

    TestApp {
        router: build_router(state),
        store,
        objects,
    }
}

/// Worker that is never reachable, as if the process were down.
struct DeadWorker;

#[async_trait]
impl ProcessingRpc for DeadWorker {
    async fn start_processing(
        &self,
        _request: StartProcessingRequest,
    ) -> Result<ProcessingAccepted, RpcError> {
        Err(RpcError::unavailable("connection refused"))
    }
}

fn test_app_with_dead_worker() -> TestApp {
    let store = Arc::new(MemStore::new());
    let bus = Arc::new(LocalEventBus::default());
    let objects = Arc::new(MemoryObjectStore::new());

    let state = AppState::new(
        Config::default(),
        store.clone(),
        bus,
        objects.clone(),
        Arc::new(DeadWorker),
    );

    TestApp {
        router: build_router(state),
        store,
        objects,
    }
}

fn multipart_body(parts: &[(&str, Option<&str>, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, content_type, data) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n").as_bytes(),
            ),
        }
        if let Some(content_type) = content_type {
            body.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(owner: &str, parts: &[(&str, Option<&str>, Option<&str>, &[u8])]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/documents/upload")
        .header(header::AUTHORIZATION, format!("Bearer {owner}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Split an SSE body into frames (chunks separated by a blank line).
fn frames(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter(|f| !f.is_empty())
        .map(|f| f.to_string())
        .collect()
}

fn frame_data(frame: &str) -> serde_json::Value {
    let data_line = frame
        .lines()
        .find(|line| line.starts_with("data: "))
        .expect("frame should carry a data line");
    serde_json::from_str(&data_line["data: ".len()..]).unwrap()
}

fn frame_id(frame: &str) -> u64 {
    let id_line = frame
        .lines()
        .find(|line| line.starts_with("id: "))
        .expect("frame should carry an id line");
    id_line["id: ".len()..].parse().unwrap()
}

#[tokio::test]
async fn upload_then_stream_to_completion() {
    let app = test_app(20);
    let pdf = vec![0u8; 1_048_576];

    let response = app
        .router
        .clone()
        .oneshot(upload_request(
            "u1",
            &[
                ("title", None, None, b"Roadmap"),
                ("file", Some("roadmap.pdf"), Some("application/pdf"), &pdf),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;

    assert_eq!(body["status"], "pending");
    assert_eq!(body["title"], "Roadmap");
    assert_eq!(body["size"], 1_048_576);
    assert_eq!(body["mimeType"], "application/pdf");
    assert!(body["createdAt"].is_string());

    let storage_key = body["storageKey"].as_str().unwrap();
    assert!(storage_key.ends_with("-roadmap.pdf"));
    let (year, rest) = storage_key.split_once('/').unwrap();
    assert_eq!(year.len(), 4);
    assert!(year.chars().all(|c| c.is_ascii_digit()));
    assert!(rest.len() > "-roadmap.pdf".len());

    // Exactly one document and one job, joined by documentId.
    let document_id: Uuid = body["documentId"].as_str().unwrap().parse().unwrap();
    let job_id: Uuid = body["jobId"].as_str().unwrap().parse().unwrap();
    let job = app.store.find_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.document_id, document_id);

    // The uploaded bytes made it to object storage.
    assert_eq!(app.objects.len(), 1);

    // Stream the job to the end.
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/documents/{job_id}/progress"))
                .header(header::AUTHORIZATION, "Bearer u1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-cache"
    );

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let frames = frames(&text);

    assert_eq!(frames[0], "retry: 3000");

    let event_frames: Vec<&String> = frames[1..]
        .iter()
        .filter(|f| !f.starts_with(": heartbeat"))
        .collect();

    // Counter strictly increasing from 1 within the connection.
    let ids: Vec<u64> = event_frames.iter().map(|f| frame_id(f)).collect();
    assert_eq!(ids, (1..=ids.len() as u64).collect::<Vec<_>>());

    // Progress never decreases and every value is from the 12-page grid.
    let expected = [0, 8, 16, 24, 32, 40, 48, 55, 63, 71, 79, 87, 95, 100];
    let percents: Vec<i64> = event_frames
        .iter()
        .map(|f| frame_data(f)["percent"].as_i64().unwrap())
        .collect();
    for pair in percents.windows(2) {
        assert!(pair[0] <= pair[1], "progress went backwards: {percents:?}");
    }
    for percent in &percents {
        assert!(expected.contains(percent), "unexpected percent {percent}");
    }

    let last = frame_data(event_frames.last().unwrap());
    assert_eq!(last["stage"], "COMPLETED");
    assert_eq!(last["percent"], 100);

    // Durable state agrees with the final frame.
    let job = app.store.find_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
}

#[tokio::test]
async fn two_subscribers_get_independent_counters_and_the_same_outcome() {
    let app = test_app(20);
    let pdf = vec![0u8; 4096];

    let response = app
        .router
        .clone()
        .oneshot(upload_request(
            "u1",
            &[("file", Some("a.pdf"), Some("application/pdf"), &pdf)],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    let job_id = body["jobId"].as_str().unwrap().to_string();

    let open = |router: Router, job_id: String| async move {
        let response = router
            .oneshot(
                Request::builder()
                    .uri(format!("/documents/{job_id}/progress"))
                    .header(header::AUTHORIZATION, "Bearer u1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    };

    let (one, two) = tokio::join!(
        open(app.router.clone(), job_id.clone()),
        open(app.router.clone(), job_id.clone())
    );

    for text in [&one, &two] {
        let frames = frames(text);
        let event_frames: Vec<&String> = frames[1..]
            .iter()
            .filter(|f| !f.starts_with(": heartbeat"))
            .collect();
        let ids: Vec<u64> = event_frames.iter().map(|f| frame_id(f)).collect();
        assert_eq!(ids[0], 1);
        assert_eq!(ids, (1..=ids.len() as u64).collect::<Vec<_>>());
        let last = frame_data(event_frames.last().unwrap());
        assert_eq!(last["stage"], "COMPLETED");
    }
}

#[tokio::test]
async fn unsupported_media_type_names_the_allowed_list() {
    let app = test_app(1);
    let response = app
        .router
        .clone()
        .oneshot(upload_request(
            "u1",
            &[("file", Some("note.txt"), Some("text/plain"), b"x")],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let body = body_json(response).await;
    assert_eq!(body["statusCode"], 415);
    assert_eq!(body["error"], "unsupported_media_type");
    let message = body["message"].as_str().unwrap();
    assert!(message.contains("application/pdf"));
    assert!(message.contains("image/webp"));

    // Validation failures leave nothing behind.
    assert!(app.objects.is_empty());
}

#[tokio::test]
async fn empty_upload_is_a_missing_file() {
    let app = test_app(1);
    let response = app
        .router
        .clone()
        .oneshot(upload_request(
            "u1",
            &[("file", Some("empty.pdf"), Some("application/pdf"), b"")],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "missing_file");
}

#[tokio::test]
async fn upload_without_file_field_is_a_missing_file() {
    let app = test_app(1);
    let response = app
        .router
        .clone()
        .oneshot(upload_request("u1", &[("title", None, None, b"No file")]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "missing_file");
}

#[tokio::test]
async fn upload_without_credentials_is_rejected() {
    let app = test_app(1);
    let request = Request::builder()
        .method("POST")
        .uri("/documents/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(&[(
            "file",
            Some("a.pdf"),
            Some("application/pdf"),
            b"%PDF-",
        )])))
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn dead_worker_yields_202_with_a_pending_job() {
    let app = test_app_with_dead_worker();
    let pdf = vec![0u8; 2048];

    let response = app
        .router
        .clone()
        .oneshot(upload_request(
            "u1",
            &[("file", Some("roadmap.pdf"), Some("application/pdf"), &pdf)],
        ))
        .await
        .unwrap();

    // Dispatch failure is never fatal: same body, 202.
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["status"], "pending");
    let job_id: Uuid = body["jobId"].as_str().unwrap().parse().unwrap();

    let job = app.store.find_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.progress, 0);

    // The stream still opens and serves the Pending snapshot.
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/documents/{job_id}/progress"))
                .header(header::AUTHORIZATION, "Bearer u1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut data = response.into_body().into_data_stream();
    let mut collected = String::new();
    while collected.matches("\n\n").count() < 2 {
        let chunk = data.next().await.unwrap().unwrap();
        collected.push_str(std::str::from_utf8(&chunk).unwrap());
    }

    let frames = frames(&collected);
    assert_eq!(frames[0], "retry: 3000");
    let snapshot = frame_data(&frames[1]);
    assert_eq!(snapshot["stage"], "PENDING");
    assert_eq!(snapshot["percent"], 0);
    assert_eq!(snapshot["message"], "Job is queued for processing");
}

#[tokio::test(start_paused = true)]
async fn idle_stream_heartbeats_then_times_out() {
    let app = test_app_with_dead_worker();
    let pdf = vec![0u8; 64];

    let response = app
        .router
        .clone()
        .oneshot(upload_request(
            "u1",
            &[("file", Some("idle.pdf"), Some("application/pdf"), &pdf)],
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    let job_id = body["jobId"].as_str().unwrap().to_string();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/documents/{job_id}/progress"))
                .header(header::AUTHORIZATION, "Bearer u1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // Paused time auto-advances through 5 minutes of heartbeats until
    // the lifetime deadline closes the stream.
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let frames = frames(&text);

    let heartbeats = frames.iter().filter(|f| *f == ": heartbeat").count();
    assert_eq!(heartbeats, 11, "expected 25s heartbeats up to the 5min deadline");

    let last = frames.last().unwrap();
    assert!(last.contains("event: timeout"));
    let data = frame_data(last);
    assert_eq!(
        data["message"],
        "Stream timed out — please reconnect or check job status via API"
    );
}

#[tokio::test]
async fn snapshot_of_terminal_job_closes_after_one_frame() {
    let app = test_app(1);
    let pdf = vec![0u8; 256];

    let response = app
        .router
        .clone()
        .oneshot(upload_request(
            "u1",
            &[("file", Some("done.pdf"), Some("application/pdf"), &pdf)],
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    let job_id: Uuid = body["jobId"].as_str().unwrap().parse().unwrap();

    // Wait for the engine to finish, then open the stream.
    for _ in 0..200 {
        let job = app.store.find_job(job_id).await.unwrap().unwrap();
        if job.status.is_terminal() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/documents/{job_id}/progress"))
                .header(header::AUTHORIZATION, "Bearer u1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let frames = frames(&text);

    // Reconnect directive plus exactly one snapshot frame.
    assert_eq!(frames.len(), 2);
    let snapshot = frame_data(&frames[1]);
    assert_eq!(snapshot["stage"], "COMPLETED");
    assert_eq!(snapshot["percent"], 100);
}

#[tokio::test]
async fn unknown_job_is_a_plain_404_not_a_stream() {
    let app = test_app(1);
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/documents/{}/progress", Uuid::new_v4()))
                .header(header::AUTHORIZATION, "Bearer u1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("application/json"));

    let body = body_json(response).await;
    assert_eq!(body["statusCode"], 404);
    assert_eq!(body["error"], "not_found");
    assert!(body["message"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn delete_checks_ownership_and_cascades() {
    let app = test_app(5_000);
    let pdf = vec![0u8; 128];

    let response = app
        .router
        .clone()
        .oneshot(upload_request(
            "u1",
            &[("file", Some("mine.pdf"), Some("application/pdf"), &pdf)],
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    let document_id: Uuid = body["documentId"].as_str().unwrap().parse().unwrap();
    let job_id: Uuid = body["jobId"].as_str().unwrap().parse().unwrap();

    let delete = |owner: &str| {
        Request::builder()
            .method("DELETE")
            .uri(format!("/documents/{document_id}"))
            .header(header::AUTHORIZATION, format!("Bearer {owner}"))
            .body(Body::empty())
            .unwrap()
    };

    let response = app.router.clone().oneshot(delete("intruder")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.router.clone().oneshot(delete("u1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert!(app.store.find_job(job_id).await.unwrap().is_none());
    assert!(app
        .store
        .find_document(document_id, None)
        .await
        .unwrap()
        .is_none());
    assert!(app.objects.is_empty());
}

#[tokio::test]
async fn storage_outage_is_a_502_with_no_rows() {
    let app = test_app(1);
    app.objects.fail_puts(true);

    let pdf = vec![0u8; 512];
    let response = app
        .router
        .clone()
        .oneshot(upload_request(
            "u1",
            &[("file", Some("lost.pdf"), Some("application/pdf"), &pdf)],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(response).await;
    assert_eq!(body["error"], "bad_gateway");
    assert!(app.objects.is_empty());
}

#[tokio::test]
async fn oversized_upload_is_rejected_with_the_limit() {
    // Shrink the cap so the test body stays small.
    let store = Arc::new(MemStore::new());
    let bus = Arc::new(LocalEventBus::default());
    let objects = Arc::new(MemoryObjectStore::new());
    let worker = WorkerService::new(
        store.clone(),
        bus.clone(),
        ProcessingConfig {
            page_delay_ms: 1,
            simulated_pages: 12,
        },
    );
    let mut config = Config::default();
    config.server.max_upload_bytes = 1024;
    let state = AppState::new(config, store, bus, objects, worker);
    let router = build_router(state);

    let oversized = vec![0u8; 1025];
    let response = router
        .oneshot(upload_request(
            "u1",
            &[("file", Some("big.pdf"), Some("application/pdf"), &oversized)],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = body_json(response).await;
    assert_eq!(body["error"], "payload_too_large");
    assert!(body["message"].as_str().unwrap().contains("1024"));
}

#[tokio::test]
async fn retrying_dispatch_reuses_the_same_job() {
    let app = test_app(5_000);
    let pdf = vec![0u8; 64];

    let response = app
        .router
        .clone()
        .oneshot(upload_request(
            "u1",
            &[("file", Some("retry.pdf"), Some("application/pdf"), &pdf)],
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    let document_id: Uuid = body["documentId"].as_str().unwrap().parse().unwrap();
    let job_id: Uuid = body["jobId"].as_str().unwrap().parse().unwrap();

    // Wait until the engine marks the job Running, then retry the RPC
    // directly: the running job's id comes back and no row is added.
    for _ in 0..200 {
        if app
            .store
            .find_running_job(document_id)
            .await
            .unwrap()
            .is_some()
        {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let bus = Arc::new(LocalEventBus::default());
    let worker = WorkerService::new(
        app.store.clone(),
        bus,
        ProcessingConfig {
            page_delay_ms: 5_000,
            simulated_pages: 12,
        },
    );
    let retried = worker
        .accept(StartProcessingRequest {
            document_id: document_id.to_string(),
            owner_id: "u1".to_string(),
            storage_key: "unused".to_string(),
            mime_type: "application/pdf".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(retried.job_id, job_id);
    assert!(app
        .store
        .find_latest_pending_job(document_id)
        .await
        .unwrap()
        .is_none());
}
