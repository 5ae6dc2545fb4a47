//! Integration tests for deduplicated upload against a mock server.

mod common;

use std::io::Write;

use assert_matches::assert_matches;
use cleanflow_client::api::ApiError;
use cleanflow_client::upload::{fingerprint_source, UploadError, UploadEvent, UploadSource, UploadTransport};
use cleanflow_core::fingerprint::fingerprint_bytes;
use cleanflow_core::rules::default_rules;
use common::{api, envelope, error_envelope};
use serde_json::json;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Write `len` pseudo-random-ish bytes to a temp file named `customers.csv`.
fn source_file(dir: &tempfile::TempDir, len: usize) -> std::path::PathBuf {
    let path = dir.path().join("customers.csv");
    let content: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    std::fs::File::create(&path).unwrap().write_all(&content).unwrap();
    path
}

fn drain(rx: &mut mpsc::UnboundedReceiver<UploadEvent>) -> Vec<UploadEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn progress(events: &[UploadEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            UploadEvent::Progress { percent } => Some(*percent),
            _ => None,
        })
        .collect()
}

async fn upload_bodies(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == "/upload")
        .map(|r| String::from_utf8_lossy(&r.body).into_owned())
        .collect()
}

// ---------------------------------------------------------------------------
// Test: instant upload
// ---------------------------------------------------------------------------

/// Known content creates a batch without sending the file part and without
/// any byte progress.
#[tokio::test]
async fn known_content_uploads_without_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload/check"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "exists": true, "batch_id": 3, "status": "Completed"
        }))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({ "batch_id": 42 }))))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = source_file(&dir, 10 * 1024 * 1024);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let batch_id = UploadTransport::new(api(&server))
        .upload_path(&file, &default_rules(), Some(&tx))
        .await
        .unwrap();
    assert_eq!(batch_id, 42);

    let events = drain(&mut rx);
    assert_eq!(
        events,
        vec![
            UploadEvent::Checked { exists: true },
            UploadEvent::Created { batch_id: 42, instant: true },
        ]
    );

    let bodies = upload_bodies(&server).await;
    assert_eq!(bodies.len(), 1);
    assert!(!bodies[0].contains("name=\"file\""));
    assert!(bodies[0].contains("name=\"hash\""));
    assert!(bodies[0].contains("customers.csv"));
}

/// The fingerprint sent to the server matches the one computed in memory.
#[tokio::test]
async fn check_request_carries_the_content_fingerprint() {
    let dir = tempfile::tempdir().unwrap();
    let file = source_file(&dir, 4096);
    let expected = fingerprint_bytes(&std::fs::read(&file).unwrap());

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload/check"))
        .and(wiremock::matchers::body_json(json!({ "hash": expected.as_str() })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "exists": true })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "batch_id": 5 })))
        .mount(&server)
        .await;

    let source = UploadSource::from_path(&file).await.unwrap();
    let fingerprint = fingerprint_source(&source).await.unwrap();
    assert_eq!(fingerprint, expected);

    let batch_id = UploadTransport::new(api(&server))
        .upload(&source, &fingerprint, &[], None)
        .await
        .unwrap();
    assert_eq!(batch_id, 5);
}

// ---------------------------------------------------------------------------
// Test: full upload
// ---------------------------------------------------------------------------

/// Unknown content streams the file; progress never decreases and ends at
/// 100. A string batch id is accepted.
#[tokio::test]
async fn unknown_content_streams_file_with_progress() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload/check"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({ "exists": false }))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({ "batch_id": "17" }))))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = source_file(&dir, 512 * 1024);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let batch_id = UploadTransport::new(api(&server))
        .upload_path(&file, &default_rules(), Some(&tx))
        .await
        .unwrap();
    assert_eq!(batch_id, 17);

    let events = drain(&mut rx);
    assert_eq!(events.first(), Some(&UploadEvent::Checked { exists: false }));
    assert_eq!(
        events.last(),
        Some(&UploadEvent::Created { batch_id: 17, instant: false })
    );

    let percents = progress(&events);
    assert_eq!(percents.first(), Some(&0));
    assert_eq!(percents.last(), Some(&100));
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));

    let bodies = upload_bodies(&server).await;
    assert!(bodies[0].contains("name=\"file\""));
    assert!(bodies[0].contains("name=\"rules\""));
}

/// A failed existence check falls back to sending the full payload.
#[tokio::test]
async fn check_failure_falls_back_to_full_upload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload/check"))
        .respond_with(ResponseTemplate::new(500).set_body_json(error_envelope(500, "db down")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "batch_id": 9 })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = source_file(&dir, 1024);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let batch_id = UploadTransport::new(api(&server))
        .upload_path(&file, &[], Some(&tx))
        .await
        .unwrap();
    assert_eq!(batch_id, 9);

    let events = drain(&mut rx);
    assert_eq!(events.first(), Some(&UploadEvent::Checked { exists: false }));
    assert!(upload_bodies(&server).await[0].contains("name=\"file\""));
}

/// A transmission failure surfaces the server error and creates nothing.
#[tokio::test]
async fn upload_failure_reports_error_without_created_event() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload/check"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "exists": false })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "error": "disk full" })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = source_file(&dir, 1024);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let err = UploadTransport::new(api(&server))
        .upload_path(&file, &[], Some(&tx))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        UploadError::Api(ApiError::Api { status: 500, ref message }) if message == "disk full"
    );

    let events = drain(&mut rx);
    assert!(!events.iter().any(|e| matches!(e, UploadEvent::Created { .. })));
}

/// A missing file fails before any request is made.
#[tokio::test]
async fn missing_file_is_an_io_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let err = UploadTransport::new(api(&server))
        .upload_path(dir.path().join("absent.csv"), &[], None)
        .await
        .unwrap_err();
    assert_matches!(err, UploadError::Io { .. });
}
