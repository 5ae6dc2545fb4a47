//! Integration tests for progress subscriptions: normalization, terminal
//! close, single-shot reconnect and the SSE transport.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use cleanflow_client::lifecycle::BatchLifecycleController;
use cleanflow_client::CleanflowApi;
use cleanflow_client::stream::{
    CloseReason, ProgressStreamClient, ReconnectPolicy, SseTransport, SubscriptionEvent,
};
use cleanflow_core::batch::BatchStatus;
use common::{frames, Connection, ScriptedTransport};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PROGRESS_50: &str = r#"{"type":"progress","processed":50,"total":100,"speed":10}"#;
const COMPLETED: &str = r#"{"type":"completed","total":100,"success":90,"failed":10}"#;

fn client(transport: &Arc<ScriptedTransport>) -> ProgressStreamClient {
    ProgressStreamClient::new(transport.clone(), ReconnectPolicy::default())
}

// ---------------------------------------------------------------------------
// Test: progress then completed
// ---------------------------------------------------------------------------

/// A progress frame followed by a completed frame yields the final counts
/// and closes the subscription after the second event.
#[tokio::test]
async fn completed_frame_sets_final_counts_and_closes() {
    let transport = Arc::new(ScriptedTransport::new(vec![Connection::FramesThenHang(
        frames(&[PROGRESS_50, COMPLETED]),
    )]));
    let controller = BatchLifecycleController::new(CleanflowApi::new("http://127.0.0.1:9"), 1);
    let mut sub = client(&transport).subscribe(1);

    let first = sub.next().await;
    assert_matches!(&first, Some(SubscriptionEvent::Snapshot(s)) if s.processed == 50 && s.eta == 5);
    if let Some(SubscriptionEvent::Snapshot(s)) = &first {
        controller.apply_snapshot(s);
    }

    let second = sub.next().await;
    assert_matches!(&second, Some(SubscriptionEvent::Snapshot(s)) if s.status == BatchStatus::Completed);
    if let Some(SubscriptionEvent::Snapshot(s)) = &second {
        controller.apply_snapshot(s);
    }

    assert_eq!(
        sub.next().await,
        Some(SubscriptionEvent::Closed(CloseReason::Terminal(BatchStatus::Completed)))
    );
    assert_eq!(sub.next().await, None);

    let state = controller.state();
    assert_eq!(state.status, BatchStatus::Completed);
    assert_eq!(state.success_count, 90);
    assert_eq!(state.failure_count, 10);
    assert_eq!(transport.opens(), 1);
}

/// Processed counts never decrease within one uninterrupted subscription.
#[tokio::test]
async fn processed_is_monotonic_within_a_subscription() {
    let transport = Arc::new(ScriptedTransport::new(vec![Connection::Frames(frames(&[
        r#"{"type":"progress","processed":10,"total":100}"#,
        r#"{"type":"progress","processed":40,"total":100}"#,
        r#"{"type":"progress","status":"Indexing","processed":100,"total":100}"#,
        COMPLETED,
    ]))]));
    let mut sub = client(&transport).subscribe(1);

    let mut last = 0;
    while let Some(event) = sub.next().await {
        match event {
            SubscriptionEvent::Snapshot(s) => {
                assert!(s.processed >= last);
                last = s.processed;
            }
            SubscriptionEvent::Closed(reason) => {
                assert_eq!(reason, CloseReason::Terminal(BatchStatus::Completed));
                break;
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(last, 100);
}

/// Unparseable frames are skipped, not fatal.
#[tokio::test]
async fn malformed_frames_are_skipped() {
    let transport = Arc::new(ScriptedTransport::new(vec![Connection::Frames(frames(&[
        "not json",
        r#"{"type":"heartbeat"}"#,
        r#"{"type":"error","message":"Batch not found"}"#,
    ]))]));
    let mut sub = client(&transport).subscribe(1);

    assert_matches!(
        sub.next().await,
        Some(SubscriptionEvent::Snapshot(s)) if s.status == BatchStatus::Failed
            && s.error.as_deref() == Some("Batch not found")
    );
    assert_eq!(
        sub.next().await,
        Some(SubscriptionEvent::Closed(CloseReason::Terminal(BatchStatus::Failed)))
    );
}

/// The cancellation notice is terminal as well.
#[tokio::test]
async fn cancelled_notice_closes_subscription() {
    let transport = Arc::new(ScriptedTransport::new(vec![Connection::FramesThenHang(frames(&[
        r#"{"type":"progress","status":"Cancelled"}"#,
    ]))]));
    let mut sub = client(&transport).subscribe(1);

    assert_matches!(sub.next().await, Some(SubscriptionEvent::Snapshot(_)));
    assert_eq!(
        sub.next().await,
        Some(SubscriptionEvent::Closed(CloseReason::Terminal(BatchStatus::Cancelled)))
    );
}

// ---------------------------------------------------------------------------
// Test: reconnection
// ---------------------------------------------------------------------------

/// A transport error triggers one reconnect after the 3 second backoff; the
/// new connection starts from the server's cumulative snapshot.
#[tokio::test(start_paused = true)]
async fn stream_fault_reconnects_once_after_backoff() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        Connection::FramesThenError(frames(&[r#"{"type":"progress","processed":10,"total":100}"#])),
        Connection::FramesThenHang(frames(&[PROGRESS_50, COMPLETED])),
    ]));
    let mut sub = client(&transport).subscribe(1);

    assert_matches!(sub.next().await, Some(SubscriptionEvent::Snapshot(s)) if s.processed == 10);
    assert_eq!(
        sub.next().await,
        Some(SubscriptionEvent::Reconnecting {
            delay: Duration::from_secs(3)
        })
    );

    let before = tokio::time::Instant::now();
    assert_matches!(sub.next().await, Some(SubscriptionEvent::Snapshot(s)) if s.processed == 50);
    assert!(before.elapsed() >= Duration::from_secs(3));

    assert_matches!(sub.next().await, Some(SubscriptionEvent::Snapshot(s)) if s.status == BatchStatus::Completed);
    assert_matches!(sub.next().await, Some(SubscriptionEvent::Closed(CloseReason::Terminal(_))));
    assert_eq!(transport.opens(), 2);
}

/// If the reconnect also fails, the caller gets a warning and the
/// subscription closes without further attempts.
#[tokio::test(start_paused = true)]
async fn failed_reconnect_warns_and_closes() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        Connection::Frames(frames(&[PROGRESS_50])),
        Connection::Refuse,
    ]));
    let mut sub = client(&transport).subscribe(1);

    assert_matches!(sub.next().await, Some(SubscriptionEvent::Snapshot(_)));
    assert_matches!(sub.next().await, Some(SubscriptionEvent::Reconnecting { .. }));
    assert_matches!(sub.next().await, Some(SubscriptionEvent::Warning(msg)) if msg.contains("batch 1"));
    assert_eq!(
        sub.next().await,
        Some(SubscriptionEvent::Closed(CloseReason::ReconnectFailed))
    );
    assert_eq!(sub.next().await, None);
    assert_eq!(transport.opens(), 2);
}

/// A refused initial connection is a stream fault like any other.
#[tokio::test(start_paused = true)]
async fn initial_connect_failure_gets_one_retry() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        Connection::Refuse,
        Connection::FramesThenHang(frames(&[COMPLETED])),
    ]));
    let mut sub = client(&transport).subscribe(1);

    assert_matches!(sub.next().await, Some(SubscriptionEvent::Reconnecting { .. }));
    assert_matches!(sub.next().await, Some(SubscriptionEvent::Snapshot(_)));
    assert_matches!(sub.next().await, Some(SubscriptionEvent::Closed(_)));
}

// ---------------------------------------------------------------------------
// Test: scoped teardown
// ---------------------------------------------------------------------------

/// Closing stops delivery and the reader task exits.
#[tokio::test]
async fn close_stops_the_reader_task() {
    let transport = Arc::new(ScriptedTransport::new(vec![Connection::FramesThenHang(frames(&[
        PROGRESS_50,
    ]))]));
    let mut sub = client(&transport).subscribe(1);
    assert_matches!(sub.next().await, Some(SubscriptionEvent::Snapshot(_)));

    tokio::time::timeout(Duration::from_secs(1), sub.close())
        .await
        .expect("close should finish promptly");
    assert_eq!(transport.opens(), 1);
}

/// Shutting the client down cancels its subscriptions.
#[tokio::test]
async fn client_shutdown_ends_subscriptions() {
    let transport = Arc::new(ScriptedTransport::new(vec![Connection::FramesThenHang(frames(&[
        PROGRESS_50,
    ]))]));
    let client = client(&transport);
    let mut sub = client.subscribe(1);
    assert_matches!(sub.next().await, Some(SubscriptionEvent::Snapshot(_)));

    client.shutdown();
    let end = tokio::time::timeout(Duration::from_secs(1), sub.next())
        .await
        .expect("subscription should end after shutdown");
    assert_eq!(end, None);
}

// ---------------------------------------------------------------------------
// Test: SSE transport against a mock server
// ---------------------------------------------------------------------------

/// Frames written as `event:message` / `data:` blocks are decoded and the
/// token travels as a query parameter.
#[tokio::test]
async fn sse_transport_reads_server_events() {
    let server = MockServer::start().await;
    let body = format!("event:message\ndata:{PROGRESS_50}\n\nevent:message\ndata:{COMPLETED}\n\n");

    Mock::given(method("GET"))
        .and(path("/batches/7/progress"))
        .and(query_param("token", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let transport = SseTransport::new(reqwest::Client::new(), server.uri(), Some("secret".into()));
    let client = ProgressStreamClient::new(Arc::new(transport), ReconnectPolicy::default());
    let mut sub = client.subscribe(7);

    assert_matches!(sub.next().await, Some(SubscriptionEvent::Snapshot(s)) if s.percent == Some(50));
    assert_matches!(sub.next().await, Some(SubscriptionEvent::Snapshot(s)) if s.success == 90);
    assert_eq!(
        sub.next().await,
        Some(SubscriptionEvent::Closed(CloseReason::Terminal(BatchStatus::Completed)))
    );
}
