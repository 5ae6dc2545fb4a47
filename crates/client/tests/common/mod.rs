//! Shared fixtures for the client integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use cleanflow_client::api::CleanflowApi;
use cleanflow_client::stream::{FrameStream, StreamError, StreamTransport};
use cleanflow_core::types::DbId;
use futures::StreamExt;
use wiremock::MockServer;

/// API client pointed at a mock server.
pub fn api(server: &MockServer) -> CleanflowApi {
    CleanflowApi::new(server.uri())
}

/// Wrap `data` in the server's success envelope.
pub fn envelope(data: serde_json::Value) -> serde_json::Value {
    serde_json::json!({ "code": 200, "message": "success", "data": data })
}

/// Error envelope as returned with non-2xx statuses.
pub fn error_envelope(code: u16, error: &str) -> serde_json::Value {
    serde_json::json!({ "code": code, "message": "error", "error": error })
}

pub fn record_json(id: DbId, batch_id: DbId, phone: &str, status: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "batch_id": batch_id,
        "row_index": id,
        "name": "Li Lei",
        "phone": phone,
        "date": "2024-01-01",
        "province": "Zhejiang",
        "city": "Hangzhou",
        "district": "Xihu",
        "address": "Zhejiang Hangzhou Xihu",
        "status": status,
        "error_message": if status == "Clean" { "" } else { "Phone: invalid" },
        "raw_data": "{}"
    })
}

pub fn version_json(id: DbId, record_id: DbId, changed_at: &str, reason: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "record_id": record_id,
        "before": "{\"phone\":\"138\"}",
        "after": "{\"phone\":\"13800000000\"}",
        "changed_at": changed_at,
        "reason": reason
    })
}

// ---------------------------------------------------------------------------
// Scripted stream transport
// ---------------------------------------------------------------------------

/// What one call to `open` produces.
pub enum Connection {
    /// Deliver the frames, then end the stream.
    Frames(Vec<String>),
    /// Deliver the frames, then stay open without sending anything.
    FramesThenHang(Vec<String>),
    /// Deliver the frames, then fail with a transport error.
    FramesThenError(Vec<String>),
    /// Refuse the connection.
    Refuse,
}

/// In-memory transport replaying a fixed sequence of connections.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Connection>>,
    opens: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Connection>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            opens: AtomicUsize::new(0),
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamTransport for ScriptedTransport {
    async fn open(&self, _batch_id: DbId) -> Result<FrameStream, StreamError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        let ok = |frames: Vec<String>| futures::stream::iter(frames.into_iter().map(Ok));
        match next {
            Some(Connection::Frames(frames)) => Ok(ok(frames).boxed()),
            Some(Connection::FramesThenHang(frames)) => {
                Ok(ok(frames).chain(futures::stream::pending()).boxed())
            }
            Some(Connection::FramesThenError(frames)) => Ok(ok(frames)
                .chain(futures::stream::once(async {
                    Err(StreamError::Transport("connection reset".into()))
                }))
                .boxed()),
            Some(Connection::Refuse) | None => {
                Err(StreamError::Connection("connection refused".into()))
            }
        }
    }
}

pub fn frames(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
