//! Stream frame parsing and normalization into [`ProgressSnapshot`].
//!
//! The server pushes JSON frames of the shape `{"type": "<kind>", ...}`.
//! Three typed shapes exist (`progress`, `completed`, `error`) plus an
//! untyped legacy shape from older servers. All of them normalize into the
//! same snapshot type so consumers never branch on wire format.
//!
//! Speed is taken verbatim from the server. Percent and ETA are always
//! derived from the server's counters with the formulas in
//! [`compute_percent`] and [`compute_eta`], so every snapshot is internally
//! consistent regardless of which shape produced it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::batch::BatchStatus;
use crate::record::Record;
use crate::stream_events::{MSG_TYPE_COMPLETED, MSG_TYPE_ERROR, MSG_TYPE_PROGRESS};

/// Payload of a `progress` frame.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProgressFrame {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub processed: u64,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub success: u64,
    #[serde(default)]
    pub failed: u64,
    /// Rows per second, server-computed.
    #[serde(default)]
    pub speed: f64,
    /// Seconds since the batch was created.
    #[serde(default)]
    pub elapsed: Option<u64>,
}

/// Payload of a `completed` frame.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CompletedFrame {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub success: u64,
    #[serde(default)]
    pub failed: u64,
    /// First few records of the finished batch.
    #[serde(default)]
    pub preview: Vec<Record>,
}

/// Payload of an `error` frame.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ErrorFrame {
    #[serde(default)]
    pub message: String,
}

/// Success/failure split nested in the legacy shape.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LegacyFilters {
    #[serde(default)]
    pub success: u64,
    #[serde(default)]
    pub failed: u64,
}

/// Untyped frame emitted by older servers.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LegacyFrame {
    pub status: String,
    #[serde(default)]
    pub processed_rows: u64,
    #[serde(default)]
    pub total_rows: u64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub filters: LegacyFilters,
    #[serde(default)]
    pub error: Option<String>,
}

/// Any frame the progress stream may deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Progress(ProgressFrame),
    Completed(CompletedFrame),
    Error(ErrorFrame),
    Legacy(LegacyFrame),
}

/// Parse one stream frame.
///
/// Frames without a `type` field are read as the legacy shape. Returns
/// `Err` for malformed JSON or unknown `type` values; callers should log
/// and skip the frame.
pub fn parse_message(text: &str) -> Result<StreamMessage, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;
    let kind = value.get("type").and_then(Value::as_str).map(str::to_owned);
    match kind.as_deref() {
        Some(MSG_TYPE_PROGRESS) => serde_json::from_value(value).map(StreamMessage::Progress),
        Some(MSG_TYPE_COMPLETED) => serde_json::from_value(value).map(StreamMessage::Completed),
        Some(MSG_TYPE_ERROR) => serde_json::from_value(value).map(StreamMessage::Error),
        Some(other) => Err(serde::de::Error::custom(format!(
            "unknown stream message type '{other}'"
        ))),
        None => serde_json::from_value(value).map(StreamMessage::Legacy),
    }
}

/// The single authoritative progress state carried by one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub status: BatchStatus,
    pub processed: u64,
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    /// Rows per second as reported by the server.
    pub speed: f64,
    /// Seconds remaining; 0 when unknown.
    pub eta: u64,
    /// `None` while the total is still unknown.
    pub percent: Option<u8>,
    pub elapsed: Option<u64>,
    /// Server is in its post-processing (`Indexing`) phase.
    pub indexing: bool,
    pub error: Option<String>,
    #[serde(skip)]
    pub preview: Vec<Record>,
}

impl ProgressSnapshot {
    fn from_counters(
        status: BatchStatus,
        processed: u64,
        total: u64,
        success: u64,
        failed: u64,
        speed: f64,
    ) -> Self {
        Self {
            status,
            processed,
            total,
            success,
            failed,
            speed,
            eta: compute_eta(total, processed, speed),
            percent: compute_percent(processed, total),
            elapsed: None,
            indexing: false,
            error: None,
            preview: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// `round(processed / total * 100)`, capped at 100; `None` when `total` is 0.
pub fn compute_percent(processed: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let pct = (processed as f64 / total as f64 * 100.0).round();
    Some(pct.clamp(0.0, 100.0) as u8)
}

/// `ceil((total - processed) / speed)` when speed is positive, else 0.
pub fn compute_eta(total: u64, processed: u64, speed: f64) -> u64 {
    if !(speed.is_finite() && speed > 0.0) {
        return 0;
    }
    let remaining = total.saturating_sub(processed) as f64;
    (remaining / speed).ceil() as u64
}

/// Read a wire status, treating anything unrecognised as still running.
fn wire_status(raw: Option<&str>) -> (BatchStatus, bool) {
    let Some(raw) = raw else {
        return (BatchStatus::Processing, false);
    };
    let indexing = raw.trim().eq_ignore_ascii_case("indexing");
    let status = BatchStatus::from_wire(raw).unwrap_or(BatchStatus::Processing);
    (status, indexing)
}

/// Project one parsed frame onto a snapshot.
pub fn normalize(message: StreamMessage) -> ProgressSnapshot {
    match message {
        StreamMessage::Progress(frame) => {
            let (status, indexing) = wire_status(frame.status.as_deref());
            let mut snap = ProgressSnapshot::from_counters(
                status,
                frame.processed,
                frame.total,
                frame.success,
                frame.failed,
                frame.speed,
            );
            snap.elapsed = frame.elapsed;
            snap.indexing = indexing;
            snap
        }
        StreamMessage::Completed(frame) => {
            let mut snap = ProgressSnapshot::from_counters(
                BatchStatus::Completed,
                frame.total,
                frame.total,
                frame.success,
                frame.failed,
                0.0,
            );
            snap.preview = frame.preview;
            snap
        }
        StreamMessage::Error(frame) => {
            let mut snap =
                ProgressSnapshot::from_counters(BatchStatus::Failed, 0, 0, 0, 0, 0.0);
            snap.error = Some(frame.message);
            snap
        }
        StreamMessage::Legacy(frame) => {
            let (status, indexing) = wire_status(Some(&frame.status));
            let mut snap = ProgressSnapshot::from_counters(
                status,
                frame.processed_rows,
                frame.total_rows,
                frame.filters.success,
                frame.filters.failed,
                frame.speed,
            );
            snap.indexing = indexing;
            snap.error = frame.error.filter(|e| !e.is_empty());
            snap
        }
    }
}
