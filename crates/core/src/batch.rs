//! Batch identity, status and summary counters.
//!
//! A [`Batch`] is created by the server when an upload is accepted and is
//! only ever mutated by server-reported state. The client-side view is a
//! read model refreshed from stream events or explicit refetches.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{deserialize_id, DbId, Timestamp};

/// Status of an ingestion job.
///
/// Serialized with the server's capitalised spelling (`"Processing"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchStatus {
    Pending,
    /// The server also reports an `Indexing` post-processing phase, which
    /// is still an active state from the client's point of view.
    #[serde(alias = "Indexing")]
    Processing,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl BatchStatus {
    /// Wire / display spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Processing => "Processing",
            Self::Paused => "Paused",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Parse a status string as sent by the server, case-insensitively.
    ///
    /// `Indexing` maps to [`BatchStatus::Processing`]. Returns `None` for
    /// anything unrecognised.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "processing" | "indexing" => Some(Self::Processing),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// `Completed`, `Failed` and `Cancelled` end the batch; nothing moves
    /// it out of these states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ingestion job as returned by `GET /batches/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: DbId,
    #[serde(default)]
    pub original_filename: String,
    pub status: BatchStatus,
    /// Zero until the server has scanned the whole source file.
    #[serde(default)]
    pub total_rows: u64,
    #[serde(default)]
    pub processed_rows: u64,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    pub created_at: Timestamp,
}

impl Batch {
    /// Check `success_count + failure_count <= total_rows` once the total
    /// is known.
    pub fn check_counts(&self) -> Result<(), CoreError> {
        let settled = self.success_count + self.failure_count;
        if self.total_rows > 0 && settled > self.total_rows {
            return Err(CoreError::Validation(format!(
                "batch {} reports {settled} settled rows but only {} in total",
                self.id, self.total_rows
            )));
        }
        Ok(())
    }
}

/// Which rows an export should contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportKind {
    #[default]
    All,
    Clean,
    Error,
}

impl ExportKind {
    /// Value of the `type` query parameter, or `None` for a full export.
    pub fn query_value(&self) -> Option<&'static str> {
        match self {
            Self::All => None,
            Self::Clean => Some("clean"),
            Self::Error => Some("error"),
        }
    }
}
