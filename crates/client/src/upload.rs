//! Deduplicated upload of a source file.
//!
//! The caller fingerprints the file first, then [`UploadTransport::upload`]
//! asks the server whether that content is already stored. Known content
//! creates a batch "instantly" from metadata alone; anything else streams
//! the bytes while reporting progress on an optional channel.

use std::path::{Path, PathBuf};

use cleanflow_core::fingerprint::{fingerprint_reader, Fingerprint};
use cleanflow_core::rules::ColumnRules;
use cleanflow_core::types::DbId;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::io::ReaderStream;

use crate::api::{ApiError, CleanflowApi};

/// Progress notifications emitted during an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    /// Result of the existence check (`false` also when the check failed).
    Checked { exists: bool },
    /// Share of file bytes handed to the transport, 0-100, never decreasing.
    Progress { percent: u8 },
    /// The server accepted the upload and created a batch.
    Created { batch_id: DbId, instant: bool },
}

/// Errors that abort an upload attempt. No batch exists after any of them.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Fingerprint task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Invalid cleaning rules: {0}")]
    Rules(#[from] serde_json::Error),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// A file on disk to be uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSource {
    pub path: PathBuf,
    /// Name sent to the server as the batch's original filename.
    pub filename: String,
    pub size: u64,
}

impl UploadSource {
    /// Stat `path` and capture its name and size.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, UploadError> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|source| UploadError::Io {
                path: path.clone(),
                source,
            })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.csv".to_string());
        Ok(Self {
            path,
            filename,
            size: metadata.len(),
        })
    }
}

/// Fingerprint a source on the blocking pool so large files do not stall
/// the runtime.
pub async fn fingerprint_source(source: &UploadSource) -> Result<Fingerprint, UploadError> {
    let path = source.path.clone();
    let size = source.size;
    let result = tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(&path)?;
        fingerprint_reader(&mut file, size)
    })
    .await?;
    result.map_err(|source_err| UploadError::Io {
        path: source.path.clone(),
        source: source_err,
    })
}

/// Performs deduplicated uploads against one server.
#[derive(Clone)]
pub struct UploadTransport {
    api: CleanflowApi,
}

impl UploadTransport {
    pub fn new(api: CleanflowApi) -> Self {
        Self { api }
    }

    /// Upload `source` and return the new batch id.
    ///
    /// A failed existence check is not fatal: the upload proceeds with the
    /// full payload. Transmission failures are returned as-is and never
    /// retried here.
    pub async fn upload(
        &self,
        source: &UploadSource,
        fingerprint: &Fingerprint,
        rules: &[ColumnRules],
        events: Option<&UnboundedSender<UploadEvent>>,
    ) -> Result<DbId, UploadError> {
        let rules_json = serde_json::to_string(rules)?;

        let exists = match self.api.check_upload(fingerprint.as_str()).await {
            Ok(check) => {
                if check.exists {
                    tracing::info!(
                        hash = %fingerprint,
                        previous_batch = ?check.batch_id,
                        previous_status = ?check.status,
                        "Content already stored, creating batch without payload",
                    );
                }
                check.exists
            }
            Err(e) => {
                tracing::warn!(
                    hash = %fingerprint,
                    error = %e,
                    "Upload check failed, sending full payload",
                );
                false
            }
        };
        emit(events, UploadEvent::Checked { exists });

        let form = Form::new()
            .text("hash", fingerprint.as_str().to_string())
            .text("filename", source.filename.clone())
            .text("rules", rules_json);

        let form = if exists {
            form
        } else {
            form.part("file", self.file_part(source, events).await?)
        };

        let batch_id = self.api.create_batch(form).await?;
        tracing::info!(
            batch_id,
            filename = %source.filename,
            size = source.size,
            instant = exists,
            "Batch created",
        );
        emit(
            events,
            UploadEvent::Created {
                batch_id,
                instant: exists,
            },
        );
        Ok(batch_id)
    }

    /// Stat, fingerprint and upload `path` in one call.
    pub async fn upload_path(
        &self,
        path: impl AsRef<Path>,
        rules: &[ColumnRules],
        events: Option<&UnboundedSender<UploadEvent>>,
    ) -> Result<DbId, UploadError> {
        let source = UploadSource::from_path(path).await?;
        let fingerprint = fingerprint_source(&source).await?;
        self.upload(&source, &fingerprint, rules, events).await
    }

    /// Build the streaming `file` part, reporting byte progress as chunks
    /// are pulled by the transport.
    async fn file_part(
        &self,
        source: &UploadSource,
        events: Option<&UnboundedSender<UploadEvent>>,
    ) -> Result<Part, UploadError> {
        let file = tokio::fs::File::open(&source.path)
            .await
            .map_err(|e| UploadError::Io {
                path: source.path.clone(),
                source: e,
            })?;

        let total = source.size;
        let tx = events.cloned();
        emit(events, UploadEvent::Progress { percent: 0 });
        if total == 0 {
            emit(events, UploadEvent::Progress { percent: 100 });
        }

        let mut sent = 0u64;
        let mut last = 0u8;
        let stream = ReaderStream::new(file).map(move |chunk| {
            if let (Ok(bytes), Some(tx)) = (&chunk, &tx) {
                sent += bytes.len() as u64;
                let percent = byte_percent(sent, total);
                if percent > last {
                    last = percent;
                    let _ = tx.send(UploadEvent::Progress { percent });
                }
            }
            chunk
        });

        Ok(Part::stream_with_length(reqwest::Body::wrap_stream(stream), total)
            .file_name(source.filename.clone()))
    }
}

fn emit(events: Option<&UnboundedSender<UploadEvent>>, event: UploadEvent) {
    if let Some(tx) = events {
        // A dropped receiver only means nobody is listening.
        let _ = tx.send(event);
    }
}

fn byte_percent(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (sent.min(total) * 100 / total) as u8
}
