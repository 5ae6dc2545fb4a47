//! Transports that deliver raw progress frames for one batch.
//!
//! The server pushes frames over server-sent events; a WebSocket endpoint
//! can be used instead by configuring a `ws://` stream URL. Both yield the
//! same [`FrameStream`] of JSON text frames.

use async_trait::async_trait;
use cleanflow_core::types::DbId;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::config::ClientConfig;
use crate::stream::sse::SseDecoder;

/// Text frames in arrival order. Ends when the server closes its side.
pub type FrameStream = BoxStream<'static, Result<String, StreamError>>;

/// Errors raised while opening or reading a progress stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Failed to establish the connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The server answered the stream request with a non-2xx status.
    #[error("Stream rejected with status {0}")]
    Rejected(u16),

    /// An established stream failed mid-flight.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Opens a fresh progress stream for a batch. Each call starts from
/// scratch; the server always re-sends its latest cumulative snapshot.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn open(&self, batch_id: DbId) -> Result<FrameStream, StreamError>;
}

/// Build `{base}/batches/{id}/progress`, adding `?token=` when set.
pub fn progress_url(base: &str, batch_id: DbId, token: Option<&str>) -> Result<String, StreamError> {
    let mut url = reqwest::Url::parse(&format!(
        "{}/batches/{batch_id}/progress",
        base.trim_end_matches('/')
    ))
    .map_err(|e| StreamError::Connection(format!("invalid stream URL '{base}': {e}")))?;
    if let Some(token) = token {
        url.query_pairs_mut().append_pair("token", token);
    }
    Ok(url.into())
}

// ---------------------------------------------------------------------------
// Server-sent events
// ---------------------------------------------------------------------------

/// Reads `text/event-stream` responses over HTTP.
pub struct SseTransport {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl SseTransport {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            token,
        }
    }

    /// The stream stays open for the whole batch, so only the connect
    /// phase is bounded by the request timeout.
    pub fn from_config(config: &ClientConfig) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .build()
            .map_err(|e| StreamError::Connection(e.to_string()))?;
        Ok(Self::new(client, &config.stream_url, config.token.clone()))
    }
}

#[async_trait]
impl StreamTransport for SseTransport {
    async fn open(&self, batch_id: DbId) -> Result<FrameStream, StreamError> {
        let url = progress_url(&self.base_url, batch_id, self.token.as_deref())?;

        let mut request = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| StreamError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Rejected(status.as_u16()));
        }

        tracing::info!(batch_id, "Connected to progress stream (SSE)");

        let mut decoder = SseDecoder::default();
        let frames = response
            .bytes_stream()
            .map(move |chunk| -> Vec<Result<String, StreamError>> {
                match chunk {
                    Ok(bytes) => decoder.push(&bytes).into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(StreamError::Transport(e.to_string()))],
                }
            })
            .flat_map(futures::stream::iter);

        Ok(frames.boxed())
    }
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

/// Reads JSON text frames from a WebSocket endpoint.
pub struct WsTransport {
    base_url: String,
    token: Option<String>,
}

impl WsTransport {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token,
        }
    }
}

#[async_trait]
impl StreamTransport for WsTransport {
    async fn open(&self, batch_id: DbId) -> Result<FrameStream, StreamError> {
        let url = progress_url(&self.base_url, batch_id, self.token.as_deref())?;

        let (ws_stream, _response) = connect_async(url.as_str()).await.map_err(|e| {
            StreamError::Connection(format!(
                "Failed to connect to progress stream at {}: {e}",
                self.base_url
            ))
        })?;

        tracing::info!(batch_id, "Connected to progress stream (WebSocket)");

        let frames = ws_stream.filter_map(move |msg| async move {
            match msg {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Close(frame)) => {
                    tracing::info!(batch_id, ?frame, "Progress WebSocket closed");
                    None
                }
                // Binary, ping and pong frames carry no progress data.
                Ok(_) => None,
                Err(e) => Some(Err(StreamError::Transport(e.to_string()))),
            }
        });

        Ok(frames.boxed())
    }
}
