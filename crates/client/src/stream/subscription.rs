//! Scoped progress subscriptions.
//!
//! [`ProgressStreamClient::subscribe`] spawns one task per subscription and
//! hands back a [`Subscription`] that owns it. Closing the handle, reaching
//! a terminal status, shutting the client down or dropping the handle all
//! stop delivery and release the connection.

use std::sync::Arc;
use std::time::Duration;

use cleanflow_core::batch::BatchStatus;
use cleanflow_core::progress::ProgressSnapshot;
use cleanflow_core::types::DbId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::stream::processor::run_subscription;
use crate::stream::reconnect::ReconnectPolicy;
use crate::stream::transport::{SseTransport, StreamError, StreamTransport, WsTransport};

/// Buffered events per subscription before the reader task waits.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// How long [`Subscription::close`] waits for the task to exit.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a subscription stopped delivering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The batch reached `Completed`, `Failed` or `Cancelled`.
    Terminal(BatchStatus),
    /// A stream fault was followed by a failed reconnection attempt.
    ReconnectFailed,
}

/// Items delivered by a [`Subscription`], in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    Snapshot(ProgressSnapshot),
    /// The stream faulted; one reconnection attempt follows after `delay`.
    Reconnecting { delay: Duration },
    /// User-visible warning; the reconnection attempt failed.
    Warning(String),
    /// Last event of the subscription.
    Closed(CloseReason),
}

/// Live subscription to one batch's progress.
pub struct Subscription {
    batch_id: DbId,
    rx: mpsc::Receiver<SubscriptionEvent>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn batch_id(&self) -> DbId {
        self.batch_id
    }

    /// Next event, or `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<SubscriptionEvent> {
        self.rx.recv().await
    }

    /// Stop delivery and wait for the reader task to release its
    /// connection.
    pub async fn close(mut self) {
        self.cancel.cancel();
        self.rx.close();
        if let Some(handle) = self.handle.take() {
            if tokio::time::timeout(CLOSE_TIMEOUT, handle).await.is_err() {
                tracing::warn!(batch_id = self.batch_id, "Progress task did not stop in time");
            }
        }
        tracing::debug!(batch_id = self.batch_id, "Subscription closed");
    }

    /// Whether the reader task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Opens progress subscriptions over a configured transport.
pub struct ProgressStreamClient {
    transport: Arc<dyn StreamTransport>,
    policy: ReconnectPolicy,
    /// Parent of every subscription's token; cancelled on shutdown.
    cancel: CancellationToken,
}

impl ProgressStreamClient {
    pub fn new(transport: Arc<dyn StreamTransport>, policy: ReconnectPolicy) -> Self {
        Self {
            transport,
            policy,
            cancel: CancellationToken::new(),
        }
    }

    /// Pick the transport from the stream URL scheme.
    pub fn from_config(config: &ClientConfig) -> Result<Self, StreamError> {
        let transport: Arc<dyn StreamTransport> = if config.uses_websocket() {
            Arc::new(WsTransport::new(&config.stream_url, config.token.clone()))
        } else {
            Arc::new(SseTransport::from_config(config)?)
        };
        let policy = ReconnectPolicy {
            delay: config.reconnect_delay,
        };
        Ok(Self::new(transport, policy))
    }

    /// Subscribe to `batch_id`. Must be called within a Tokio runtime.
    pub fn subscribe(&self, batch_id: DbId) -> Subscription {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(run_subscription(
            Arc::clone(&self.transport),
            batch_id,
            self.policy,
            tx,
            cancel.clone(),
        ));
        tracing::debug!(batch_id, "Subscribed to batch progress");
        Subscription {
            batch_id,
            rx,
            cancel,
            handle: Some(handle),
        }
    }

    /// Cancel every subscription opened by this client.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down progress stream client");
        self.cancel.cancel();
    }
}
