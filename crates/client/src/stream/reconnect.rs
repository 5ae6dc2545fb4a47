//! Single-shot delayed reconnection for progress streams.
//!
//! After a stream fault the processor waits a fixed backoff and opens the
//! stream once more from scratch. There is no resume offset: the server
//! re-sends its latest cumulative snapshot on every new connection.

use std::time::Duration;

use cleanflow_core::types::DbId;
use tokio_util::sync::CancellationToken;

use crate::stream::transport::{FrameStream, StreamError, StreamTransport};

/// Backoff applied before the reconnection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(3),
        }
    }
}

/// Wait `policy.delay`, then make exactly one connection attempt.
///
/// Returns `None` if `cancel` fires first, otherwise the attempt's result.
pub async fn reconnect(
    transport: &dyn StreamTransport,
    batch_id: DbId,
    policy: &ReconnectPolicy,
    cancel: &CancellationToken,
) -> Option<Result<FrameStream, StreamError>> {
    tracing::info!(
        batch_id,
        delay_ms = policy.delay.as_millis() as u64,
        "Reconnecting to progress stream",
    );

    tokio::select! {
        _ = cancel.cancelled() => return None,
        _ = tokio::time::sleep(policy.delay) => {}
    }

    tokio::select! {
        _ = cancel.cancelled() => {
            tracing::info!(batch_id, "Reconnect cancelled");
            None
        }
        result = transport.open(batch_id) => {
            match &result {
                Ok(_) => tracing::info!(batch_id, "Reconnected to progress stream"),
                Err(e) => tracing::warn!(batch_id, error = %e, "Reconnect attempt failed"),
            }
            Some(result)
        }
    }
}
