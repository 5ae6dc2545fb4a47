//! Subscription task: reads frames, normalizes them and delivers
//! snapshots until a terminal status, cancellation or an unrecoverable
//! stream fault.

use std::sync::Arc;

use cleanflow_core::batch::BatchStatus;
use cleanflow_core::progress::{normalize, parse_message};
use cleanflow_core::types::DbId;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::stream::reconnect::{reconnect, ReconnectPolicy};
use crate::stream::subscription::{CloseReason, SubscriptionEvent};
use crate::stream::transport::{FrameStream, StreamTransport};

/// How one connection's frame loop ended.
enum PumpOutcome {
    Terminal(BatchStatus),
    Fault(String),
    Stopped,
}

/// Drive one subscription until it closes.
///
/// Every stream fault (read error, unexpected end, failed connect) gets
/// exactly one delayed reconnection attempt. If that attempt cannot
/// connect, a warning is delivered and the subscription closes.
pub async fn run_subscription(
    transport: Arc<dyn StreamTransport>,
    batch_id: DbId,
    policy: ReconnectPolicy,
    tx: mpsc::Sender<SubscriptionEvent>,
    cancel: CancellationToken,
) {
    let initial = tokio::select! {
        _ = cancel.cancelled() => return,
        result = transport.open(batch_id) => result,
    };

    let mut current = match initial {
        Ok(stream) => Some(stream),
        Err(e) => {
            tracing::warn!(batch_id, error = %e, "Failed to open progress stream");
            None
        }
    };

    loop {
        if let Some(mut stream) = current.take() {
            match pump(&mut stream, batch_id, &tx, &cancel).await {
                PumpOutcome::Terminal(status) => {
                    tracing::info!(batch_id, %status, "Batch reached terminal status, closing stream");
                    deliver(&tx, &cancel, SubscriptionEvent::Closed(CloseReason::Terminal(status)))
                        .await;
                    return;
                }
                PumpOutcome::Stopped => return,
                PumpOutcome::Fault(reason) => {
                    tracing::warn!(batch_id, error = %reason, "Progress stream fault");
                }
            }
        }

        let notice = SubscriptionEvent::Reconnecting {
            delay: policy.delay,
        };
        if !deliver(&tx, &cancel, notice).await {
            return;
        }

        match reconnect(transport.as_ref(), batch_id, &policy, &cancel).await {
            None => return,
            Some(Ok(stream)) => current = Some(stream),
            Some(Err(e)) => {
                let warning = format!("Lost connection to progress stream for batch {batch_id}: {e}");
                if deliver(&tx, &cancel, SubscriptionEvent::Warning(warning)).await {
                    deliver(&tx, &cancel, SubscriptionEvent::Closed(CloseReason::ReconnectFailed))
                        .await;
                }
                return;
            }
        }
    }
}

/// Read frames from one connection.
async fn pump(
    stream: &mut FrameStream,
    batch_id: DbId,
    tx: &mpsc::Sender<SubscriptionEvent>,
    cancel: &CancellationToken,
) -> PumpOutcome {
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => return PumpOutcome::Stopped,
            item = stream.next() => item,
        };

        let text = match item {
            Some(Ok(text)) => text,
            Some(Err(e)) => return PumpOutcome::Fault(e.to_string()),
            None => return PumpOutcome::Fault("stream ended before a terminal status".into()),
        };

        if text.trim().is_empty() {
            continue;
        }

        let snapshot = match parse_message(&text) {
            Ok(message) => normalize(message),
            Err(e) => {
                tracing::warn!(
                    batch_id,
                    error = %e,
                    raw_message = %text,
                    "Failed to parse progress frame",
                );
                continue;
            }
        };

        tracing::debug!(
            batch_id,
            status = %snapshot.status,
            processed = snapshot.processed,
            total = snapshot.total,
            "Progress snapshot",
        );

        let terminal = snapshot.is_terminal().then_some(snapshot.status);
        if !deliver(tx, cancel, SubscriptionEvent::Snapshot(snapshot)).await {
            return PumpOutcome::Stopped;
        }
        if let Some(status) = terminal {
            return PumpOutcome::Terminal(status);
        }
    }
}

/// Send an event unless the subscription was cancelled or its consumer
/// went away. Returns `false` when delivery should stop.
async fn deliver(
    tx: &mpsc::Sender<SubscriptionEvent>,
    cancel: &CancellationToken,
    event: SubscriptionEvent,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(event) => sent.is_ok(),
    }
}
