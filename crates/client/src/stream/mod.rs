//! Per-batch progress streaming.

pub mod processor;
pub mod reconnect;
pub mod sse;
pub mod subscription;
pub mod transport;

pub use reconnect::ReconnectPolicy;
pub use subscription::{CloseReason, ProgressStreamClient, Subscription, SubscriptionEvent};
pub use transport::{FrameStream, SseTransport, StreamError, StreamTransport, WsTransport};
