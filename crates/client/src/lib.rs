//! Network-facing client for server-executed batch cleaning jobs.
//!
//! Provides the REST wrapper, deduplicated uploads, per-batch progress
//! subscriptions, the batch lifecycle controller, the record correction
//! engine and the version history read model.

pub mod api;
pub mod cache;
pub mod config;
pub mod correction;
pub mod events;
pub mod history;
pub mod lifecycle;
pub mod stream;
pub mod upload;

pub use api::{ApiError, CleanflowApi};
pub use config::ClientConfig;
