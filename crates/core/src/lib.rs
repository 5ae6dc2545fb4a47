//! Domain types and pure logic for the cleanflow batch client.
//!
//! Nothing in this crate performs I/O beyond reading a caller-supplied
//! byte source for fingerprinting.

pub mod batch;
pub mod diff;
pub mod error;
pub mod fingerprint;
pub mod lifecycle;
pub mod progress;
pub mod record;
pub mod rules;
pub mod stream_events;
pub mod types;
pub mod version;
