//! Message type constants for the per-batch progress stream.
//!
//! Used by [`crate::progress::parse_message`] to dispatch on the `type`
//! field of each pushed frame.

/// Periodic counter update (also used for the `Cancelled` notice).
pub const MSG_TYPE_PROGRESS: &str = "progress";

/// Final counts after the batch finished successfully.
pub const MSG_TYPE_COMPLETED: &str = "completed";

/// The batch failed or could not be found.
pub const MSG_TYPE_ERROR: &str = "error";
