use crate::batch::BatchStatus;
use crate::lifecycle::LifecycleIntent;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Cannot {intent} a batch that is {from}")]
    InvalidTransition {
        from: BatchStatus,
        intent: LifecycleIntent,
    },

    #[error("Batch is {0}; no further commands are accepted")]
    Terminal(BatchStatus),

    #[error("Internal error: {0}")]
    Internal(String),
}
