//! Validate-then-commit workflow for single-record corrections.
//!
//! An edit runs in two phases. [`RecordCorrectionEngine::validate`] asks the
//! server what the edit would do without storing anything and returns a
//! [`ValidationTicket`] the caller shows to the user. Only after the user
//! confirms does [`RecordCorrectionEngine::commit`] apply the edit, consuming
//! the ticket. Each record allows one validate/commit/rollback in flight at
//! a time, and restarting an edit session invalidates outstanding tickets.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use cleanflow_core::record::{Record, RecordPatch, ValidationResult};
use cleanflow_core::types::DbId;

use crate::api::{ApiError, CleanflowApi, UpdateResponse};
use crate::events::{Invalidation, InvalidationBus};

/// Whether a commit may skip the validate phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitPolicy {
    /// Every commit must present a ticket from a shown validation.
    #[default]
    RequireValidation,
    /// Callers may commit with [`Confirmation::Fresh`].
    AllowDirect,
}

/// Proof that a validation result was produced for this exact edit in the
/// current session. Consumed by [`RecordCorrectionEngine::commit`].
#[derive(Debug, PartialEq)]
pub struct ValidationTicket {
    record_id: DbId,
    generation: u64,
    patch: RecordPatch,
    result: ValidationResult,
}

impl ValidationTicket {
    pub fn record_id(&self) -> DbId {
        self.record_id
    }

    pub fn patch(&self) -> &RecordPatch {
        &self.patch
    }

    /// What the server predicted; show this to the user before confirming.
    pub fn result(&self) -> &ValidationResult {
        &self.result
    }
}

/// Result of the validate phase.
#[derive(Debug, PartialEq)]
pub enum ValidateOutcome {
    /// The edit equals the stored fields; nothing to commit.
    NoChanges(ValidationResult),
    /// The edit would change the record; confirm before committing.
    NeedsConfirmation(ValidationTicket),
}

/// How the caller vouches for a commit.
#[derive(Debug)]
pub enum Confirmation {
    /// The user confirmed this validated edit.
    Ticket(ValidationTicket),
    /// The caller already holds a fresh confirmation of its own. Only
    /// accepted under [`CommitPolicy::AllowDirect`].
    Fresh,
}

/// Result of a commit that reached the server.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Committed(Record),
    /// The server reported the edit identical to the stored record.
    NoChanges,
}

#[derive(Debug, thiserror::Error)]
pub enum CorrectionError {
    /// Another validate/commit/rollback for this record is in flight.
    #[error("Record {record_id} already has an operation in flight")]
    Busy { record_id: DbId },

    /// Programmer error in how the workflow was driven.
    #[error("Correction invariant violated: {0}")]
    Invariant(String),

    /// The edit session this belongs to was restarted or discarded.
    #[error("Edit session for record {record_id} was superseded")]
    Superseded { record_id: DbId },

    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Default)]
struct EditSlot {
    generation: u64,
    in_flight: bool,
    /// Generation of the ticket handed out and not yet used.
    pending: Option<u64>,
}

type Slots = HashMap<DbId, EditSlot>;

/// Marks a record busy; clears the flag when dropped.
#[derive(Debug)]
struct InFlight<'a> {
    slots: &'a Mutex<Slots>,
    record_id: DbId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get_mut(&self.record_id) {
            slot.in_flight = false;
        }
    }
}

pub struct RecordCorrectionEngine {
    api: CleanflowApi,
    bus: InvalidationBus,
    batch_id: DbId,
    policy: CommitPolicy,
    slots: Mutex<Slots>,
}

impl RecordCorrectionEngine {
    /// Engine for the records of `batch_id`.
    pub fn new(api: CleanflowApi, bus: InvalidationBus, batch_id: DbId) -> Self {
        Self {
            api,
            bus,
            batch_id,
            policy: CommitPolicy::default(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_policy(mut self, policy: CommitPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> CommitPolicy {
        self.policy
    }

    /// Start a new edit session for a record, discarding any pending
    /// validation from the previous one.
    pub fn begin_session(&self, record_id: DbId) {
        let mut slots = self.slots();
        let slot = slots.entry(record_id).or_default();
        slot.generation += 1;
        slot.pending = None;
        tracing::debug!(record_id, generation = slot.generation, "Edit session started");
    }

    /// Drop the pending validation for a record (user cancelled).
    pub fn discard(&self, record_id: DbId) {
        if let Some(slot) = self.slots().get_mut(&record_id) {
            slot.pending = None;
        }
    }

    /// Whether a record has an operation in flight.
    pub fn is_busy(&self, record_id: DbId) -> bool {
        self.slots().get(&record_id).is_some_and(|s| s.in_flight)
    }

    /// Phase A: dry-run the edit. Stores nothing server-side.
    pub async fn validate(
        &self,
        record_id: DbId,
        patch: RecordPatch,
    ) -> Result<ValidateOutcome, CorrectionError> {
        if patch.is_empty() {
            return Err(self.invariant(record_id, "validate called with an empty edit"));
        }

        let (guard, generation) = self.acquire(record_id)?;
        let result = self.api.validate_record(record_id, &patch).await;
        drop(guard);
        let result = result?;

        let mut slots = self.slots();
        let slot = slots.entry(record_id).or_default();
        if slot.generation != generation {
            tracing::debug!(record_id, "Validation finished after its session was restarted");
            return Err(CorrectionError::Superseded { record_id });
        }

        if !result.has_changes {
            slot.pending = None;
            tracing::info!(record_id, "Validation found no changes; nothing to commit");
            return Ok(ValidateOutcome::NoChanges(result));
        }

        slot.pending = Some(generation);
        tracing::debug!(
            record_id,
            current_status = %result.current_status,
            new_status = %result.new_status,
            "Validation ready for confirmation",
        );
        Ok(ValidateOutcome::NeedsConfirmation(ValidationTicket {
            record_id,
            generation,
            patch,
            result,
        }))
    }

    /// Phase B: apply a confirmed edit.
    ///
    /// On success the record pages, batch summary and record history are
    /// invalidated. A `NO_CHANGES_DETECTED` answer is returned as
    /// [`CommitOutcome::NoChanges`], not as an error. Failures leave every
    /// cache untouched.
    pub async fn commit(
        &self,
        record_id: DbId,
        patch: RecordPatch,
        reason: &str,
        confirmation: Confirmation,
    ) -> Result<CommitOutcome, CorrectionError> {
        self.check_confirmation(record_id, &patch, confirmation)?;

        let (guard, _) = self.acquire(record_id)?;
        let response = self.api.update_record(record_id, &patch, reason).await;
        drop(guard);

        match response? {
            UpdateResponse::Updated(record) => {
                self.discard(record_id);
                tracing::info!(record_id, status = %record.status, "Record correction committed");
                self.publish_changed(&record);
                Ok(CommitOutcome::Committed(record))
            }
            UpdateResponse::NoChanges => {
                self.discard(record_id);
                tracing::info!(record_id, "Server reported no changes; nothing committed");
                Ok(CommitOutcome::NoChanges)
            }
        }
    }

    /// Restore a record to the state recorded by `version_id`.
    ///
    /// Which side of the version comes back is the server's decision; the
    /// returned record is its answer. A new version is appended either way.
    pub async fn rollback(&self, record_id: DbId, version_id: DbId) -> Result<Record, CorrectionError> {
        let (guard, _) = self.acquire(record_id)?;
        let response = self.api.rollback_record(record_id, version_id).await;
        drop(guard);
        let record = response?;

        self.discard(record_id);
        tracing::info!(record_id, version_id, status = %record.status, "Record rolled back");
        self.publish_changed(&record);
        Ok(record)
    }

    // ---- private helpers ----

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire(&self, record_id: DbId) -> Result<(InFlight<'_>, u64), CorrectionError> {
        let mut slots = self.slots();
        let slot = slots.entry(record_id).or_default();
        if slot.in_flight {
            tracing::debug!(record_id, "Rejecting concurrent operation on record");
            return Err(CorrectionError::Busy { record_id });
        }
        slot.in_flight = true;
        let generation = slot.generation;
        Ok((
            InFlight {
                slots: &self.slots,
                record_id,
            },
            generation,
        ))
    }

    fn check_confirmation(
        &self,
        record_id: DbId,
        patch: &RecordPatch,
        confirmation: Confirmation,
    ) -> Result<(), CorrectionError> {
        let mut slots = self.slots();
        let slot = slots.entry(record_id).or_default();
        match confirmation {
            Confirmation::Fresh => {
                if self.policy == CommitPolicy::RequireValidation {
                    return Err(self.invariant(record_id, "commit without a shown validation"));
                }
                if slot.pending.is_some() {
                    return Err(self.invariant(
                        record_id,
                        "a shown validation is pending; commit with its ticket or discard it",
                    ));
                }
                Ok(())
            }
            Confirmation::Ticket(ticket) => {
                if ticket.record_id != record_id {
                    return Err(self.invariant(record_id, "ticket belongs to another record"));
                }
                if &ticket.patch != patch {
                    return Err(self.invariant(record_id, "committed fields differ from the validated ones"));
                }
                if slot.generation != ticket.generation || slot.pending != Some(ticket.generation) {
                    return Err(CorrectionError::Superseded { record_id });
                }
                Ok(())
            }
        }
    }

    fn invariant(&self, record_id: DbId, message: &str) -> CorrectionError {
        tracing::error!(record_id, "Correction invariant violated: {message}");
        CorrectionError::Invariant(format!("record {record_id}: {message}"))
    }

    fn publish_changed(&self, record: &Record) {
        let batch_id = record.batch_id.unwrap_or(self.batch_id);
        self.bus.publish(Invalidation::Records { batch_id });
        self.bus.publish(Invalidation::BatchSummary { batch_id });
        self.bus.publish(Invalidation::History {
            record_id: record.id,
        });
    }
}
