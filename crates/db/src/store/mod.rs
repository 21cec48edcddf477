//! The run store seam.
//!
//! [`RunStore`] is the only path through which run state is mutated. Each
//! operation is atomic with respect to concurrent callers: the PostgreSQL
//! store relies on single-statement conditional updates, the in-memory store
//! on one lock per operation.

use async_trait::async_trait;
use typology_core::error::CoreError;
use typology_core::payload::RunResult;
use typology_core::run_kind::RunKind;
use typology_core::run_state::{RunAction, RunState};
use typology_core::types::{DbId, Timestamp};
use uuid::Uuid;

use crate::models::run::{CreateRun, Run};

pub mod memory;
pub mod pg;

pub use memory::MemoryRunStore;
pub use pg::PgRunStore;

/// Errors raised by [`RunStore`] implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A database error from sqlx.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The run is not in a state the action accepts.
    #[error("Cannot {action} {} run {id} in state {from}", .kind.display_name())]
    InvalidTransition {
        kind: RunKind,
        id: DbId,
        from: RunState,
        action: RunAction,
    },

    /// The caller's claim was superseded (reclaimed or reset).
    #[error("Claim on {} run {id} is no longer held", .kind.display_name())]
    LeaseLost { kind: RunKind, id: DbId },

    /// No run with this id exists.
    #[error("{} run {id} does not exist", .kind.display_name())]
    Missing { kind: RunKind, id: DbId },

    /// Payload rejected at the store boundary.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Lifecycle operations over the per-kind run stores.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Failures tolerated before a run becomes terminally `ERROR`.
    fn retry_ceiling(&self) -> i32;

    /// Create a `QUEUED` run and assign its slug.
    async fn create(&self, kind: RunKind, input: &CreateRun) -> Result<Run, StoreError>;

    /// Exact match on the unique slug.
    async fn find_by_slug(&self, kind: RunKind, slug: &str) -> Result<Option<Run>, StoreError>;

    async fn find_by_id(&self, kind: RunKind, id: DbId) -> Result<Option<Run>, StoreError>;

    /// All runs of `kind`, newest first.
    async fn list_by_creation(&self, kind: RunKind) -> Result<Vec<Run>, StoreError>;

    /// Atomically move the oldest `QUEUED` run to `PROCESSING` under a fresh
    /// claim token and return it.
    async fn claim_next_queued(&self, kind: RunKind) -> Result<Option<Run>, StoreError>;

    /// Write results for a run this caller holds the claim on.
    async fn mark_complete(
        &self,
        kind: RunKind,
        id: DbId,
        claim_token: Uuid,
        result: &RunResult,
    ) -> Result<Run, StoreError>;

    /// Count a failed attempt; `QUEUED` below the ceiling, `ERROR` at it.
    async fn mark_failed(
        &self,
        kind: RunKind,
        id: DbId,
        claim_token: Option<Uuid>,
    ) -> Result<Run, StoreError>;

    /// Reset a run to `QUEUED` with `errors = 0`. `Ok(None)` when no run has
    /// this slug.
    async fn reset_for_retry(&self, kind: RunKind, slug: &str) -> Result<Option<Run>, StoreError>;

    /// Release `PROCESSING` claims taken before `older_than`, counting each
    /// as a failed attempt. Returns how many were released.
    async fn requeue_stale(&self, kind: RunKind, older_than: Timestamp) -> Result<u64, StoreError>;

    /// Verify the backing store is reachable.
    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Explain why a conditional mutation did not apply to `current`.
///
/// Used after an update matched no row: distinguishes a missing run, a
/// superseded claim and a state the action does not accept.
pub(crate) fn rejection(
    kind: RunKind,
    id: DbId,
    current: Option<&Run>,
    action: RunAction,
    claim_token: Option<Uuid>,
) -> StoreError {
    match current {
        None => StoreError::Missing { kind, id },
        Some(run) if superseded(run, action, claim_token) => StoreError::LeaseLost { kind, id },
        Some(run) => StoreError::InvalidTransition {
            kind,
            id,
            from: run.state,
            action,
        },
    }
}

/// The action was allowed but the caller's claim has been replaced.
fn superseded(run: &Run, action: RunAction, claim_token: Option<Uuid>) -> bool {
    action.permits(run.state) && claim_token.is_some() && run.claim_token != claim_token
}

/// Whether `claim_token` is the live claim on a processing run.
pub(crate) fn holds_claim(run: &Run, claim_token: Uuid) -> bool {
    run.state == RunState::Processing && run.claim_token == Some(claim_token)
}

/// Validate a scoring result against the run it completes.
pub(crate) fn check_result(kind: RunKind, run: &Run, result: &RunResult) -> Result<(), StoreError> {
    result.validate(kind, run.run_mode)?;
    Ok(())
}
