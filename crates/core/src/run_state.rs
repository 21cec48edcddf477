//! Run lifecycle states and the transitions between them.
//!
//! ```text
//! CREATED -> QUEUED -> PROCESSING -> COMPLETE
//!                ^          |
//!                +----------+  (failure below the retry ceiling)
//!                           |
//!                           +-> ERROR  (failure at the ceiling)
//!
//! ERROR / QUEUED / PROCESSING --retry--> QUEUED   (errors reset to 0)
//! ```
//!
//! Discriminants match the seed order of the `run_states` lookup table.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Status ID type matching SMALLINT in the database.
pub type StateId = i16;

/// Failures tolerated before a run becomes terminally `ERROR`.
pub const DEFAULT_RETRY_CEILING: i32 = 3;

/// Lifecycle state of a run.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Created = 1,
    Queued = 2,
    Processing = 3,
    Complete = 4,
    Error = 5,
}

impl RunState {
    /// Return the database state ID.
    pub fn id(self) -> StateId {
        self as StateId
    }

    /// Map a database state ID back to a state.
    pub fn from_id(id: StateId) -> Option<Self> {
        match id {
            1 => Some(RunState::Created),
            2 => Some(RunState::Queued),
            3 => Some(RunState::Processing),
            4 => Some(RunState::Complete),
            5 => Some(RunState::Error),
            _ => None,
        }
    }

    /// Upper-case wire name (`"QUEUED"`).
    pub fn name(self) -> &'static str {
        match self {
            RunState::Created => "CREATED",
            RunState::Queued => "QUEUED",
            RunState::Processing => "PROCESSING",
            RunState::Complete => "COMPLETE",
            RunState::Error => "ERROR",
        }
    }
}

impl From<RunState> for StateId {
    fn from(value: RunState) -> Self {
        value as StateId
    }
}

impl TryFrom<StateId> for RunState {
    type Error = CoreError;

    // `Self::Error` would be ambiguous with the `Error` variant.
    fn try_from(id: StateId) -> Result<Self, CoreError> {
        RunState::from_id(id)
            .ok_or_else(|| CoreError::Internal(format!("Unknown run state id {id}")))
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The mutations the store performs on a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunAction {
    Claim,
    Complete,
    Fail,
    Retry,
}

impl RunAction {
    /// States the action may be applied from.
    pub fn allowed_from(self) -> &'static [RunState] {
        match self {
            RunAction::Claim => &[RunState::Queued],
            RunAction::Complete => &[RunState::Processing],
            RunAction::Fail => &[RunState::Queued, RunState::Processing],
            RunAction::Retry => &[
                RunState::Created,
                RunState::Queued,
                RunState::Processing,
                RunState::Error,
            ],
        }
    }

    /// Whether the action is permitted from `state`.
    pub fn permits(self, state: RunState) -> bool {
        self.allowed_from().contains(&state)
    }

    pub fn name(self) -> &'static str {
        match self {
            RunAction::Claim => "claim",
            RunAction::Complete => "complete",
            RunAction::Fail => "fail",
            RunAction::Retry => "retry",
        }
    }
}

impl fmt::Display for RunAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// State a run lands in after a failure has been counted.
///
/// `errors_after` is the counter value including the failure just recorded.
pub fn state_after_failure(errors_after: i32, ceiling: i32) -> RunState {
    if errors_after >= ceiling {
        RunState::Error
    } else {
        RunState::Queued
    }
}
