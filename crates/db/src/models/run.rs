//! Run entity model and DTOs.
//!
//! One struct serves all four run tables; `results_html` is always `None`
//! for kinds that do not keep a results fragment.

use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use typology_core::payload::{Responses, Scores};
use typology_core::run_mode::RunMode;
use typology_core::run_state::RunState;
use typology_core::types::{DbId, Timestamp};
use uuid::Uuid;

/// A row from any run table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Run {
    pub id: DbId,
    pub slug: String,
    #[sqlx(rename = "state_id", try_from = "i16")]
    pub state: RunState,
    pub errors: i32,
    pub subject: String,
    pub context: Option<String>,
    #[sqlx(try_from = "String")]
    pub run_mode: RunMode,
    pub responses: Option<Json<Responses>>,
    pub scores: Option<Json<Scores>>,
    pub results_html: Option<String>,
    #[serde(skip)]
    pub claim_token: Option<Uuid>,
    pub claimed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Run {
    pub fn responses(&self) -> Option<&Responses> {
        self.responses.as_ref().map(|json| &json.0)
    }

    pub fn scores(&self) -> Option<&Scores> {
        self.scores.as_ref().map(|json| &json.0)
    }
}

/// DTO for creating a run. New runs start `QUEUED`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRun {
    pub subject: String,
    pub context: Option<String>,
    pub run_mode: RunMode,
}
