//! Handler for the generic-run history listing.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use typology_core::run_kind::RunKind;
use typology_core::type_summary::{extract_type_summary, TypeSummary};
use typology_core::types::{DbId, Timestamp};
use typology_db::models::run::Run;

use crate::error::AppResult;
use crate::handlers::runs::NO_STORE;
use crate::state::AppState;

/// One history row: the headline types parsed from the results fragment
/// plus the run's display fields.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    #[serde(flatten)]
    pub summary: TypeSummary,
    pub id: DbId,
    pub slug: String,
    pub character: String,
    pub context: Option<String>,
    pub created_at: Timestamp,
}

impl From<Run> for HistoryItem {
    fn from(run: Run) -> Self {
        Self {
            summary: extract_type_summary(run.results_html.as_deref()),
            id: run.id,
            slug: run.slug,
            character: run.subject,
            context: run.context,
            created_at: run.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub items: Vec<HistoryItem>,
}

/// GET /api/history
///
/// Every generic run, newest first.
pub async fn list_history(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let runs = state.store.list_by_creation(RunKind::Sakinorva).await?;
    let items = runs.into_iter().map(HistoryItem::from).collect();

    Ok((NO_STORE, Json(HistoryResponse { items })))
}
