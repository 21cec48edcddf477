//! Handlers for run lookup, creation and retry.
//!
//! Every route is parameterised by the indicator kind's path segment
//! (`runs`, `jbh`, `jdb`, `smysnk`). Reads are never cached: clients poll
//! these endpoints to watch a run move through the queue.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use typology_core::error::CoreError;
use typology_core::payload::{Responses, Scores};
use typology_core::run_kind::RunKind;
use typology_core::run_mode::RunMode;
use typology_core::run_state::RunState;
use typology_core::slug::slug_id;
use typology_core::submission::{validate_context, validate_subject};
use typology_core::types::Timestamp;
use typology_db::models::run::{CreateRun, Run};
use typology_db::store::RunStore;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Header pair marking a response as uncacheable.
pub(crate) const NO_STORE: [(header::HeaderName, &str); 1] = [(header::CACHE_CONTROL, "no-store")];

// ---------------------------------------------------------------------------
// Projections
// ---------------------------------------------------------------------------

/// Public view of a run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunView {
    pub slug: String,
    pub run_mode: RunMode,
    pub subject: String,
    pub context: Option<String>,
    pub responses: Option<Responses>,
    pub scores: Option<Scores>,
    pub created_at: Timestamp,
    pub state: RunState,
}

impl From<Run> for RunView {
    fn from(run: Run) -> Self {
        Self {
            slug: run.slug,
            run_mode: run.run_mode,
            subject: run.subject,
            context: run.context,
            responses: run.responses.map(|json| json.0),
            scores: run.scores.map(|json| json.0),
            created_at: run.created_at,
            state: run.state,
        }
    }
}

/// Outcome of a retry request.
#[derive(Debug, Serialize)]
pub struct RetryView {
    pub slug: String,
    pub state: RunState,
    pub errors: i32,
}

/// Request body for `POST /api/{kind}/runs`. The mode arrives as a string
/// so an unknown value is reported as a validation error.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRunRequest {
    pub subject: String,
    pub context: Option<String>,
    pub run_mode: String,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn run_not_found(slug: &str) -> AppError {
    AppError::Core(CoreError::NotFound {
        entity: "Run",
        key: slug.to_string(),
    })
}

/// Look up a run by slug, or fail with `Run not found.`
///
/// Slugs without a numeric id suffix cannot exist and skip the store.
pub(crate) async fn find_run(store: &dyn RunStore, kind: RunKind, slug: &str) -> AppResult<Run> {
    if slug_id(slug).is_none() {
        return Err(run_not_found(slug));
    }
    store
        .find_by_slug(kind, slug)
        .await?
        .ok_or_else(|| run_not_found(slug))
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

/// GET /api/{kind}/slug/{slug}
///
/// Current state of a run. No side effects.
pub async fn get_run_by_slug(
    State(state): State<AppState>,
    Path((kind, slug)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    let kind: RunKind = kind.parse()?;
    let run = find_run(state.store.as_ref(), kind, &slug).await?;

    Ok((NO_STORE, Json(RunView::from(run))))
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// POST /api/{kind}/runs
///
/// Create a `QUEUED` run and make sure the worker is up. Returns 201 with
/// the new run.
pub async fn create_run(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    body: Result<Json<CreateRunRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let kind: RunKind = kind.parse()?;
    let Json(input) = body?;
    let subject = input.subject.trim();
    validate_subject(subject)?;
    let context = input
        .context
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());
    validate_context(context.as_deref())?;
    let run_mode: RunMode = input.run_mode.parse()?;

    let run = state
        .store
        .create(
            kind,
            &CreateRun {
                subject: subject.to_string(),
                context,
                run_mode,
            },
        )
        .await?;
    let started = state.worker.start();

    tracing::info!(
        %kind,
        run_id = run.id,
        slug = %run.slug,
        run_mode = %run.run_mode,
        worker_spawned = started,
        "Run created",
    );

    Ok((StatusCode::CREATED, NO_STORE, Json(RunView::from(run))))
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// POST /api/{kind}/retry/{slug}
///
/// Reset the run to `QUEUED` with a zero error count and make sure the
/// worker is up. Does not wait for processing. 409 for completed runs.
pub async fn retry_run(
    State(state): State<AppState>,
    Path((kind, slug)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    let kind: RunKind = kind.parse()?;
    let run = state
        .store
        .reset_for_retry(kind, &slug)
        .await?
        .ok_or_else(|| run_not_found(&slug))?;
    let started = state.worker.start();

    tracing::info!(
        %kind,
        run_id = run.id,
        slug = %run.slug,
        worker_spawned = started,
        "Run retried",
    );

    Ok((
        NO_STORE,
        Json(RetryView {
            slug: run.slug,
            state: run.state,
            errors: run.errors,
        }),
    ))
}
