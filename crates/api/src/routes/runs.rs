//! Route definitions for the run lifecycle endpoints.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{history, meta, runs};
use crate::state::AppState;

/// Routes mounted at `/api`.
///
/// ```text
/// GET    /history                 -> list_history
/// GET    /meta/{kind}/{slug}      -> get_run_metadata
/// GET    /{kind}/slug/{slug}      -> get_run_by_slug
/// POST   /{kind}/retry/{slug}     -> retry_run
/// POST   /{kind}/runs             -> create_run
/// ```
///
/// `{kind}` is `runs` for the generic kind, so `/runs/retry/{slug}` is the
/// generic retry route.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/history", get(history::list_history))
        .route("/meta/{kind}/{slug}", get(meta::get_run_metadata))
        .route("/{kind}/slug/{slug}", get(runs::get_run_by_slug))
        .route("/{kind}/retry/{slug}", post(runs::retry_run))
        .route("/{kind}/runs", post(runs::create_run))
}
