//! Handler for shareable run page metadata.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use typology_core::metadata::{build_page_metadata, MetadataSource};
use typology_core::run_kind::RunKind;

use crate::error::AppResult;
use crate::handlers::runs::{find_run, NO_STORE};
use crate::state::AppState;

/// GET /api/meta/{kind}/{slug}
///
/// Title, description and canonical URL for the run page at
/// `/{kind}/{slug}`, reflecting the run's current state.
pub async fn get_run_metadata(
    State(state): State<AppState>,
    Path((kind, slug)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    let kind: RunKind = kind.parse()?;
    let run = find_run(state.store.as_ref(), kind, &slug).await?;

    let source = MetadataSource {
        subject: &run.subject,
        state: run.state,
        scores: run.scores(),
    };
    let path = format!("/{}/{}", kind.path_segment(), run.slug);
    let metadata = build_page_metadata(kind, Some(source), &path, &state.config.site_url);

    Ok((NO_STORE, Json(metadata)))
}
