pub mod health;
pub mod runs;

use axum::Router;

use crate::state::AppState;

/// Build the `/api` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /history                                 generic run history
/// /meta/{kind}/{slug}                      page metadata for a run
/// /{kind}/slug/{slug}                      run by slug
/// /{kind}/retry/{slug}                     retry (POST)
/// /{kind}/runs                             create (POST)
/// ```
///
/// `{kind}` is one of `runs`, `jbh`, `jdb`, `smysnk`.
pub fn api_routes() -> Router<AppState> {
    Router::new().merge(runs::router())
}
