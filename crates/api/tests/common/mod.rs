#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use tower::ServiceExt;
use typology_api::config::{QueueConfig, ServerConfig, StoreBackend};
use typology_api::engine::RunQueueWorker;
use typology_api::router::build_app_router;
use typology_api::scorer::{RunScorer, ScoreError, ScoreRequest};
use typology_api::state::AppState;
use typology_core::payload::{QuestionResponse, Responses, RunResult, ScoreShape, Scores};
use typology_core::run_kind::RunKind;
use typology_core::run_mode::RunMode;
use typology_core::run_state::RunState;
use typology_core::types::{DbId, Timestamp};
use typology_db::models::run::Run;
use typology_db::store::{MemoryRunStore, RunStore};

/// Build a test `ServerConfig` with safe defaults.
///
/// Uses `http://localhost:5173` as CORS origin (matching the dev default),
/// a 30-second request timeout and a fast-polling queue.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        site_url: "https://typology.test".to_string(),
        store_backend: StoreBackend::Memory,
        scorer_url: "http://scorer.invalid".to_string(),
        queue: QueueConfig {
            poll_interval: Duration::from_millis(10),
            idle_shutdown: Duration::from_secs(5),
            retry_ceiling: 3,
            stale_after: Duration::from_secs(900),
            execution_timeout: Duration::from_millis(200),
        },
    }
}

// ---------------------------------------------------------------------------
// Scorers
// ---------------------------------------------------------------------------

/// Deterministic in-process scorer.
pub enum FakeScorer {
    /// Returns a well-formed result for the run's kind and mode.
    Valid,
    /// Never answers within the execution timeout.
    Hang,
}

/// A result that passes validation for `kind` and `mode`.
pub fn valid_result(kind: RunKind, mode: RunMode) -> RunResult {
    let (low, high) = kind.rating_scale();
    let count = mode.question_count().unwrap_or(20) as u32;
    let shape = kind.score_shape();
    let values = shape
        .keys()
        .iter()
        .enumerate()
        .map(|(i, key)| (key.to_string(), 10.0 + i as f64))
        .collect();

    RunResult {
        responses: Responses(
            (1..=count)
                .map(|question| QuestionResponse {
                    question,
                    answer: if question % 2 == 0 { low } else { high },
                })
                .collect(),
        ),
        scores: match shape {
            ScoreShape::Functions => Scores::Functions(values),
            ScoreShape::Dichotomies => Scores::Dichotomies(values),
        },
        results_html: kind
            .has_results_html()
            .then(|| "<p>Grant type: <b>INTP</b></p><p>Ti 41 Ne 35</p>".to_string()),
    }
}

#[async_trait]
impl RunScorer for FakeScorer {
    async fn score(&self, request: &ScoreRequest) -> Result<RunResult, ScoreError> {
        match self {
            FakeScorer::Valid => Ok(valid_result(request.kind, request.run_mode)),
            FakeScorer::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err(ScoreError::Other("unreachable".into()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

/// Build the full application router over `store`, with a worker that
/// scores through `scorer`.
///
/// Uses the same [`build_app_router`] as `main.rs` so integration tests
/// exercise the production middleware stack.
pub fn build_test_app_with(store: Arc<MemoryRunStore>, scorer: FakeScorer) -> Router {
    let config = test_config();
    let store: Arc<dyn RunStore> = store;
    let worker = Arc::new(RunQueueWorker::new(
        Arc::clone(&store),
        Arc::new(scorer),
        config.queue.clone(),
    ));

    let state = AppState {
        store,
        config: Arc::new(config.clone()),
        worker,
    };
    build_app_router(state, &config)
}

/// [`build_test_app_with`] using the [`FakeScorer::Valid`] scorer.
pub fn build_test_app(store: Arc<MemoryRunStore>) -> Router {
    build_test_app_with(store, FakeScorer::Valid)
}

pub fn new_store() -> Arc<MemoryRunStore> {
    Arc::new(MemoryRunStore::new(3))
}

/// Seed a run for "Sherlock Holmes" directly into the store with a chosen
/// id, state and age. The slug is `sherlock-holmes-{id}`.
pub async fn seed_run(
    store: &MemoryRunStore,
    kind: RunKind,
    id: DbId,
    state: RunState,
    errors: i32,
    created_at: Timestamp,
) -> Run {
    let run = Run {
        id,
        slug: format!("sherlock-holmes-{id}"),
        state,
        errors,
        subject: "Sherlock Holmes".to_string(),
        context: Some("Consulting detective".to_string()),
        run_mode: RunMode::Q32,
        responses: None,
        scores: None,
        results_html: None,
        claim_token: None,
        claimed_at: None,
        created_at,
        updated_at: Utc::now(),
    };
    store.insert(kind, run).await.unwrap()
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
