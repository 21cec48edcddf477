//! Scoring procedure collaborator.
//!
//! The queue worker hands each claimed run to a [`RunScorer`]. Production
//! uses [`HttpRunScorer`], which POSTs the run to an external scoring
//! service using [`reqwest`]; tests substitute in-process fakes.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use typology_core::payload::RunResult;
use typology_core::run_kind::RunKind;
use typology_core::run_mode::RunMode;
use typology_db::models::run::Run;

/// Input to one scoring call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRequest {
    pub kind: RunKind,
    pub subject: String,
    pub context: Option<String>,
    pub run_mode: RunMode,
}

impl ScoreRequest {
    pub fn for_run(kind: RunKind, run: &Run) -> Self {
        Self {
            kind,
            subject: run.subject.clone(),
            context: run.context.clone(),
            run_mode: run.run_mode,
        }
    }
}

/// Why a scoring attempt produced no usable result. Every variant counts
/// as one failed attempt against the run.
#[derive(Debug, thiserror::Error)]
pub enum ScoreError {
    /// The HTTP request itself failed (network, DNS, TLS, decode).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The scoring service returned a non-2xx status code.
    #[error("Scoring service error ({status}): {body}")]
    Backend { status: u16, body: String },

    /// The call did not finish within the execution timeout.
    #[error("Scoring timed out after {0:?}")]
    Timeout(Duration),

    /// The service answered, but the payload does not fit the run.
    #[error("Invalid scoring result: {0}")]
    Invalid(String),

    /// The scorer panicked while handling the run.
    #[error("Scorer panicked: {0}")]
    Panicked(String),

    /// Any other failure raised by a scorer implementation.
    #[error("{0}")]
    Other(String),
}

/// Produces responses and scores for a run.
#[async_trait]
pub trait RunScorer: Send + Sync {
    async fn score(&self, request: &ScoreRequest) -> Result<RunResult, ScoreError>;
}

/// HTTP client for the scoring service.
pub struct HttpRunScorer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRunScorer {
    /// * `base_url` - Service root, e.g. `http://localhost:8090`.
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    /// Ensure the response has a success status code, returning it
    /// unchanged, or a [`ScoreError::Backend`] carrying the body text.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ScoreError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ScoreError::Backend {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl RunScorer for HttpRunScorer {
    /// `POST {base_url}/score` with the request as JSON; the body of a 2xx
    /// answer is the [`RunResult`].
    async fn score(&self, request: &ScoreRequest) -> Result<RunResult, ScoreError> {
        let response = self
            .client
            .post(format!("{}/score", self.base_url))
            .json(request)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.json::<RunResult>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_camel_case() {
        let request = ScoreRequest {
            kind: RunKind::Jbh,
            subject: "Sherlock Holmes".into(),
            context: None,
            run_mode: RunMode::Q32,
        };
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["kind"], "jbh");
        assert_eq!(json["runMode"], "32q");
        assert_eq!(json["subject"], "Sherlock Holmes");
        assert!(json["context"].is_null());
    }

    #[test]
    fn backend_error_message_carries_status_and_body() {
        let err = ScoreError::Backend {
            status: 503,
            body: "overloaded".into(),
        };
        assert_eq!(err.to_string(), "Scoring service error (503): overloaded");
    }
}
