//! Typed result payloads written when a run completes.
//!
//! The scoring procedure is an external collaborator, so its output is
//! validated here against the run's kind and mode before it reaches the
//! store. Anything malformed is reported as [`CoreError::Validation`] and
//! the worker records the attempt as a failure.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::run_kind::RunKind;
use crate::run_mode::RunMode;

/// The eight Jungian cognitive functions, in conventional order.
pub const FUNCTION_CODES: [&str; 8] = ["Ne", "Ni", "Se", "Si", "Te", "Ti", "Fe", "Fi"];

/// The eight dichotomy poles.
pub const DICHOTOMY_POLES: [&str; 8] = ["E", "I", "S", "N", "T", "F", "J", "P"];

/// Key set a kind's scores must cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreShape {
    Functions,
    Dichotomies,
}

impl ScoreShape {
    pub fn keys(self) -> &'static [&'static str] {
        match self {
            ScoreShape::Functions => &FUNCTION_CODES,
            ScoreShape::Dichotomies => &DICHOTOMY_POLES,
        }
    }
}

/// One answered question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionResponse {
    /// 1-based question number.
    pub question: u32,
    pub answer: i16,
}

/// Ordered per-question answers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Responses(pub Vec<QuestionResponse>);

impl Responses {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check ordering, the kind's rating scale and the mode's question count.
    pub fn validate(&self, kind: RunKind, mode: RunMode) -> Result<(), CoreError> {
        if self.0.is_empty() {
            return Err(CoreError::Validation("Responses must not be empty".into()));
        }
        if let Some(expected) = mode.question_count() {
            if self.0.len() != expected {
                return Err(CoreError::Validation(format!(
                    "Expected {expected} responses for mode {mode}, got {}",
                    self.0.len()
                )));
            }
        }

        let (min, max) = kind.rating_scale();
        let mut previous = 0u32;
        for response in &self.0 {
            if response.question <= previous {
                return Err(CoreError::Validation(format!(
                    "Question numbers must be strictly increasing from 1 (saw {} after {previous})",
                    response.question
                )));
            }
            if !(min..=max).contains(&response.answer) {
                return Err(CoreError::Validation(format!(
                    "Answer {} to question {} is outside the {kind} scale {min}..={max}",
                    response.answer, response.question
                )));
            }
            previous = response.question;
        }
        Ok(())
    }
}

/// Computed scores, tagged by shape.
///
/// Serialized as `{"shape": "functions", "values": {"Ne": 31.5, ...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", content = "values", rename_all = "lowercase")]
pub enum Scores {
    Functions(BTreeMap<String, f64>),
    Dichotomies(BTreeMap<String, f64>),
}

impl Scores {
    pub fn shape(&self) -> ScoreShape {
        match self {
            Scores::Functions(_) => ScoreShape::Functions,
            Scores::Dichotomies(_) => ScoreShape::Dichotomies,
        }
    }

    pub fn values(&self) -> &BTreeMap<String, f64> {
        match self {
            Scores::Functions(values) | Scores::Dichotomies(values) => values,
        }
    }

    /// Key with the highest score. Ties resolve to the key listed first in
    /// the shape's conventional order.
    pub fn top(&self) -> Option<(&'static str, f64)> {
        let values = self.values();
        self.shape()
            .keys()
            .iter()
            .filter_map(|key| values.get(*key).map(|score| (*key, *score)))
            .fold(None, |best, (key, score)| match best {
                Some((_, best_score)) if best_score >= score => best,
                _ => Some((key, score)),
            })
    }

    /// Check the shape matches the kind and every key is present and finite.
    pub fn validate(&self, kind: RunKind) -> Result<(), CoreError> {
        let expected = kind.score_shape();
        if self.shape() != expected {
            return Err(CoreError::Validation(format!(
                "{kind} runs expect {expected:?} scores, got {:?}",
                self.shape()
            )));
        }

        let values = self.values();
        for key in expected.keys() {
            match values.get(*key) {
                None => {
                    return Err(CoreError::Validation(format!("Missing score for '{key}'")));
                }
                Some(score) if !score.is_finite() => {
                    return Err(CoreError::Validation(format!(
                        "Score for '{key}' is not a finite number"
                    )));
                }
                Some(_) => {}
            }
        }
        if let Some(unknown) = values.keys().find(|k| !expected.keys().contains(&k.as_str())) {
            return Err(CoreError::Validation(format!("Unknown score key '{unknown}'")));
        }
        Ok(())
    }
}

/// Everything a successful scoring pass produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub responses: Responses,
    pub scores: Scores,
    /// Pre-rendered results block; kept only for kinds that store one.
    #[serde(default)]
    pub results_html: Option<String>,
}

impl RunResult {
    pub fn validate(&self, kind: RunKind, mode: RunMode) -> Result<(), CoreError> {
        self.responses.validate(kind, mode)?;
        self.scores.validate(kind)?;
        if self.results_html.is_some() && !kind.has_results_html() {
            return Err(CoreError::Validation(format!(
                "{kind} runs do not carry a results fragment"
            )));
        }
        Ok(())
    }
}
