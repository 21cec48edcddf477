//! Headline type extraction from a stored results fragment.
//!
//! Generic runs keep the results block as rendered HTML. The history listing
//! surfaces the headline type codes and function scores from that fragment
//! instead of re-deriving them from the raw answers.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::payload::Scores;

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// A label followed, within a short window, by a four-letter type code.
static LABELLED_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i:\b(grant|axis|myers)\b)[^.]{0,60}?\b([EI][NS][TF][JP])\b")
        .expect("valid regex")
});

static FUNCTION_SCORE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(Ne|Ni|Se|Si|Te|Ti|Fe|Fi)\b\s*[:=]?\s*(-?\d+(?:\.\d+)?)").expect("valid regex")
});

/// Headline fields of a results fragment. Every field is optional; a
/// missing or unparseable fragment yields the empty summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeSummary {
    pub grant_type: Option<String>,
    pub axis_type: Option<String>,
    pub myers_type: Option<String>,
    pub top_function: Option<String>,
    pub function_scores: BTreeMap<String, f64>,
}

/// Flatten markup to single-spaced text.
fn strip_tags(html: &str) -> String {
    let text = TAG.replace_all(html, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&#58;", ":");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// Extract the headline types and function scores from `html`.
pub fn extract_type_summary(html: Option<&str>) -> TypeSummary {
    let Some(html) = html.filter(|h| !h.trim().is_empty()) else {
        return TypeSummary::default();
    };
    let text = strip_tags(html);
    let mut summary = TypeSummary::default();

    for caps in LABELLED_TYPE.captures_iter(&text) {
        let code = caps[2].to_string();
        let slot = match caps[1].to_ascii_lowercase().as_str() {
            "grant" => &mut summary.grant_type,
            "axis" => &mut summary.axis_type,
            _ => &mut summary.myers_type,
        };
        if slot.is_none() {
            *slot = Some(code);
        }
    }

    for caps in FUNCTION_SCORE.captures_iter(&text) {
        if let Ok(score) = caps[2].parse::<f64>() {
            summary.function_scores.entry(caps[1].to_string()).or_insert(score);
        }
    }

    summary.top_function = Scores::Functions(summary.function_scores.clone())
        .top()
        .map(|(code, _)| code.to_string());

    summary
}
