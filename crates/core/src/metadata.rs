//! Page metadata for shareable run pages.
//!
//! Read-only: built from whatever state the run is in when the page is
//! requested. A pending run gets a "still scoring" description so shared
//! links never show stale or empty results.

use serde::Serialize;

use crate::payload::Scores;
use crate::run_kind::RunKind;
use crate::run_state::RunState;

/// Maximum length of a generated description.
pub const MAX_DESCRIPTION_LEN: usize = 200;

/// The run fields metadata is derived from.
#[derive(Debug, Clone, Copy)]
pub struct MetadataSource<'a> {
    pub subject: &'a str,
    pub state: RunState,
    pub scores: Option<&'a Scores>,
}

/// Title, description and canonical URL of a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageMetadata {
    pub title: String,
    pub description: String,
    pub url: String,
}

/// Join `site_url` and `path` with exactly one slash between them.
pub fn canonical_url(site_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        site_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Build metadata for a run page. `source` is `None` when no run matches.
pub fn build_page_metadata(
    kind: RunKind,
    source: Option<MetadataSource<'_>>,
    path: &str,
    site_url: &str,
) -> PageMetadata {
    let url = canonical_url(site_url, path);
    let indicator = kind.display_name();

    let Some(run) = source else {
        return PageMetadata {
            title: format!("{indicator} results"),
            description: format!("Cognitive function results from the {indicator} test."),
            url,
        };
    };

    let title = format!("{} \u{2014} {indicator} results", run.subject);
    let description = match (run.state, run.scores) {
        (RunState::Complete, Some(scores)) => {
            let listed = scores
                .shape()
                .keys()
                .iter()
                .filter_map(|key| scores.values().get(*key).map(|v| format!("{key} {v:.0}")))
                .collect::<Vec<_>>()
                .join(", ");
            match scores.top() {
                Some((top, _)) => format!("{} leads with {top}. {listed}", run.subject),
                None => listed,
            }
        }
        (RunState::Error, _) => {
            let subject = &run.subject;
            format!("The {indicator} run for {subject} could not be scored.")
        }
        _ => {
            let subject = &run.subject;
            format!("{subject} is still being scored on the {indicator} test.")
        }
    };

    PageMetadata {
        title,
        description: truncate_chars(&description, MAX_DESCRIPTION_LEN),
        url,
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('\u{2026}');
    out
}
