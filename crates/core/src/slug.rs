//! Slug helpers.
//!
//! A run slug is the slugified subject followed by the run id, e.g.
//! `sherlock-holmes-42`. The id suffix is what makes it unique per kind.

use crate::types::DbId;

/// Maximum length of the subject part of a slug.
pub const MAX_SLUG_STEM_LEN: usize = 60;

/// Stem used when the subject has no ASCII alphanumerics at all.
const FALLBACK_STEM: &str = "run";

/// Lowercase ASCII alphanumerics; every other run of characters becomes a
/// single `-`. Leading and trailing separators are dropped.
pub fn slugify(subject: &str) -> String {
    let mut out = String::with_capacity(subject.len().min(MAX_SLUG_STEM_LEN));
    let mut pending_dash = false;

    for ch in subject.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
        if out.len() >= MAX_SLUG_STEM_LEN {
            break;
        }
    }

    out.truncate(MAX_SLUG_STEM_LEN);
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Full slug for a run.
pub fn run_slug(subject: &str, id: DbId) -> String {
    format!("{}-{id}", slugify(subject))
}

/// Parse the id suffix back out of a slug.
pub fn slug_id(slug: &str) -> Option<DbId> {
    let (_, suffix) = slug.rsplit_once('-')?;
    suffix.parse().ok().filter(|id: &DbId| *id > 0)
}
