//! Validation for run submissions.

use crate::error::CoreError;

/// Maximum length for a subject (character or person name).
pub const MAX_SUBJECT_LEN: usize = 200;

/// Maximum length for the optional free-text context.
pub const MAX_CONTEXT_LEN: usize = 5000;

/// Validate a subject: non-blank and within length limit.
pub fn validate_subject(subject: &str) -> Result<(), CoreError> {
    if subject.trim().is_empty() {
        return Err(CoreError::Validation("Subject must not be empty".to_string()));
    }
    if subject.chars().count() > MAX_SUBJECT_LEN {
        return Err(CoreError::Validation(format!(
            "Subject too long: {} chars (max {MAX_SUBJECT_LEN})",
            subject.chars().count()
        )));
    }
    Ok(())
}

/// Validate optional context text against the length limit.
pub fn validate_context(context: Option<&str>) -> Result<(), CoreError> {
    if let Some(text) = context {
        if text.chars().count() > MAX_CONTEXT_LEN {
            return Err(CoreError::Validation(format!(
                "Context too long: {} chars (max {MAX_CONTEXT_LEN})",
                text.chars().count()
            )));
        }
    }
    Ok(())
}
