//! Domain layer for questionnaire runs.
//!
//! Holds the pieces shared by the persistence and HTTP layers: run kinds,
//! run modes, the run state machine, typed result payloads, slug helpers,
//! the results-fragment summary extractor and page metadata. This crate has
//! no internal dependencies.

pub mod error;
pub mod metadata;
pub mod payload;
pub mod run_kind;
pub mod run_mode;
pub mod run_state;
pub mod slug;
pub mod submission;
pub mod type_summary;
pub mod types;
