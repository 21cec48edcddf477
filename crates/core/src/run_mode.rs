//! Run modes (question-count scenarios).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Question-set variant a run is executed with. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunMode {
    /// The indicator's full default question set.
    #[serde(rename = "standard")]
    Standard,
    #[serde(rename = "16q")]
    Q16,
    #[serde(rename = "32q")]
    Q32,
    #[serde(rename = "64q")]
    Q64,
}

impl RunMode {
    pub const ALL: [RunMode; 4] = [RunMode::Standard, RunMode::Q16, RunMode::Q32, RunMode::Q64];

    /// Stored / wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Standard => "standard",
            RunMode::Q16 => "16q",
            RunMode::Q32 => "32q",
            RunMode::Q64 => "64q",
        }
    }

    /// Number of questions the mode fixes, if any.
    ///
    /// `Standard` defers to the indicator's own question set.
    pub fn question_count(self) -> Option<usize> {
        match self {
            RunMode::Standard => None,
            RunMode::Q16 => Some(16),
            RunMode::Q32 => Some(32),
            RunMode::Q64 => Some(64),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RunMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Invalid run mode '{s}'. Must be one of: standard, 16q, 32q, 64q"
                ))
            })
    }
}

impl TryFrom<String> for RunMode {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
