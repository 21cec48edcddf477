//! Indicator kinds.
//!
//! Every questionnaire family has its own run table and scoring path but
//! shares one lifecycle. [`RunKind`] is the discriminator threaded through the
//! store, the queue worker and the HTTP routes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::payload::ScoreShape;

/// Questionnaire family a run belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    /// The generic Sakinorva-style run (`runs` table).
    #[serde(rename = "runs")]
    Sakinorva,
    Jbh,
    Jdb,
    Smysnk,
}

impl RunKind {
    /// All kinds, in the order the queue worker scans them.
    pub const ALL: [RunKind; 4] = [
        RunKind::Sakinorva,
        RunKind::Jbh,
        RunKind::Jdb,
        RunKind::Smysnk,
    ];

    /// URL path segment (`/api/{segment}/...`).
    pub fn path_segment(self) -> &'static str {
        match self {
            RunKind::Sakinorva => "runs",
            RunKind::Jbh => "jbh",
            RunKind::Jdb => "jdb",
            RunKind::Smysnk => "smysnk",
        }
    }

    /// Backing table name. Only ever interpolated from this closed set.
    pub fn table(self) -> &'static str {
        match self {
            RunKind::Sakinorva => "runs",
            RunKind::Jbh => "jbh_runs",
            RunKind::Jdb => "jdb_runs",
            RunKind::Smysnk => "smysnk_runs",
        }
    }

    /// Human-facing indicator name.
    pub fn display_name(self) -> &'static str {
        match self {
            RunKind::Sakinorva => "Sakinorva",
            RunKind::Jbh => "JBH",
            RunKind::Jdb => "JDB",
            RunKind::Smysnk => "SMYSNK",
        }
    }

    /// Whether runs of this kind carry a pre-rendered results fragment.
    pub fn has_results_html(self) -> bool {
        matches!(self, RunKind::Sakinorva)
    }

    /// Inclusive answer range of the kind's rating scale.
    pub fn rating_scale(self) -> (i16, i16) {
        match self {
            RunKind::Smysnk => (1, 7),
            RunKind::Sakinorva | RunKind::Jbh | RunKind::Jdb => (1, 5),
        }
    }

    /// Shape the scoring procedure must produce for this kind.
    pub fn score_shape(self) -> ScoreShape {
        match self {
            RunKind::Jdb => ScoreShape::Dichotomies,
            RunKind::Sakinorva | RunKind::Jbh | RunKind::Smysnk => ScoreShape::Functions,
        }
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

impl FromStr for RunKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RunKind::ALL
            .into_iter()
            .find(|kind| kind.path_segment() == s)
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Unknown indicator kind '{s}'. Must be one of: runs, jbh, jdb, smysnk"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_path_segment() {
        for kind in RunKind::ALL {
            assert_eq!(kind.path_segment().parse::<RunKind>().unwrap(), kind);
        }
    }

    #[test]
    fn rejects_unknown_segment() {
        let err = "mbti".parse::<RunKind>().unwrap_err();
        assert!(err.to_string().contains("Unknown indicator kind 'mbti'"));
    }

    #[test]
    fn tables_are_distinct() {
        let mut tables: Vec<_> = RunKind::ALL.iter().map(|k| k.table()).collect();
        tables.dedup();
        assert_eq!(tables.len(), 4);
    }

    #[test]
    fn only_generic_kind_has_results_html() {
        assert!(RunKind::Sakinorva.has_results_html());
        assert!(!RunKind::Jbh.has_results_html());
        assert!(!RunKind::Jdb.has_results_html());
        assert!(!RunKind::Smysnk.has_results_html());
    }

    #[test]
    fn serializes_as_path_segment() {
        let sakinorva = serde_json::to_string(&RunKind::Sakinorva).unwrap();
        let smysnk = serde_json::to_string(&RunKind::Smysnk).unwrap();
        assert_eq!(sakinorva, "\"runs\"");
        assert_eq!(smysnk, "\"smysnk\"");
    }
}
