use serde::{Deserialize, Serialize};

pub mod color;
pub mod dispatch;
pub mod drawing;
pub mod reason;
pub mod scalar;
pub mod structure;

pub use dispatch::Grader;
pub use reason::{Reason, ReasonCategory};

use crate::feedback::Catalog;

/* ---------------- grade output ---------------- */

/// Verdict for one grading call.
///
/// `success` is true only when every declared constraint held. On failure
/// `reasons` lists every violation found in the pass and `feedback` is
/// their base-language rendering, one per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeResult {
    pub success: bool,
    pub feedback: String,
    pub reasons: Vec<Reason>,

    /// Auxiliary progress score (drawing exercises only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
}

impl GradeResult {
    pub fn pass() -> Self {
        Self::from_reasons(true, vec![Reason::Passed])
    }

    pub fn fail(reasons: Vec<Reason>) -> Self {
        debug_assert!(!reasons.is_empty(), "a failed grade must say why");
        Self::from_reasons(false, reasons)
    }

    /// Pass when no violations were collected, fail with all of them otherwise.
    pub fn from_violations(violations: Vec<Reason>) -> Self {
        if violations.is_empty() {
            Self::pass()
        } else {
            Self::fail(violations)
        }
    }

    pub fn with_score(mut self, score: u32) -> Self {
        self.score = Some(score);
        self
    }

    /// Re-render `feedback` through another catalog.
    pub fn localized(mut self, catalog: &Catalog) -> Self {
        self.feedback = catalog.format(&self.reasons);
        self
    }

    /// Category of the first reason; callers use it to pick a presentation.
    pub fn category(&self) -> ReasonCategory {
        self.reasons
            .first()
            .map(Reason::category)
            .unwrap_or(ReasonCategory::Success)
    }

    pub fn has_reason(&self, code: &str) -> bool {
        self.reasons.iter().any(|r| r.code() == code)
    }

    fn from_reasons(success: bool, reasons: Vec<Reason>) -> Self {
        Self {
            success,
            feedback: Catalog::base().format(&reasons),
            reasons,
            score: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_violations() {
        assert!(GradeResult::from_violations(vec![]).success);

        let failed = GradeResult::from_violations(vec![
            Reason::MissingElement { name: "a".into() },
            Reason::ForbiddenElement { name: "b".into() },
        ]);
        assert!(!failed.success);
        assert_eq!(
            failed.feedback,
            "missing required element: a\nforbidden element used: b"
        );
        assert_eq!(failed.category(), ReasonCategory::Violation);
    }

    #[test]
    fn test_score_is_omitted_when_absent() {
        let json = serde_json::to_value(GradeResult::pass()).unwrap();
        assert!(json.get("score").is_none());
        assert_eq!(json["reasons"][0]["code"], "passed");
    }
}
