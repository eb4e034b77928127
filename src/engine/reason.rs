// src/engine/reason.rs

//! Reason codes carried by every grade.
//!
//! Validators report *why* a submission passed or failed as data. Turning a
//! reason into display text is the job of [`crate::feedback::Catalog`], so a
//! calling layer can localise by code instead of parsing sentences.

use serde::{Deserialize, Serialize};

/// Failure taxonomy used by the UI to pick a presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasonCategory {
    /// The exercise itself is not set up correctly.
    Configuration,
    /// Student code or markup could not be parsed.
    Parse,
    /// Student code parsed but failed at runtime (error, timeout, budget).
    Execution,
    /// Valid input that breaks one or more declared constraints.
    Violation,
    Success,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum Reason {
    /* ---------------- configuration ---------------- */
    NoGradingType,
    NoExpectedAnswer,
    InvalidExpectedAnswer { expected: String },
    InvalidRuleColor { color: String },

    /* ---------------- parse ---------------- */
    NoProgram,
    InvalidStructure { detail: String },
    CodeSyntax { detail: String },

    /* ---------------- execution ---------------- */
    RuntimeNotReady { runtime: String },
    ExecutionFailed { detail: String },
    Timeout { limit_ms: u64 },
    MemoryExceeded { used_mb: u64, limit_mb: u64 },

    /* ---------------- violations ---------------- */
    NoNumericResult,
    NoAnswer,
    NumericMismatch { expected: String, actual: String },
    TextMismatch { expected: String, actual: String },
    BooleanMismatch { expected: String, actual: String },
    MissingElement { name: String },
    ForbiddenElement { name: String },
    TooManyElements { used: usize, max: usize },
    NothingDrawn,
    MissingShape { shape: String },
    MissingColor { color: String },

    Passed,
}

impl Reason {
    pub fn category(&self) -> ReasonCategory {
        use Reason::*;

        match self {
            NoGradingType | NoExpectedAnswer | InvalidExpectedAnswer { .. } | InvalidRuleColor { .. } => {
                ReasonCategory::Configuration
            }
            NoProgram | InvalidStructure { .. } | CodeSyntax { .. } => ReasonCategory::Parse,
            RuntimeNotReady { .. }
            | ExecutionFailed { .. }
            | Timeout { .. }
            | MemoryExceeded { .. } => ReasonCategory::Execution,
            Passed => ReasonCategory::Success,
            _ => ReasonCategory::Violation,
        }
    }

    /// Stable snake_case code, identical to the serialised `code` tag.
    pub fn code(&self) -> &'static str {
        use Reason::*;

        match self {
            NoGradingType => "no_grading_type",
            NoExpectedAnswer => "no_expected_answer",
            InvalidExpectedAnswer { .. } => "invalid_expected_answer",
            InvalidRuleColor { .. } => "invalid_rule_color",
            NoProgram => "no_program",
            InvalidStructure { .. } => "invalid_structure",
            CodeSyntax { .. } => "code_syntax",
            RuntimeNotReady { .. } => "runtime_not_ready",
            ExecutionFailed { .. } => "execution_failed",
            Timeout { .. } => "timeout",
            MemoryExceeded { .. } => "memory_exceeded",
            NoNumericResult => "no_numeric_result",
            NoAnswer => "no_answer",
            NumericMismatch { .. } => "numeric_mismatch",
            TextMismatch { .. } => "text_mismatch",
            BooleanMismatch { .. } => "boolean_mismatch",
            MissingElement { .. } => "missing_element",
            ForbiddenElement { .. } => "forbidden_element",
            TooManyElements { .. } => "too_many_elements",
            NothingDrawn => "nothing_drawn",
            MissingShape { .. } => "missing_shape",
            MissingColor { .. } => "missing_color",
            Passed => "passed",
        }
    }

    /// Template parameters, in the order they appear in the base messages.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        use Reason::*;

        match self {
            InvalidExpectedAnswer { expected } => vec![("expected", expected.clone())],
            InvalidRuleColor { color } | MissingColor { color } => vec![("color", color.clone())],
            InvalidStructure { detail } | CodeSyntax { detail } | ExecutionFailed { detail } => {
                vec![("detail", detail.clone())]
            }
            RuntimeNotReady { runtime } => vec![("runtime", runtime.clone())],
            Timeout { limit_ms } => vec![("limit_ms", limit_ms.to_string())],
            MemoryExceeded { used_mb, limit_mb } => vec![
                ("used_mb", used_mb.to_string()),
                ("limit_mb", limit_mb.to_string()),
            ],
            NumericMismatch { expected, actual }
            | TextMismatch { expected, actual }
            | BooleanMismatch { expected, actual } => vec![
                ("expected", expected.clone()),
                ("actual", actual.clone()),
            ],
            MissingElement { name } | ForbiddenElement { name } => vec![("name", name.clone())],
            TooManyElements { used, max } => {
                vec![("used", used.to_string()), ("max", max.to_string())]
            }
            MissingShape { shape } => vec![("shape", shape.clone())],
            _ => Vec::new(),
        }
    }

    /// Every code, for config validation of message overrides.
    pub const CODES: &'static [&'static str] = &[
        "no_grading_type",
        "no_expected_answer",
        "invalid_expected_answer",
        "invalid_rule_color",
        "no_program",
        "invalid_structure",
        "code_syntax",
        "runtime_not_ready",
        "execution_failed",
        "timeout",
        "memory_exceeded",
        "no_numeric_result",
        "no_answer",
        "numeric_mismatch",
        "text_mismatch",
        "boolean_mismatch",
        "missing_element",
        "forbidden_element",
        "too_many_elements",
        "nothing_drawn",
        "missing_shape",
        "missing_color",
        "passed",
    ];
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serialised_tag_matches_code() {
        let reason = Reason::TooManyElements { used: 4, max: 3 };
        let value = serde_json::to_value(&reason).unwrap();
        assert_eq!(value, json!({ "code": "too_many_elements", "used": 4, "max": 3 }));
        assert_eq!(value["code"], reason.code());
    }

    #[test]
    fn test_unit_variant_round_trips_through_tag() {
        let parsed: Reason = serde_json::from_value(json!({ "code": "nothing_drawn" })).unwrap();
        assert_eq!(parsed, Reason::NothingDrawn);
    }

    #[test]
    fn test_categories() {
        assert_eq!(Reason::NoExpectedAnswer.category(), ReasonCategory::Configuration);
        assert_eq!(
            Reason::InvalidStructure { detail: "x".into() }.category(),
            ReasonCategory::Parse
        );
        assert_eq!(Reason::Timeout { limit_ms: 10 }.category(), ReasonCategory::Execution);
        assert_eq!(
            Reason::MissingElement { name: "loop".into() }.category(),
            ReasonCategory::Violation
        );
        assert_eq!(Reason::Passed.category(), ReasonCategory::Success);
    }

    #[test]
    fn test_code_table_is_complete() {
        let samples = [
            Reason::NoGradingType,
            Reason::NoNumericResult,
            Reason::MissingShape { shape: "circle".into() },
            Reason::Passed,
        ];
        for reason in samples {
            assert!(Reason::CODES.contains(&reason.code()));
        }
        assert_eq!(Reason::CODES.len(), 23);
    }
}
