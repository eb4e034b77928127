// src/engine/scalar.rs

//! Numeric, string and boolean answer checks.
//!
//! Each check receives the configured expected answer and the student's
//! actual answer (typed directly or taken from executed code output).
//! Scalar grading compares one value, so a failure carries exactly one
//! reason.
//!
//! Policies:
//! - numeric: both sides parsed as finite `f64`, compared exactly
//!   (`4` == `4.0`, `4` != `4.01`)
//! - string: case-insensitive containment (`"The cat sat"` contains `"cat"`)
//! - boolean: literal `true`/`false` tokens only, no truthiness

use crate::engine::{GradeResult, Reason};
use crate::rules::{GradingType, ValidationRules};

/// Check that a scalar exercise has a usable expected answer.
///
/// Runs before any student code so an unconfigured exercise fails the same
/// way for every submission.
pub fn expected_answer(rules: &ValidationRules, kind: GradingType) -> Result<&str, Reason> {
    let expected = rules.expected_answer().ok_or(Reason::NoExpectedAnswer)?;

    let usable = match kind {
        GradingType::Numeric => parse_number(expected).is_some(),
        GradingType::Boolean => parse_bool(expected).is_some(),
        _ => true,
    };

    if usable {
        Ok(expected)
    } else {
        Err(Reason::InvalidExpectedAnswer {
            expected: expected.to_string(),
        })
    }
}

/// Grade a scalar answer. `kind` must be a scalar grading type.
pub fn validate(rules: &ValidationRules, kind: GradingType, actual: Option<&str>) -> GradeResult {
    let expected = match expected_answer(rules, kind) {
        Ok(e) => e,
        Err(reason) => return GradeResult::fail(vec![reason]),
    };

    match kind {
        GradingType::Numeric => numeric(expected, actual),
        GradingType::Boolean => boolean(expected, actual),
        _ => text(expected, actual),
    }
}

pub fn numeric(expected: &str, actual: Option<&str>) -> GradeResult {
    let Some(want) = parse_number(expected) else {
        return GradeResult::fail(vec![Reason::InvalidExpectedAnswer {
            expected: expected.to_string(),
        }]);
    };

    let Some(raw) = actual.map(str::trim).filter(|s| !s.is_empty()) else {
        return GradeResult::fail(vec![Reason::NoNumericResult]);
    };

    let Some(got) = parse_number(raw) else {
        return GradeResult::fail(vec![Reason::NoNumericResult]);
    };

    if got == want {
        GradeResult::pass()
    } else {
        GradeResult::fail(vec![Reason::NumericMismatch {
            expected: expected.trim().to_string(),
            actual: raw.to_string(),
        }])
    }
}

pub fn text(expected: &str, actual: Option<&str>) -> GradeResult {
    let Some(raw) = actual.map(str::trim).filter(|s| !s.is_empty()) else {
        return GradeResult::fail(vec![Reason::NoAnswer]);
    };

    let want = expected.trim().to_lowercase();

    if raw.to_lowercase().contains(&want) {
        GradeResult::pass()
    } else {
        GradeResult::fail(vec![Reason::TextMismatch {
            expected: expected.trim().to_string(),
            actual: raw.to_string(),
        }])
    }
}

pub fn boolean(expected: &str, actual: Option<&str>) -> GradeResult {
    let Some(want) = parse_bool(expected) else {
        return GradeResult::fail(vec![Reason::InvalidExpectedAnswer {
            expected: expected.to_string(),
        }]);
    };

    let Some(raw) = actual.map(str::trim).filter(|s| !s.is_empty()) else {
        return GradeResult::fail(vec![Reason::NoAnswer]);
    };

    if parse_bool(raw) == Some(want) {
        GradeResult::pass()
    } else {
        GradeResult::fail(vec![Reason::BooleanMismatch {
            expected: want.to_string(),
            actual: raw.to_string(),
        }])
    }
}

/// Parse a finite number. `NaN` and infinities are never numeric results.
pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();

    // f64's parser accepts "inf", "NaN", "infinity"; only digits count here.
    if !trimmed.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }

    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(kind: GradingType, expected: Option<&str>) -> ValidationRules {
        ValidationRules {
            grading_type: Some(kind),
            expected_answer: expected.map(str::to_string),
            ..ValidationRules::default()
        }
    }

    #[test]
    fn test_numeric_exact_match() {
        let r = rules(GradingType::Numeric, Some("4"));
        assert!(validate(&r, GradingType::Numeric, Some("4")).success);
        assert!(validate(&r, GradingType::Numeric, Some(" 4\n")).success);
    }

    #[test]
    fn test_numeric_coercion_policy() {
        let r = rules(GradingType::Numeric, Some("4"));
        assert!(validate(&r, GradingType::Numeric, Some("4.0")).success);

        let off = validate(&r, GradingType::Numeric, Some("4.01"));
        assert!(!off.success);
        assert_eq!(
            off.reasons,
            vec![Reason::NumericMismatch {
                expected: "4".into(),
                actual: "4.01".into()
            }]
        );
    }

    #[test]
    fn test_numeric_without_result() {
        let r = rules(GradingType::Numeric, Some("4"));
        for actual in [None, Some(""), Some("four"), Some("NaN"), Some("inf")] {
            let result = validate(&r, GradingType::Numeric, actual);
            assert!(!result.success);
            assert_eq!(result.reasons, vec![Reason::NoNumericResult]);
        }
    }

    #[test]
    fn test_nan_expected_is_not_a_free_pass() {
        let r = rules(GradingType::Numeric, Some("NaN"));
        let result = validate(&r, GradingType::Numeric, Some("NaN"));
        assert!(!result.success);
        assert!(result.has_reason("invalid_expected_answer"));
    }

    #[test]
    fn test_unconfigured_numeric_always_fails() {
        for expected in [None, Some(""), Some("   ")] {
            let r = rules(GradingType::Numeric, expected);
            for actual in [None, Some(""), Some("4")] {
                let result = validate(&r, GradingType::Numeric, actual);
                assert!(!result.success);
                assert_eq!(result.reasons, vec![Reason::NoExpectedAnswer]);
                assert_eq!(result.feedback, "no expected answer configured");
            }
        }
    }

    #[test]
    fn test_string_containment_ignores_case() {
        let r = rules(GradingType::String, Some("cat"));
        assert!(validate(&r, GradingType::String, Some("The cat sat")).success);
        assert!(validate(&r, GradingType::String, Some("CAT")).success);

        let result = validate(&r, GradingType::String, Some("The dog sat"));
        assert!(!result.success);
        assert!(result.has_reason("text_mismatch"));
    }

    #[test]
    fn test_string_with_empty_answer() {
        let r = rules(GradingType::String, Some("cat"));
        let result = validate(&r, GradingType::String, Some("  "));
        assert_eq!(result.reasons, vec![Reason::NoAnswer]);
    }

    #[test]
    fn test_boolean_is_strict() {
        let r = rules(GradingType::Boolean, Some("true"));
        assert!(validate(&r, GradingType::Boolean, Some("TRUE")).success);
        assert!(validate(&r, GradingType::Boolean, Some("True")).success);

        for actual in ["yes", "1", "false"] {
            let result = validate(&r, GradingType::Boolean, Some(actual));
            assert!(!result.success, "{actual} must not pass");
            assert!(result.has_reason("boolean_mismatch"));
        }
    }

    #[test]
    fn test_boolean_rejects_non_boolean_expected() {
        let r = rules(GradingType::Boolean, Some("yes"));
        let result = validate(&r, GradingType::Boolean, Some("yes"));
        assert!(!result.success);
        assert!(result.has_reason("invalid_expected_answer"));
    }
}
