// src/checks.rs

//! Expectations for exercise fixtures.
//!
//! This module is responsible for:
//! - Describing what a fixture case expects from a grade
//! - Resolving dot-paths into JSON values
//! - Comparing expected vs actual grade output
//!
//! Every expectation field is optional; an empty expectation always holds.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::engine::GradeResult;

/// What a fixture case expects.
///
/// ```yaml
/// expect:
///   success: false
///   reasons: [missing_element]
///   feedback_contains: [loop_repeat]
///   fields:
///     reasons.0.name: loop_repeat
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Expectation {
    pub success: Option<bool>,

    /// Reason codes, in the order the grader reports them.
    pub reasons: Option<Vec<String>>,

    pub feedback_contains: Vec<String>,

    /// Dot-path into the serialized grade result → expected JSON value.
    pub fields: BTreeMap<String, Value>,
}

/// Resolve a dot-path into a JSON value.
///
/// Supports:
/// - Object keys: "reasons.0.code"
/// - Array indices: "reasons.1"
///
/// Returns `None` if the path cannot be resolved.
pub fn get_by_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;

    for segment in path.split('.') {
        if segment.is_empty() {
            return None;
        }

        // Try array index first
        if let Ok(index) = segment.parse::<usize>() {
            current = current.get(index)?;
        } else {
            current = current.get(segment)?;
        }
    }

    Some(current)
}

/// Apply dot-path field assertions to a JSON value.
///
/// Fails on the first mismatch found.
pub fn assert_fields(actual: &Value, fields: &BTreeMap<String, Value>) -> Result<()> {
    for (path, expected) in fields {
        let actual_value = get_by_path(actual, path)
            .ok_or_else(|| anyhow::anyhow!("Field path not found: {}", path))?;

        if actual_value != expected {
            bail!(
                "Field '{}': expected {}, got {}",
                path,
                serde_json::to_string(expected).unwrap_or_else(|_| "<expected>".to_string()),
                serde_json::to_string(actual_value).unwrap_or_else(|_| "<actual>".to_string()),
            );
        }
    }

    Ok(())
}

/// Check a grade against an expectation; returns every failed check.
pub fn check_expectation(result: &GradeResult, expect: &Expectation) -> Vec<String> {
    let mut failures = Vec::new();

    if let Some(success) = expect.success {
        if result.success != success {
            failures.push(format!(
                "expected success = {}, got {} ({})",
                success,
                result.success,
                result.feedback.replace('\n', "; ")
            ));
        }
    }

    if let Some(codes) = &expect.reasons {
        let actual: Vec<&str> = result.reasons.iter().map(|r| r.code()).collect();
        if actual != codes.iter().map(String::as_str).collect::<Vec<_>>() {
            failures.push(format!("expected reasons {:?}, got {:?}", codes, actual));
        }
    }

    let feedback = result.feedback.to_lowercase();
    for needle in &expect.feedback_contains {
        if !feedback.contains(&needle.to_lowercase()) {
            failures.push(format!("feedback does not mention '{}'", needle));
        }
    }

    if !expect.fields.is_empty() {
        let json = serde_json::to_value(result).unwrap_or(Value::Null);
        if let Err(e) = assert_fields(&json, &expect.fields) {
            failures.push(e.to_string());
        }
    }

    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Reason;
    use serde_json::json;

    fn missing_loop() -> GradeResult {
        GradeResult::fail(vec![Reason::MissingElement {
            name: "loop_repeat".into(),
        }])
    }

    #[test]
    fn test_get_by_path() {
        let v = json!({ "reasons": [{ "code": "timeout", "limit_ms": 10 }] });
        assert_eq!(get_by_path(&v, "reasons.0.limit_ms"), Some(&json!(10)));
        assert_eq!(get_by_path(&v, "reasons.1"), None);
        assert_eq!(get_by_path(&v, "reasons..code"), None);
    }

    #[test]
    fn test_empty_expectation_holds() {
        assert!(check_expectation(&missing_loop(), &Expectation::default()).is_empty());
    }

    #[test]
    fn test_all_checks_report() {
        let expect: Expectation = serde_yaml::from_str(
            r#"
success: true
reasons: [passed]
feedback_contains: [forever]
fields:
  reasons.0.name: loop_forever
"#,
        )
        .unwrap();

        let failures = check_expectation(&missing_loop(), &expect);
        assert_eq!(failures.len(), 4, "{failures:?}");
    }

    #[test]
    fn test_matching_expectation() {
        let expect: Expectation = serde_yaml::from_str(
            r#"
success: false
reasons: [missing_element]
feedback_contains: [LOOP_REPEAT]
fields:
  reasons.0.name: loop_repeat
"#,
        )
        .unwrap();

        assert!(check_expectation(&missing_loop(), &expect).is_empty());
    }
}
