// src/feedback.rs

//! Feedback formatting.
//!
//! A [`Catalog`] maps reason codes to message templates. Templates use
//! `{param}` placeholders filled from [`Reason::params`].
//!
//! The built-in catalog is the base language (English). Deployments
//! override individual codes from `blockgrade.yaml` to serve other
//! languages (the lesson UI ships English and Yorùbá).

use std::collections::BTreeMap;

use crate::engine::reason::Reason;

const BASE_MESSAGES: &[(&str, &str)] = &[
    ("no_grading_type", "no grading type configured"),
    ("no_expected_answer", "no expected answer configured"),
    ("invalid_expected_answer", "this exercise isn't set up correctly: expected answer '{expected}' cannot be used"),
    ("invalid_rule_color", "this exercise isn't set up correctly: unknown color '{color}'"),
    ("no_program", "no program submitted"),
    ("invalid_structure", "invalid program structure: {detail}"),
    ("code_syntax", "your code has a syntax error: {detail}"),
    ("runtime_not_ready", "the {runtime} runtime is not ready yet, please try again"),
    ("execution_failed", "could not run submitted code: {detail}"),
    ("timeout", "could not run submitted code: stopped after {limit_ms}ms"),
    ("memory_exceeded", "could not run submitted code: used {used_mb}MB, limit {limit_mb}MB"),
    ("no_numeric_result", "no numeric result produced"),
    ("no_answer", "no answer produced"),
    ("numeric_mismatch", "expected {expected}, got {actual}"),
    ("text_mismatch", "expected an answer containing '{expected}', got '{actual}'"),
    ("boolean_mismatch", "expected {expected}, got '{actual}'"),
    ("missing_element", "missing required element: {name}"),
    ("forbidden_element", "forbidden element used: {name}"),
    ("too_many_elements", "too many elements: used {used}, max {max}"),
    ("nothing_drawn", "nothing drawn"),
    ("missing_shape", "missing shape: {shape}"),
    ("missing_color", "missing color: {color}"),
    ("passed", "all requirements met"),
];

/// Message templates keyed by reason code.
#[derive(Debug, Clone)]
pub struct Catalog {
    messages: BTreeMap<String, String>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::base()
    }
}

impl Catalog {
    /// The base-language catalog.
    pub fn base() -> Self {
        Self {
            messages: BASE_MESSAGES
                .iter()
                .map(|(code, tpl)| (code.to_string(), tpl.to_string()))
                .collect(),
        }
    }

    /// Base catalog with per-code overrides applied.
    pub fn with_overrides(overrides: &BTreeMap<String, String>) -> Self {
        let mut catalog = Self::base();
        for (code, tpl) in overrides {
            catalog.messages.insert(code.clone(), tpl.clone());
        }
        catalog
    }

    pub fn render(&self, reason: &Reason) -> String {
        let code = reason.code();

        match self.messages.get(code) {
            Some(tpl) => {
                let params = reason.params();
                let pairs: Vec<(&str, &str)> =
                    params.iter().map(|(k, v)| (*k, v.as_str())).collect();
                fill_template(tpl, &pairs)
            }
            None => code.replace('_', " "),
        }
    }

    /// Render every reason, one per line.
    pub fn format(&self, reasons: &[Reason]) -> String {
        reasons
            .iter()
            .map(|r| self.render(r))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Replace `{key}` placeholders with the provided values in one
/// left-to-right pass. Inserted values are never scanned again, and
/// unknown placeholders stay as written.
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(tpl.len());
    let mut rest = tpl;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let value = after.find('}').and_then(|close| {
            let key = &after[..close];
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v, close))
        });

        match value {
            Some((v, close)) => {
                out.push_str(v);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_catalog_covers_every_code() {
        let catalog = Catalog::base();
        for code in Reason::CODES {
            assert!(catalog.messages.contains_key(*code), "missing message for {code}");
        }
    }

    #[test]
    fn test_render_fills_params() {
        let catalog = Catalog::base();
        assert_eq!(
            catalog.render(&Reason::TooManyElements { used: 4, max: 3 }),
            "too many elements: used 4, max 3"
        );
        assert_eq!(
            catalog.render(&Reason::MissingElement { name: "loop_repeat".into() }),
            "missing required element: loop_repeat"
        );
    }

    #[test]
    fn test_values_are_not_substituted_twice() {
        let catalog = Catalog::base();
        assert_eq!(
            catalog.render(&Reason::NumericMismatch {
                expected: "4".into(),
                actual: "{expected}".into(),
            }),
            "expected 4, got {expected}"
        );

        assert_eq!(
            fill_template("{a} and {b}", &[("a", "{b}"), ("b", "x")]),
            "{b} and x"
        );
        assert_eq!(fill_template("{unknown} {a} {", &[("a", "1")]), "{unknown} 1 {");
        assert_eq!(fill_template("{{a}}", &[("a", "1")]), "{1}");
    }

    #[test]
    fn test_format_joins_with_newlines() {
        let text = Catalog::base().format(&[
            Reason::MissingShape { shape: "circle".into() },
            Reason::MissingColor { color: "red".into() },
        ]);
        assert_eq!(text, "missing shape: circle\nmissing color: red");
    }

    #[test]
    fn test_overrides_replace_single_codes() {
        let mut overrides = BTreeMap::new();
        overrides.insert("passed".to_string(), "O dára!".to_string());

        let catalog = Catalog::with_overrides(&overrides);
        assert_eq!(catalog.render(&Reason::Passed), "O dára!");
        assert_eq!(catalog.render(&Reason::NothingDrawn), "nothing drawn");
    }
}
