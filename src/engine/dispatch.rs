// src/engine/dispatch.rs

//! Grading-type dispatch.
//!
//! One strategy per grading type:
//!
//! | type             | input                         | check                               |
//! |------------------|-------------------------------|-------------------------------------|
//! | `numeric`        | code output / typed answer    | [`scalar::numeric`]                 |
//! | `string`         | code output / typed answer    | [`scalar::text`]                    |
//! | `boolean`        | code output / typed answer    | [`scalar::boolean`]                 |
//! | `behavior`       | markup (required) + clean run | [`structure::check`]                |
//! | `code_structure` | markup, else code tokens      | [`structure::check`]                |
//! | `must_use`       | code tokens, else markup      | [`structure::presence`]             |
//! | `drawing`        | canvas objects                | [`drawing::validate`]               |
//!
//! Every path ends in a [`GradeResult`]; nothing here returns an error or
//! panics on student input.

use crate::engine::{drawing, scalar, structure, GradeResult, Reason};
use crate::rules::{GradingType, ValidationRules};
use crate::sandbox::{ExecError, Executor};
use crate::sinks::CollectingSink;
use crate::submission::SubmissionPayload;

/// Grades submissions with a given executor for student code.
#[derive(Debug)]
pub struct Grader<E> {
    executor: E,
}

impl<E: Executor> Grader<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(grading_type = rules.grading_type.map(|t| t.as_str()))
    )]
    pub async fn grade(&self, rules: &ValidationRules, submission: &SubmissionPayload) -> GradeResult {
        let Some(kind) = rules.grading_type else {
            tracing::debug!("no grading type configured");
            return GradeResult::fail(vec![Reason::NoGradingType]);
        };

        let result = match kind {
            GradingType::Numeric | GradingType::String | GradingType::Boolean => {
                self.grade_scalar(rules, kind, submission).await
            }
            GradingType::Behavior => self.grade_behavior(rules, submission).await,
            GradingType::CodeStructure => grade_code_structure(rules, submission),
            GradingType::MustUse => grade_must_use(rules, submission),
            GradingType::Drawing => drawing::validate(rules, &submission.drawing_objects),
        };

        tracing::info!(
            grading_type = kind.as_str(),
            success = result.success,
            reasons = ?result.reasons.iter().map(Reason::code).collect::<Vec<_>>(),
            "graded submission"
        );

        result
    }

    async fn grade_scalar(
        &self,
        rules: &ValidationRules,
        kind: GradingType,
        submission: &SubmissionPayload,
    ) -> GradeResult {
        // Configuration problems win over anything the student did.
        if let Err(reason) = scalar::expected_answer(rules, kind) {
            return GradeResult::fail(vec![reason]);
        }

        let actual = match submission.code() {
            Some(code) => match self.run(submission, code).await {
                Ok(answer) => answer,
                Err(e) => return GradeResult::fail(vec![e.into_reason()]),
            },
            None => submission.answer.clone(),
        };

        scalar::validate(rules, kind, actual.as_deref())
    }

    async fn grade_behavior(&self, rules: &ValidationRules, submission: &SubmissionPayload) -> GradeResult {
        let Some(markup) = submission.markup() else {
            return GradeResult::fail(vec![Reason::NoProgram]);
        };

        let blocks = match structure::parse_markup(markup) {
            Ok(blocks) => blocks,
            Err(detail) => return GradeResult::fail(vec![Reason::InvalidStructure { detail }]),
        };

        if let Some(code) = submission.code() {
            if let Err(e) = self.run(submission, code).await {
                return GradeResult::fail(vec![e.into_reason()]);
            }
        }

        GradeResult::from_violations(structure::check(rules, &blocks))
    }

    /// Run student code with a fresh sink; the answer is the last printed
    /// line. Runners print the completion value when nothing else was
    /// printed, so an expression-only program still has one.
    async fn run(&self, submission: &SubmissionPayload, code: &str) -> Result<Option<String>, ExecError> {
        let mut sink = CollectingSink::new();
        self.executor
            .execute(submission.language, code, &mut sink)
            .await?;

        Ok(sink.last_line().map(str::to_string))
    }
}

fn grade_code_structure(rules: &ValidationRules, submission: &SubmissionPayload) -> GradeResult {
    match (submission.markup(), submission.code()) {
        (Some(markup), _) => match structure::parse_markup(markup) {
            Ok(blocks) => GradeResult::from_violations(structure::check(rules, &blocks)),
            Err(detail) => GradeResult::fail(vec![Reason::InvalidStructure { detail }]),
        },
        (None, Some(code)) => {
            tracing::debug!("no markup submitted; checking code tokens");
            GradeResult::from_violations(structure::presence(rules, |token| {
                structure::contains_token(code, token)
            }))
        }
        (None, None) => GradeResult::fail(vec![Reason::NoProgram]),
    }
}

fn grade_must_use(rules: &ValidationRules, submission: &SubmissionPayload) -> GradeResult {
    let blocks = match submission.markup().map(structure::parse_markup) {
        Some(Ok(blocks)) => Some(blocks),
        Some(Err(detail)) => return GradeResult::fail(vec![Reason::InvalidStructure { detail }]),
        None => None,
    };

    let mut violations = match (submission.code(), &blocks) {
        (Some(code), _) => structure::presence(rules, |token| structure::contains_token(code, token)),
        (None, Some(blocks)) => structure::presence(rules, |kind| blocks.contains(kind)),
        (None, None) => return GradeResult::fail(vec![Reason::NoProgram]),
    };

    if let Some(blocks) = &blocks {
        violations.extend(structure::block_limit(rules, blocks));
    }

    GradeResult::from_violations(violations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::structure::BlockSet;
    use crate::rules::normalize;
    use crate::sandbox::Execution;
    use crate::sinks::OutputSink;
    use crate::submission::{DrawnObject, Language};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Executor that prints fixed lines or fails, and counts its calls.
    #[derive(Default)]
    struct ScriptedExecutor {
        lines: Vec<String>,
        fail_with: Option<fn() -> ExecError>,
        calls: AtomicUsize,
    }

    impl ScriptedExecutor {
        fn printing(lines: &[&str]) -> Self {
            Self {
                lines: lines.iter().map(|s| s.to_string()).collect(),
                ..Self::default()
            }
        }

        fn failing(make: fn() -> ExecError) -> Self {
            Self {
                fail_with: Some(make),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl Executor for ScriptedExecutor {
        async fn execute(
            &self,
            _language: Language,
            _source: &str,
            sink: &mut dyn OutputSink,
        ) -> Result<Execution, ExecError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(make) = self.fail_with {
                return Err(make());
            }
            for line in &self.lines {
                sink.line(line.clone());
            }
            Ok(Execution::default())
        }
    }

    fn code(src: &str) -> SubmissionPayload {
        SubmissionPayload {
            student_code: Some(src.to_string()),
            ..SubmissionPayload::default()
        }
    }

    fn markup(text: &str) -> SubmissionPayload {
        SubmissionPayload {
            student_markup: Some(Value::String(text.to_string())),
            ..SubmissionPayload::default()
        }
    }

    fn blocks_xml(kinds: &[&str]) -> String {
        let body: String = kinds
            .iter()
            .map(|k| format!(r#"<block type="{k}"></block>"#))
            .collect();
        format!("<xml>{body}</xml>")
    }

    #[tokio::test]
    async fn test_missing_grading_type() {
        let grader = Grader::new(ScriptedExecutor::default());
        let result = grader.grade(&normalize(&json!({})), &code("x")).await;
        assert!(!result.success);
        assert_eq!(result.feedback, "no grading type configured");
    }

    #[tokio::test]
    async fn test_numeric_uses_last_printed_line() {
        let grader = Grader::new(ScriptedExecutor::printing(&["1", "2", "4"]));
        let rules = normalize(&json!({ "grading_type": "numeric", "expected_answer": "4" }));

        assert!(grader.grade(&rules, &code("...")).await.success);
    }

    #[tokio::test]
    async fn test_unconfigured_numeric_never_runs_code() {
        let grader = Grader::new(ScriptedExecutor::printing(&["4"]));
        let rules = normalize(&json!({ "grading_type": "numeric", "expected_answer": "" }));

        for submission in [code("console.log(4)"), SubmissionPayload::default()] {
            let result = grader.grade(&rules, &submission).await;
            assert!(!result.success);
            assert_eq!(result.reasons, vec![Reason::NoExpectedAnswer]);
        }
        assert_eq!(grader.executor().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_typed_answer_without_code() {
        let grader = Grader::new(ScriptedExecutor::default());
        let rules = normalize(&json!({ "grading_type": "string", "expected_answer": "cat" }));
        let submission = SubmissionPayload {
            answer: Some("The cat sat".into()),
            ..SubmissionPayload::default()
        };

        assert!(grader.grade(&rules, &submission).await.success);
        assert_eq!(grader.executor().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_boolean_rejects_truthy_output() {
        let grader = Grader::new(ScriptedExecutor::printing(&["yes"]));
        let rules = normalize(&json!({ "grading_type": "boolean", "expected_answer": "true" }));

        let result = grader.grade(&rules, &code("...")).await;
        assert!(!result.success);
        assert!(result.has_reason("boolean_mismatch"));
    }

    #[tokio::test]
    async fn test_execution_errors_short_circuit() {
        let rules = normalize(&json!({ "grading_type": "numeric", "expected_answer": "4" }));

        let cases: [(fn() -> ExecError, &str); 4] = [
            (|| ExecError::Runtime("TypeError: x".into()), "execution_failed"),
            (|| ExecError::Syntax("SyntaxError: y".into()), "code_syntax"),
            (|| ExecError::Timeout { limit_ms: 2000 }, "timeout"),
            (
                || ExecError::RuntimeUnavailable {
                    runtime: "javascript".into(),
                    reason: "missing".into(),
                },
                "runtime_not_ready",
            ),
        ];

        for (make, code_name) in cases {
            let grader = Grader::new(ScriptedExecutor::failing(make));
            let result = grader.grade(&rules, &code("...")).await;
            assert!(!result.success);
            assert_eq!(result.reasons.len(), 1);
            assert!(result.has_reason(code_name), "{code_name}");
        }
    }

    #[tokio::test]
    async fn test_runtime_error_feedback() {
        let grader = Grader::new(ScriptedExecutor::failing(|| {
            ExecError::Runtime("ReferenceError: foo is not defined".into())
        }));
        let rules = normalize(&json!({ "grading_type": "string", "expected_answer": "hi" }));

        let result = grader.grade(&rules, &code("foo()")).await;
        assert_eq!(
            result.feedback,
            "could not run submitted code: ReferenceError: foo is not defined"
        );
    }

    #[tokio::test]
    async fn test_code_structure_must_use() {
        let grader = Grader::new(ScriptedExecutor::default());
        let rules = normalize(&json!({ "gradingType": "codeStructure", "mustUse": ["loop_repeat"] }));

        let missing = grader.grade(&rules, &markup(&blocks_xml(&["move_forward"]))).await;
        assert!(!missing.success);
        assert!(missing.feedback.contains("loop_repeat"));

        let present = grader
            .grade(&rules, &markup(&blocks_xml(&["move_forward", "loop_repeat"])))
            .await;
        assert!(present.success);
        assert_eq!(present.feedback, "all requirements met");
    }

    #[tokio::test]
    async fn test_code_structure_forbidden_and_max_blocks() {
        let grader = Grader::new(ScriptedExecutor::default());

        let forbidden = normalize(&json!({ "grading_type": "code_structure", "forbidden": "move_forward" }));
        let result = grader.grade(&forbidden, &markup(&blocks_xml(&["move_forward"]))).await;
        assert!(!result.success);
        assert!(result.feedback.contains("move_forward"));

        let limited = normalize(&json!({ "grading_type": "code_structure", "max_blocks": 3 }));
        let result = grader.grade(&limited, &markup(&blocks_xml(&["a", "b", "c", "d"]))).await;
        assert_eq!(result.reasons, vec![Reason::TooManyElements { used: 4, max: 3 }]);
        assert!(result.feedback.contains('4') && result.feedback.contains('3'));
    }

    #[tokio::test]
    async fn test_malformed_markup_is_not_a_rule_violation() {
        let grader = Grader::new(ScriptedExecutor::default());

        for kind in ["code_structure", "behavior", "must_use"] {
            let rules = normalize(&json!({ "grading_type": kind, "must_use": "loop_repeat" }));
            let result = grader.grade(&rules, &markup("<xml><block type='a'>")).await;
            assert!(!result.success);
            assert_eq!(result.reasons.len(), 1, "{kind}");
            assert!(result.has_reason("invalid_structure"), "{kind}");
        }
    }

    #[tokio::test]
    async fn test_code_structure_falls_back_to_tokens() {
        let grader = Grader::new(ScriptedExecutor::default());
        let rules = normalize(&json!({ "grading_type": "code_structure", "must_use": "for", "forbidden": "while" }));

        assert!(grader.grade(&rules, &code("for (;;) { break; }")).await.success);

        let result = grader.grade(&rules, &code("while (x) {}")).await;
        assert_eq!(result.reasons.len(), 2);

        let nothing = grader.grade(&rules, &SubmissionPayload::default()).await;
        assert_eq!(nothing.reasons, vec![Reason::NoProgram]);
    }

    #[tokio::test]
    async fn test_behavior_requires_a_clean_run() {
        let rules = normalize(&json!({ "grading_type": "behavior", "must_use": "loop_repeat" }));
        let mut submission = markup(&blocks_xml(&["loop_repeat"]));
        submission.student_code = Some("for(;;){}".into());

        let ok = Grader::new(ScriptedExecutor::printing(&["done"]));
        assert!(ok.grade(&rules, &submission).await.success);

        let hangs = Grader::new(ScriptedExecutor::failing(|| ExecError::Timeout { limit_ms: 50 }));
        let result = hangs.grade(&rules, &submission).await;
        assert_eq!(result.reasons, vec![Reason::Timeout { limit_ms: 50 }]);

        let no_markup = ok.grade(&rules, &code("x")).await;
        assert_eq!(no_markup.reasons, vec![Reason::NoProgram]);
    }

    #[tokio::test]
    async fn test_must_use_generic_tokens() {
        let grader = Grader::new(ScriptedExecutor::default());
        let rules = normalize(&json!({ "grading_type": "forbidden", "must_use": "print", "forbidden": "import" }));

        assert!(grader.grade(&rules, &code("print('hi')")).await.success);

        let result = grader.grade(&rules, &code("import os")).await;
        assert_eq!(
            result.reasons,
            vec![
                Reason::MissingElement { name: "print".into() },
                Reason::ForbiddenElement { name: "import".into() },
            ]
        );

        let blocks_only = grader.grade(&rules, &markup(&blocks_xml(&["print"]))).await;
        assert!(blocks_only.success);
    }

    #[tokio::test]
    async fn test_drawing_dispatch() {
        let grader = Grader::new(ScriptedExecutor::default());
        let rules = normalize(&json!({ "grading_type": "drawing", "requireShape": "circle", "requireColor": "red" }));
        let submission = SubmissionPayload {
            drawing_objects: vec![DrawnObject::new("circle").stroke("rgb(255,0,0)")],
            ..SubmissionPayload::default()
        };

        let result = grader.grade(&rules, &submission).await;
        assert!(result.success);
        assert_eq!(result.score, Some(50));

        let empty = grader.grade(&rules, &SubmissionPayload::default()).await;
        assert_eq!(empty.reasons, vec![Reason::NothingDrawn]);
    }

    #[tokio::test]
    async fn test_grading_is_idempotent() {
        let grader = Grader::new(ScriptedExecutor::default());
        let rules = normalize(&json!({ "grading_type": "code_structure", "must_use": "a,b", "max_blocks": 1 }));
        let submission = markup(&blocks_xml(&["a", "c"]));

        let first = grader.grade(&rules, &submission).await;
        let second = grader.grade(&rules, &submission).await;
        assert_eq!(first, second);
    }

    #[test]
    fn test_block_set_helper_matches_xml() {
        let xml = blocks_xml(&["a", "a"]);
        let parsed = structure::parse_markup(crate::submission::MarkupSource::Text(&xml)).unwrap();
        assert_eq!(parsed, BlockSet::from_kinds(["a", "a"]));
    }
}
