// src/runner.rs

use crate::checks::{check_expectation, Expectation};
use crate::cli::{Cli, Command};
use crate::config::{Config, OutputMode, DEFAULT_CONFIG_FILE};
use crate::engine::{GradeResult, Grader};
use crate::feedback::Catalog;
use crate::grade_id::GradeId;
use crate::rules::{normalize, normalize_str};
use crate::sandbox::Executor;
use crate::submission::SubmissionPayload;
use crate::util::{ensure_dir, read_json, read_to_string, resolve_relative_to, sha256_hex};

use anyhow::{bail, Context, Result};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};

/// Entry point from `main.rs`.
pub async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;

    match cli.command {
        Command::Init { language } => init_scaffold(language),

        Command::Grade {
            rules,
            submission,
            watch,
            timeout_ms,
            memory_mb,
            output,
        } => {
            let mut cfg = Config::load_or_default(&config_path)?;

            // CLI overrides
            if let Some(ms) = timeout_ms {
                cfg.limits.timeout_ms = ms;
            }
            if memory_mb.is_some() {
                cfg.limits.memory_mb = memory_mb;
            }
            if let Some(mode) = output {
                cfg.output.mode = mode;
            }
            ensure_valid(&cfg)?;

            if watch {
                grade_with_watch(&cfg, &rules, &submission).await
            } else {
                let grader = Grader::new(cfg.sandbox());
                let envelope = grade_files(&grader, &cfg.catalog(), &rules, &submission).await?;
                emit(&cfg, &envelope)?;

                if !envelope.ok {
                    bail!("Submission did not pass");
                }
                Ok(())
            }
        }

        Command::Normalize { rules } => {
            let record = normalize_str(&read_to_string(&rules)?);
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }

        Command::Test { dir } => {
            let cfg = Config::load_or_default(&config_path)?;
            run_test_mode(&cfg, &dir).await
        }

        Command::Serve { addr } => {
            let cfg = Config::load_or_default(&config_path)?;
            let addr = addr.unwrap_or_else(|| cfg.server.addr.clone());
            crate::server::serve(cfg, &addr).await
        }
    }
}

fn ensure_valid(cfg: &Config) -> Result<()> {
    let issues = cfg.validate();
    if !issues.is_valid() {
        for issue in &issues.errors {
            eprintln!("✖ {}: {}", issue.code, issue.message);
        }
        bail!("Invalid configuration");
    }
    Ok(())
}

/* ---------------- grading ---------------- */

/// Machine-readable result of one CLI grade.
#[derive(Debug, Serialize)]
pub struct GradeEnvelope {
    pub ok: bool,
    pub meta: GradeMeta,
    pub result: GradeResult,
}

#[derive(Debug, Serialize)]
pub struct GradeMeta {
    pub grade_id: GradeId,
    pub graded_at: String,
    pub submission_digest: String,
    pub duration_ms: u64,
}

/// Grade raw JSON rules against a raw JSON submission.
pub async fn grade_values<E: Executor>(
    grader: &Grader<E>,
    catalog: &Catalog,
    rules: &Value,
    submission: &Value,
) -> Result<GradeEnvelope> {
    let payload: SubmissionPayload = serde_json::from_value(submission.clone())
        .context("Submission is not a valid payload")?;
    let rules = normalize(rules);

    let start = Instant::now();
    let result = grader.grade(&rules, &payload).await.localized(catalog);
    let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    Ok(GradeEnvelope {
        ok: result.success,
        meta: GradeMeta {
            grade_id: GradeId::new(),
            graded_at: chrono::Utc::now().to_rfc3339(),
            submission_digest: sha256_hex(&serde_json::to_vec(submission)?),
            duration_ms,
        },
        result,
    })
}

async fn grade_files<E: Executor>(
    grader: &Grader<E>,
    catalog: &Catalog,
    rules_path: &Path,
    submission_path: &Path,
) -> Result<GradeEnvelope> {
    // Rules may be stored double-encoded; the normalizer unwraps that.
    let rules = Value::String(read_to_string(rules_path)?);
    let submission = read_json(submission_path)?;

    grade_values(grader, catalog, &rules, &submission).await
}

/* ---------------- output ---------------- */

fn emit(cfg: &Config, envelope: &GradeEnvelope) -> Result<()> {
    match cfg.output.mode {
        OutputMode::File => {
            let path = cfg
                .output
                .file
                .as_ref()
                .context("output.file must be set when output.mode = file")?;
            write_output_file(Path::new(path), &serde_json::to_value(envelope)?)
        }
        mode => {
            println!("{}", render_output(mode, envelope, should_use_color())?);
            Ok(())
        }
    }
}

fn render_output(mode: OutputMode, envelope: &GradeEnvelope, use_color: bool) -> Result<String> {
    match mode {
        OutputMode::Stdout => {
            serde_json::to_string(envelope).context("Failed to format output as JSON")
        }
        OutputMode::Pretty => {
            serde_json::to_string_pretty(envelope).context("Failed to format output as pretty JSON")
        }
        OutputMode::Simple => Ok(format_simple_output(envelope, use_color)),
        OutputMode::File => bail!("output.mode = file should be handled separately"),
    }
}

fn format_simple_output(envelope: &GradeEnvelope, use_color: bool) -> String {
    let ok = envelope.ok;
    let status = paint(if ok { "PASS" } else { "FAIL" }, if ok { "32" } else { "31" }, use_color);

    let mut out = String::new();
    out.push_str(&format!("{} {}\n", status, envelope.meta.grade_id));
    out.push_str(&format!("time: {}ms\n", envelope.meta.duration_ms));
    if let Some(score) = envelope.result.score {
        out.push_str(&format!("score: {}\n", score));
    }

    out.push_str("feedback:\n");
    for line in envelope.result.feedback.lines() {
        out.push_str(&format!("- {}\n", line));
    }

    out.trim_end().to_string()
}

fn should_use_color() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    std::io::stdout().is_terminal()
}

fn paint(text: &str, color: &str, use_color: bool) -> String {
    if use_color {
        format!("\x1b[{}m{}\x1b[0m", color, text)
    } else {
        text.to_string()
    }
}

fn write_output_file(path: &Path, payload: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_dir(parent)?;
        }
    }

    let bytes = serde_json::to_vec_pretty(payload).context("Failed to serialize output JSON")?;

    std::fs::write(path, bytes).with_context(|| format!("Failed to write output file {:?}", path))?;

    Ok(())
}

/* ---------------- watch mode ---------------- */

async fn grade_with_watch(cfg: &Config, rules: &Path, submission: &Path) -> Result<()> {
    let (tx, rx) = channel();

    let mut watcher: RecommendedWatcher =
        Watcher::new(tx, notify::Config::default()).context("Failed to initialise file watcher")?;

    watcher.watch(rules, RecursiveMode::NonRecursive)?;
    watcher.watch(submission, RecursiveMode::NonRecursive)?;

    // One sandbox for the whole session so runtime checks are reused.
    let grader = Grader::new(cfg.sandbox());
    let catalog = cfg.catalog();

    loop {
        clear_screen();

        match grade_files(&grader, &catalog, rules, submission).await {
            Ok(envelope) => {
                if let Err(e) = emit(cfg, &envelope) {
                    eprintln!("Error: {e:#}");
                }
            }
            Err(e) => eprintln!("Error: {e:#}"),
        }

        // Block until something changes, then let editor save bursts settle.
        if tokio::task::block_in_place(|| rx.recv()).is_err() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        while rx.try_recv().is_ok() {}
    }
}

fn clear_screen() {
    print!("\x1b[2J\x1b[H");
    let _ = std::io::stdout().flush();
}

/* ---------------- test mode (CI-first) ---------------- */

/// An exercise fixture: one rule record plus graded cases.
///
/// ```yaml
/// name: sum
/// rules: { grading_type: numeric, expected_answer: 4 }
/// cases:
///   - name: typed answer
///     submission: { answer: "4" }
///     expect: { success: true }
/// ```
#[derive(Debug, Deserialize)]
pub struct ExerciseFixture {
    #[serde(default)]
    pub name: Option<String>,

    /// Inline rules (any accepted spelling).
    #[serde(default)]
    pub rules: Option<Value>,

    /// Rules JSON file, relative to the fixture.
    #[serde(default)]
    pub rules_file: Option<String>,

    #[serde(default)]
    pub cases: Vec<FixtureCase>,
}

#[derive(Debug, Deserialize)]
pub struct FixtureCase {
    pub name: String,

    #[serde(default)]
    pub submission: Option<Value>,

    /// Submission JSON file, relative to the fixture.
    #[serde(default)]
    pub submission_file: Option<String>,

    #[serde(default)]
    pub expect: Expectation,
}

#[derive(Debug, Serialize)]
pub struct CaseReport {
    pub name: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct FixtureReport {
    pub fixture: String,
    pub ok: bool,
    pub cases: Vec<CaseReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn run_test_mode(cfg: &Config, dir: &Path) -> Result<()> {
    let fixtures = discover_fixtures(dir)?;
    let grader = Grader::new(cfg.sandbox());
    let catalog = cfg.catalog();

    let mut reports = Vec::new();
    for path in &fixtures {
        reports.push(run_fixture(&grader, &catalog, path).await);
    }

    let ok = reports.iter().all(|r| r.ok);

    // CI JSON emitter: always print one stable JSON blob in test mode.
    let out = serde_json::json!({
        "ok": ok,
        "results": reports,
    });
    println!("{}", serde_json::to_string(&out)?);

    if !ok {
        bail!("One or more exercise cases failed");
    }

    Ok(())
}

fn discover_fixtures(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut fixtures = Vec::new();

    for entry in walkdir::WalkDir::new(dir) {
        let entry = entry?;
        let is_fixture = entry.file_type().is_file()
            && entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.ends_with(".exercise.yaml"));
        if is_fixture {
            fixtures.push(entry.path().to_path_buf());
        }
    }

    if fixtures.is_empty() {
        bail!("No *.exercise.yaml files found under {:?}", dir);
    }

    // Stable ordering is nice in CI
    fixtures.sort();
    Ok(fixtures)
}

/// Grade every case of one fixture. Load errors fail the fixture instead of
/// aborting the whole run.
pub async fn run_fixture<E: Executor>(grader: &Grader<E>, catalog: &Catalog, path: &Path) -> FixtureReport {
    let label = path.display().to_string();

    match load_fixture(path) {
        Ok((fixture, rules)) => {
            let mut cases = Vec::new();
            for case in &fixture.cases {
                cases.push(run_case(grader, catalog, path, &rules, case).await);
            }
            let ok = !cases.is_empty() && cases.iter().all(|c| c.ok);
            if cases.is_empty() {
                tracing::warn!(fixture = %label, "fixture has no cases");
            }

            FixtureReport {
                fixture: fixture.name.unwrap_or(label),
                ok,
                cases,
                error: None,
            }
        }
        Err(e) => FixtureReport {
            fixture: label,
            ok: false,
            cases: Vec::new(),
            error: Some(format!("{e:#}")),
        },
    }
}

fn load_fixture(path: &Path) -> Result<(ExerciseFixture, Value)> {
    let fixture: ExerciseFixture = serde_yaml::from_str(&read_to_string(path)?)
        .with_context(|| format!("Fixture is not valid YAML: {:?}", path))?;

    let rules = match (&fixture.rules, &fixture.rules_file) {
        (Some(inline), _) => inline.clone(),
        (None, Some(file)) => Value::String(read_to_string(&resolve_relative_to(path, file))?),
        (None, None) => bail!("Fixture {:?} defines neither rules nor rules_file", path),
    };

    Ok((fixture, rules))
}

async fn run_case<E: Executor>(
    grader: &Grader<E>,
    catalog: &Catalog,
    fixture_path: &Path,
    rules: &Value,
    case: &FixtureCase,
) -> CaseReport {
    let submission = match (&case.submission, &case.submission_file) {
        (Some(inline), _) => Ok(inline.clone()),
        (None, Some(file)) => read_json(&resolve_relative_to(fixture_path, file)),
        (None, None) => Ok(Value::Object(Default::default())),
    };

    let graded = match submission {
        Ok(submission) => grade_values(grader, catalog, rules, &submission).await,
        Err(e) => Err(e),
    };

    let failures = match graded {
        Ok(envelope) => check_expectation(&envelope.result, &case.expect),
        Err(e) => vec![format!("{e:#}")],
    };

    CaseReport {
        name: case.name.clone(),
        ok: failures.is_empty(),
        failures,
    }
}

/* ---------------- init ---------------- */

fn init_scaffold(language: Option<String>) -> Result<()> {
    write_if_missing(Path::new(DEFAULT_CONFIG_FILE), default_config_yaml())?;

    ensure_dir(Path::new("exercises"))?;
    write_if_missing(Path::new("exercises/sum.exercise.yaml"), default_exercise_yaml())?;

    if let Some(lang) = language {
        ensure_dir(Path::new("solutions"))?;
        match lang.to_lowercase().as_str() {
            "js" | "javascript" => write_if_missing(Path::new("solutions/sum.js"), "console.log(2 + 2);\n")?,
            "python" | "py" => write_if_missing(Path::new("solutions/sum.py"), "print(2 + 2)\n")?,
            other => eprintln!("Unknown language {:?} (skipping solution scaffold)", other),
        }
    }

    Ok(())
}

fn write_if_missing(path: &Path, contents: &str) -> Result<()> {
    if path.exists() {
        eprintln!("{} already exists (skipping)", path.display());
        return Ok(());
    }
    std::fs::write(path, contents).with_context(|| format!("Failed to write {:?}", path))?;
    eprintln!("Created {}", path.display());
    Ok(())
}

fn default_config_yaml() -> &'static str {
    r#"runtime:
  node: node
  python: python3

limits:
  timeout_ms: 2000
  # memory_mb: 128
  max_output_lines: 500
  max_output_bytes: 1048576

output:
  mode: simple # simple | pretty | stdout | file
  # file: results.json

feedback:
  messages: {}
    # missing_element: "ohun ti o ku: {name}"

server:
  addr: 127.0.0.1:8787
"#
}

fn default_exercise_yaml() -> &'static str {
    r#"name: sum
rules:
  gradingType: numeric
  expectedAnswer: "4"
cases:
  - name: typed answer
    submission:
      answer: "4.0"
    expect:
      success: true

  - name: wrong answer
    submission:
      answer: "5"
    expect:
      success: false
      reasons: [numeric_mismatch]

  - name: printed by code
    submission:
      student_code: "console.log(2 + 2)"
      language: javascript
    expect:
      success: true
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{Limits, Runtimes, Sandbox};
    use serde_json::json;

    /// Interpreters that never exist, so nothing here depends on the host.
    fn offline_grader() -> Grader<Sandbox> {
        Grader::new(Sandbox::new(
            Runtimes {
                node: "blockgrade-test-no-node".into(),
                python: "blockgrade-test-no-python".into(),
            },
            Limits::default(),
        ))
    }

    #[tokio::test]
    async fn test_envelope_meta() {
        let grader = offline_grader();
        let submission = json!({ "answer": "4" });
        let envelope = grade_values(
            &grader,
            &Catalog::base(),
            &json!({ "grading_type": "numeric", "expected_answer": 4 }),
            &submission,
        )
        .await
        .unwrap();

        assert!(envelope.ok);
        assert!(envelope.meta.grade_id.0.starts_with("grade_"));
        assert_eq!(
            envelope.meta.submission_digest,
            sha256_hex(&serde_json::to_vec(&submission).unwrap())
        );
        assert!(chrono::DateTime::parse_from_rfc3339(&envelope.meta.graded_at).is_ok());
    }

    #[tokio::test]
    async fn test_code_without_runtime_is_not_ready() {
        let grader = offline_grader();
        let envelope = grade_values(
            &grader,
            &Catalog::base(),
            &json!({ "grading_type": "numeric", "expected_answer": 4 }),
            &json!({ "student_code": "console.log(4)" }),
        )
        .await
        .unwrap();

        assert!(!envelope.ok);
        assert!(envelope.result.has_reason("runtime_not_ready"));
    }

    #[tokio::test]
    async fn test_bad_submission_is_an_error() {
        let grader = offline_grader();
        let err = grade_values(&grader, &Catalog::base(), &json!({}), &json!({ "language": "cobol" }))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("valid payload"));
    }

    #[test]
    fn test_simple_output() {
        let envelope = GradeEnvelope {
            ok: false,
            meta: GradeMeta {
                grade_id: GradeId("grade_x".into()),
                graded_at: "2026-01-01T00:00:00+00:00".into(),
                submission_digest: "d".into(),
                duration_ms: 7,
            },
            result: GradeResult::fail(vec![crate::engine::Reason::NothingDrawn]).with_score(0),
        };

        let out = format_simple_output(&envelope, false);
        assert_eq!(out, "FAIL grade_x\ntime: 7ms\nscore: 0\nfeedback:\n- nothing drawn");
        assert!(render_output(OutputMode::Stdout, &envelope, false)
            .unwrap()
            .starts_with("{\"ok\":false"));
    }

    #[tokio::test]
    async fn test_fixture_run() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("loops");
        std::fs::create_dir_all(&nested).unwrap();

        std::fs::write(
            nested.join("rules.json"),
            r#"{"gradingType":"codeStructure","mustUse":"loop_repeat","maxBlocks":2}"#,
        )
        .unwrap();
        std::fs::write(
            nested.join("repeat.exercise.yaml"),
            r#"
rules_file: rules.json
cases:
  - name: uses the loop
    submission:
      student_markup: '<xml><block type="loop_repeat"></block></xml>'
    expect:
      success: true
  - name: too long
    submission:
      student_markup: ["move", "move", "move"]
    expect:
      success: false
      reasons: [missing_element, too_many_elements]
      feedback_contains: ["used 3"]
"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.exercise.yaml"), "cases: []\n").unwrap();

        let found = discover_fixtures(dir.path()).unwrap();
        assert_eq!(found.len(), 2);

        let grader = offline_grader();
        let report = run_fixture(&grader, &Catalog::base(), &nested.join("repeat.exercise.yaml")).await;
        assert!(report.ok, "{:?}", report.cases);
        assert_eq!(report.cases.len(), 2);

        let broken = run_fixture(&grader, &Catalog::base(), &dir.path().join("broken.exercise.yaml")).await;
        assert!(!broken.ok);
        assert!(broken.error.unwrap().contains("neither rules nor rules_file"));
    }

    #[tokio::test]
    async fn test_demo_fixtures_pass() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos");
        let grader = offline_grader();

        for path in discover_fixtures(&root).unwrap() {
            let report = run_fixture(&grader, &Catalog::base(), &path).await;
            assert!(report.ok, "{}: {:?} {:?}", report.fixture, report.cases, report.error);
        }
    }

    #[test]
    fn test_no_fixtures_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_fixtures(dir.path()).is_err());
    }

    #[test]
    fn test_scaffold_parses() {
        let cfg = Config::from_yaml(default_config_yaml()).unwrap();
        assert_eq!(cfg.output.mode, OutputMode::Simple);

        let fixture: ExerciseFixture = serde_yaml::from_str(default_exercise_yaml()).unwrap();
        assert_eq!(fixture.cases.len(), 3);
        assert_eq!(normalize(fixture.rules.as_ref().unwrap()).expected_answer(), Some("4"));
    }
}
