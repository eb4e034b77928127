// src/sandbox/mod.rs

//! Sandboxed execution of student code.
//!
//! Each call spawns a fresh interpreter process on a runner script (see
//! [`shim`]) inside its own temp directory, with a cleared environment and
//! no stdin. The process boundary is the isolation boundary: nothing the
//! child writes is parsed as a report. Its STDOUT is the printed output,
//! and the outcome comes from the exit status plus the last STDERR line.
//!
//! Containment:
//! - Node runs under its permission model when the interpreter has one
//!   (`--permission`, or `--experimental-permission` on Node 20/21),
//!   readable files limited to the runner itself
//! - Python runs isolated (`-I -S -B`) behind an audit hook (see
//!   [`shim::python_runner`])
//!
//! Budgets:
//! - wall clock: Node's `vm` timeout where it applies; for every language
//!   the process is killed after `timeout_ms` plus a startup grace
//! - memory: peak RSS is sampled while the child runs and the child is
//!   killed as soon as it passes `memory_mb`
//! - output: at most `max_output_bytes` of STDOUT are kept, lines are cut
//!   at [`MAX_LINE_CHARS`] and only `max_output_lines` lines are delivered
//!
//! Interpreters are checked once for readiness (`<bin> --version`). Until a
//! check succeeds, runs fail with [`ExecError::RuntimeUnavailable`] and the
//! check is retried on the next call.

pub mod metrics;
pub mod shim;

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tempfile::tempdir;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::OnceCell;

use crate::engine::Reason;
use crate::sinks::OutputSink;
use crate::submission::Language;
use crate::util::truncate;

use self::metrics::{MemoryTracker, RunMetrics};
use self::shim::{
    node_runner, python_runner, NODE_RUNNER, PYTHON_RUNNER, PYTHON_SOURCE, SYNTAX_EXIT, TIMEOUT_EXIT,
};

/// Extra wall-clock allowance for interpreter start-up.
const STARTUP_GRACE_MS: u64 = 1000;
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const MEMORY_SAMPLE_EVERY: Duration = Duration::from_millis(10);

/// Longest printed line delivered, in chars.
pub const MAX_LINE_CHARS: usize = 10_000;

/// STDERR is only needed for its last line.
const STDERR_TAIL_BYTES: usize = 16 * 1024;

/// Node permission flags, newest spelling first.
const NODE_PERMISSION_FLAGS: [&str; 2] = ["--permission", "--experimental-permission"];

/// Interpreter binaries.
#[derive(Debug, Clone)]
pub struct Runtimes {
    pub node: String,
    pub python: String,
}

impl Default for Runtimes {
    fn default() -> Self {
        Self {
            node: "node".to_string(),
            python: "python3".to_string(),
        }
    }
}

/// Resource budgets for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    pub timeout_ms: u64,
    pub memory_mb: Option<u64>,
    pub max_output_lines: usize,
    pub max_output_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            timeout_ms: 2000,
            memory_mb: None,
            max_output_lines: 500,
            max_output_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("{runtime} runtime unavailable: {reason}")]
    RuntimeUnavailable { runtime: String, reason: String },

    #[error("{0}")]
    Syntax(String),

    #[error("{0}")]
    Runtime(String),

    #[error("execution timed out after {limit_ms}ms")]
    Timeout { limit_ms: u64 },

    #[error("memory budget exceeded: {used_mb}MB (budget {limit_mb}MB)")]
    MemoryExceeded { used_mb: u64, limit_mb: u64 },

    #[error("sandbox failure: {0}")]
    Shim(String),

    #[error("sandbox i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecError {
    /// Map onto the reason shown to the student. Host-side failures are
    /// reported as "could not run" without leaking host details.
    pub fn into_reason(self) -> Reason {
        match self {
            ExecError::RuntimeUnavailable { runtime, .. } => Reason::RuntimeNotReady { runtime },
            ExecError::Syntax(detail) => Reason::CodeSyntax { detail },
            ExecError::Runtime(detail) => Reason::ExecutionFailed { detail },
            ExecError::Timeout { limit_ms } => Reason::Timeout { limit_ms },
            ExecError::MemoryExceeded { used_mb, limit_mb } => {
                Reason::MemoryExceeded { used_mb, limit_mb }
            }
            ExecError::Shim(_) | ExecError::Io(_) => Reason::ExecutionFailed {
                detail: "internal sandbox error".to_string(),
            },
        }
    }
}

/// Outcome of a clean run. Printed lines went to the sink.
#[derive(Debug, Clone, Default)]
pub struct Execution {
    pub metrics: RunMetrics,

    /// STDOUT went past `max_output_bytes`; the rest was discarded.
    pub output_truncated: bool,
}

/// Runs student code. Implemented by [`Sandbox`]; tests substitute fakes.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        language: Language,
        source: &str,
        sink: &mut dyn OutputSink,
    ) -> Result<Execution, ExecError>;
}

/// What a successful readiness check learned about an interpreter.
#[derive(Debug, Clone)]
struct RuntimeInfo {
    version: String,
    permission_flag: Option<&'static str>,
}

/// Child-process sandbox for JavaScript and Python.
#[derive(Debug, Default)]
pub struct Sandbox {
    runtimes: Runtimes,
    limits: Limits,
    node_ready: OnceCell<RuntimeInfo>,
    python_ready: OnceCell<RuntimeInfo>,
}

impl Sandbox {
    pub fn new(runtimes: Runtimes, limits: Limits) -> Self {
        Self {
            runtimes,
            limits,
            node_ready: OnceCell::new(),
            python_ready: OnceCell::new(),
        }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    fn binary(&self, language: Language) -> &str {
        match language {
            Language::Javascript => &self.runtimes.node,
            Language::Python => &self.runtimes.python,
        }
    }

    /// Ensure the interpreter for `language` can be started; returns its
    /// version string. Only success is cached.
    pub async fn check_runtime(&self, language: Language) -> Result<String, ExecError> {
        self.runtime_info(language).await.map(|info| info.version)
    }

    /// The Node permission flag in use, if the interpreter supports one.
    pub async fn node_permission_flag(&self) -> Option<&'static str> {
        self.runtime_info(Language::Javascript)
            .await
            .ok()
            .and_then(|info| info.permission_flag)
    }

    async fn runtime_info(&self, language: Language) -> Result<RuntimeInfo, ExecError> {
        let cell = match language {
            Language::Javascript => &self.node_ready,
            Language::Python => &self.python_ready,
        };
        let bin = self.binary(language);

        cell.get_or_try_init(|| async {
            let version = query_version(bin).await.map_err(|reason| {
                tracing::warn!(runtime = language.as_str(), %bin, %reason, "runtime check failed");
                ExecError::RuntimeUnavailable {
                    runtime: language.as_str().to_string(),
                    reason,
                }
            })?;

            let permission_flag = match language {
                Language::Javascript => detect_permission_flag(bin).await,
                Language::Python => None,
            };
            if language == Language::Javascript && permission_flag.is_none() {
                tracing::warn!(%bin, %version, "node has no permission model; student code can read host files");
            }

            Ok::<_, ExecError>(RuntimeInfo {
                version,
                permission_flag,
            })
        })
        .await
        .cloned()
    }

    fn command(&self, language: Language, info: &RuntimeInfo, workdir: &Path) -> Command {
        let mut cmd = Command::new(self.binary(language));

        match language {
            Language::Javascript => {
                let runner = workdir.join(NODE_RUNNER);
                cmd.arg("--no-warnings");
                if let Some(flag) = info.permission_flag {
                    cmd.arg(flag)
                        .arg(format!("--allow-fs-read={}", runner.display()));
                }
                cmd.arg(runner);
            }
            Language::Python => {
                cmd.args(["-I", "-S", "-B"])
                    .arg(workdir.join(PYTHON_RUNNER))
                    .arg(workdir.join(PYTHON_SOURCE));
            }
        }

        // Student code sees no host environment; PATH only so the
        // interpreter itself resolves.
        cmd.env_clear();
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }

        cmd.current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd
    }

    fn check_memory(&self, metrics: &RunMetrics) -> Result<(), ExecError> {
        if let (Some(limit_mb), Some(peak_kb)) = (self.limits.memory_mb, metrics.peak_rss_kb) {
            if peak_kb > limit_mb.saturating_mul(1024) {
                return Err(ExecError::MemoryExceeded {
                    used_mb: metrics.peak_rss_mb().unwrap_or(limit_mb),
                    limit_mb,
                });
            }
        }
        Ok(())
    }

    /// Classify a finished (non-timed-out) run from its exit status.
    fn outcome(&self, status: ExitStatus, stderr: &[u8]) -> Result<(), ExecError> {
        if status.success() {
            return Ok(());
        }

        let detail = last_line(stderr).unwrap_or_else(|| format!("interpreter exited with {status}"));

        Err(match status.code() {
            Some(SYNTAX_EXIT) => ExecError::Syntax(detail),
            Some(TIMEOUT_EXIT) => ExecError::Timeout {
                limit_ms: self.limits.timeout_ms,
            },
            _ => ExecError::Runtime(detail),
        })
    }
}

#[async_trait]
impl Executor for Sandbox {
    #[tracing::instrument(
        level = "debug",
        skip(self, source, sink),
        fields(language = language.as_str(), source_len = source.len())
    )]
    async fn execute(
        &self,
        language: Language,
        source: &str,
        sink: &mut dyn OutputSink,
    ) -> Result<Execution, ExecError> {
        let info = self.runtime_info(language).await?;

        let tmp = tempdir()?;
        // Permission paths are compared after symlink resolution.
        let workdir = tmp.path().canonicalize()?;
        match language {
            Language::Javascript => {
                std::fs::write(workdir.join(NODE_RUNNER), node_runner(source, self.limits.timeout_ms))?;
            }
            Language::Python => {
                std::fs::write(workdir.join(PYTHON_RUNNER), python_runner())?;
                std::fs::write(workdir.join(PYTHON_SOURCE), source)?;
            }
        }

        let start = Instant::now();
        let mut child = self
            .command(language, &info, &workdir)
            .spawn()
            .map_err(|e| ExecError::RuntimeUnavailable {
                runtime: language.as_str().to_string(),
                reason: e.to_string(),
            })?;

        let tracker = child
            .id()
            .map(|pid| MemoryTracker::start(pid, MEMORY_SAMPLE_EVERY, self.limits.memory_mb));

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(ExecError::Shim("interpreter output was not captured".to_string()));
        };

        let budget = Duration::from_millis(self.limits.timeout_ms + STARTUP_GRACE_MS);
        let waited = tokio::time::timeout(budget, async {
            tokio::join!(
                read_head(stdout, self.limits.max_output_bytes),
                read_tail(stderr, STDERR_TAIL_BYTES),
                child.wait()
            )
        })
        .await;

        if waited.is_err() {
            let _ = child.kill().await;
        }

        let peak_rss_kb = match tracker {
            Some(tracker) => tracker.stop_and_take().await,
            None => None,
        };
        let metrics = RunMetrics {
            duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            peak_rss_kb,
        };

        let (stdout, stderr, status) = match waited {
            Ok((stdout, stderr, status)) => (stdout?, stderr?, status?),
            Err(_) => {
                tracing::info!(limit_ms = self.limits.timeout_ms, "student code killed on timeout");
                return Err(ExecError::Timeout {
                    limit_ms: self.limits.timeout_ms,
                });
            }
        };

        self.check_memory(&metrics)?;

        if stdout.truncated {
            tracing::info!(
                limit_bytes = self.limits.max_output_bytes,
                "student output truncated"
            );
        }

        // Output printed before a failure is still delivered.
        String::from_utf8_lossy(&stdout.bytes)
            .lines()
            .take(self.limits.max_output_lines)
            .for_each(|line| sink.line(cap_line(line)));

        self.outcome(status, &stderr)?;

        tracing::debug!(
            duration_ms = metrics.duration_ms,
            peak_rss_kb = ?metrics.peak_rss_kb,
            "student code finished"
        );

        Ok(Execution {
            metrics,
            output_truncated: stdout.truncated,
        })
    }
}

/// The first `cap` bytes of a stream.
#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

/// Keep the first `cap` bytes and discard the rest, reading to EOF so the
/// child never blocks on a full pipe.
async fn read_head<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> std::io::Result<Captured> {
    let mut bytes = Vec::new();
    (&mut reader).take(cap as u64).read_to_end(&mut bytes).await?;

    let dropped = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;

    Ok(Captured {
        bytes,
        truncated: dropped > 0,
    })
}

/// Keep only the last `cap` bytes of a stream.
async fn read_tail<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> std::io::Result<Vec<u8>> {
    let mut tail = Vec::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        tail.extend_from_slice(&buf[..n]);
        if tail.len() > cap {
            let excess = tail.len() - cap;
            tail.drain(..excess);
        }
    }

    Ok(tail)
}

fn last_line(bytes: &[u8]) -> Option<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| truncate(line, 400))
}

fn cap_line(line: &str) -> String {
    match line.char_indices().nth(MAX_LINE_CHARS) {
        Some((idx, _)) => line[..idx].to_string(),
        None => line.to_string(),
    }
}

async fn query_version(bin: &str) -> Result<String, String> {
    let run = Command::new(bin)
        .arg("--version")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(PROBE_TIMEOUT, run).await {
        Ok(Ok(out)) if out.status.success() => {
            // Python 2 printed its version on stderr.
            let text = if out.stdout.is_empty() { out.stderr } else { out.stdout };
            Ok(String::from_utf8_lossy(&text).trim().to_string())
        }
        Ok(Ok(out)) => Err(format!("`{bin} --version` exited with {}", out.status)),
        Ok(Err(e)) => Err(format!("failed to start `{bin}`: {e}")),
        Err(_) => Err(format!("`{bin} --version` did not answer within {PROBE_TIMEOUT:?}")),
    }
}

/// First permission flag the interpreter accepts, if any.
async fn detect_permission_flag(bin: &str) -> Option<&'static str> {
    for flag in NODE_PERMISSION_FLAGS {
        let run = Command::new(bin)
            .args([flag, "--no-warnings", "-e", "0"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        if matches!(tokio::time::timeout(PROBE_TIMEOUT, run).await, Ok(Ok(status)) if status.success()) {
            return Some(flag);
        }
    }
    None
}
