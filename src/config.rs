// src/config.rs

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path};

use crate::engine::Reason;
use crate::feedback::Catalog;
use crate::sandbox::{Limits, Runtimes, Sandbox};

pub const DEFAULT_CONFIG_FILE: &str = "blockgrade.yaml";

/// Root configuration loaded from `blockgrade.yaml`.
///
/// This file controls:
/// - Which Node/Python binaries run student code
/// - Execution limits for student code
/// - How CLI results are printed
/// - Feedback message overrides (e.g. localized strings)
/// - Where the HTTP surface listens
///
/// Every section is optional; a missing file means all defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub runtime: RuntimeConfig,
    pub limits: LimitsConfig,
    pub output: OutputConfig,
    pub feedback: FeedbackConfig,
    pub server: ServerConfig,
}

/// Runtime binary configuration.
///
/// Example:
///
/// runtime:
///   node: node
///   python: python3
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_node")]
    pub node: String,

    #[serde(default = "default_python")]
    pub python: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            node: default_node(),
            python: default_python(),
        }
    }
}

fn default_node() -> String {
    "node".to_string()
}

fn default_python() -> String {
    "python3".to_string()
}

/// Execution limits for student code.
///
/// Example:
///
/// limits:
///   timeout_ms: 2000
///   memory_mb: 128
///   max_output_lines: 500
///   max_output_bytes: 1048576
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Peak RSS budget in MB. Unset means unlimited.
    #[serde(default)]
    pub memory_mb: Option<u64>,

    #[serde(default = "default_max_output_lines")]
    pub max_output_lines: usize,

    /// STDOUT kept per run; the rest is discarded.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            memory_mb: None,
            max_output_lines: default_max_output_lines(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    Limits::default().timeout_ms
}

fn default_max_output_lines() -> usize {
    Limits::default().max_output_lines
}

fn default_max_output_bytes() -> usize {
    Limits::default().max_output_bytes
}

/// Output configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub mode: OutputMode,

    /// Only used when mode = file
    #[serde(default)]
    pub file: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    Stdout,
    Pretty,
    Simple,
    File,
}

/// Feedback overrides, keyed by reason code.
///
/// feedback:
///   messages:
///     missing_element: "o ku: {name}"
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackConfig {
    #[serde(default)]
    pub messages: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
        }
    }
}

fn default_addr() -> String {
    "127.0.0.1:8787".to_string()
}

/* ---------------- validation ---------------- */

#[derive(Debug, Clone, Serialize)]
pub struct ConfigIssues {
    pub valid: bool,
    pub errors: Vec<ConfigIssue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigIssue {
    pub code: &'static str,
    pub message: String,
}

impl ConfigIssues {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn push_error(&mut self, code: &'static str, message: impl Into<String>) {
        self.valid = false;
        self.errors.push(ConfigIssue {
            code,
            message: message.into(),
        });
    }

    pub fn is_valid(&self) -> bool {
        self.valid && self.errors.is_empty()
    }

    pub fn has(&self, code: &str) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }
}

impl Config {
    /// Load, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let cfg = Self::from_yaml(&raw)
            .with_context(|| format!("Invalid config file: {:?}", path))?;

        tracing::debug!(path = %path.display(), "config loaded");
        Ok(cfg)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "no config file; using defaults");
            Ok(Self::default())
        }
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        // An empty document deserializes to unit, not a map.
        let cfg: Config = if raw.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(raw).context("Failed to parse YAML config")?
        };

        let issues = cfg.validate();
        if !issues.is_valid() {
            let lines = issues
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.code, e.message))
                .collect::<Vec<_>>()
                .join("; ");
            bail!("Config validation failed: {}", lines);
        }

        Ok(cfg)
    }

    pub fn validate(&self) -> ConfigIssues {
        let mut issues = ConfigIssues::ok();

        validate_runtime(self, &mut issues);
        validate_limits(self, &mut issues);
        validate_output(self, &mut issues);
        validate_feedback(self, &mut issues);

        issues
    }

    pub fn runtimes(&self) -> Runtimes {
        Runtimes {
            node: self.runtime.node.clone(),
            python: self.runtime.python.clone(),
        }
    }

    pub fn limits(&self) -> Limits {
        Limits {
            timeout_ms: self.limits.timeout_ms,
            memory_mb: self.limits.memory_mb,
            max_output_lines: self.limits.max_output_lines,
            max_output_bytes: self.limits.max_output_bytes,
        }
    }

    pub fn sandbox(&self) -> Sandbox {
        Sandbox::new(self.runtimes(), self.limits())
    }

    pub fn catalog(&self) -> Catalog {
        Catalog::with_overrides(&self.feedback.messages)
    }
}

/* ---------------- runtime ---------------- */

fn validate_runtime(cfg: &Config, issues: &mut ConfigIssues) {
    if cfg.runtime.node.trim().is_empty() {
        issues.push_error("RUNTIME_NODE_MISSING", "Node runtime is not configured");
    }
    if cfg.runtime.python.trim().is_empty() {
        issues.push_error("RUNTIME_PYTHON_MISSING", "Python runtime is not configured");
    }
}

/* ---------------- limits ---------------- */

fn validate_limits(cfg: &Config, issues: &mut ConfigIssues) {
    if cfg.limits.timeout_ms == 0 {
        issues.push_error("LIMIT_TIMEOUT_INVALID", "limits.timeout_ms must be > 0");
    }
    if cfg.limits.memory_mb == Some(0) {
        issues.push_error("LIMIT_MEMORY_INVALID", "limits.memory_mb must be > 0");
    }
    if cfg.limits.max_output_bytes == 0 {
        issues.push_error("LIMIT_OUTPUT_INVALID", "limits.max_output_bytes must be > 0");
    }
}

/* ---------------- output ---------------- */

fn validate_output(cfg: &Config, issues: &mut ConfigIssues) {
    let file_set = cfg
        .output
        .file
        .as_deref()
        .is_some_and(|f| !f.trim().is_empty());

    if cfg.output.mode == OutputMode::File && !file_set {
        issues.push_error(
            "OUTPUT_FILE_MISSING",
            "output.file must be set when output.mode = file",
        );
    }
}

/* ---------------- feedback ---------------- */

fn validate_feedback(cfg: &Config, issues: &mut ConfigIssues) {
    for code in cfg.feedback.messages.keys() {
        if !Reason::CODES.contains(&code.as_str()) {
            issues.push_error(
                "FEEDBACK_UNKNOWN_CODE",
                format!("Unknown reason code in feedback.messages: {}", code),
            );
        }
    }
}
