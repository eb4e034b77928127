// src/cli.rs

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{OutputMode, DEFAULT_CONFIG_FILE};

/// Grader for block, code and drawing exercises.
///
/// `blockgrade.yaml` is optional; CLI flags override its values.
#[derive(Parser, Debug)]
#[command(name = "blockgrade", version, disable_help_subcommand = true)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// All supported CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Grade one submission against one rule record.
    ///
    /// Exits non-zero when the submission does not pass.
    Grade {
        /// Validation rules (JSON, any accepted spelling)
        #[arg(short, long)]
        rules: PathBuf,

        /// Submission payload (JSON)
        #[arg(short, long)]
        submission: PathBuf,

        /// Re-grade whenever the rules or submission file changes
        #[arg(long)]
        watch: bool,

        /// Override limits.timeout_ms
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Override limits.memory_mb (peak RSS)
        #[arg(long)]
        memory_mb: Option<u64>,

        /// Override output.mode
        #[arg(long, value_enum)]
        output: Option<OutputMode>,
    },

    /// Print the canonical form of a rule record.
    Normalize {
        #[arg(short, long)]
        rules: PathBuf,
    },

    /// CI-first regression run over exercise fixtures.
    ///
    /// Discovers every `*.exercise.yaml` under DIR, grades each case and
    /// prints one JSON summary.
    Test {
        #[arg(default_value = ".")]
        dir: PathBuf,
    },

    /// Serve the grading HTTP API.
    Serve {
        /// Listen address; overrides server.addr
        #[arg(long)]
        addr: Option<String>,
    },

    /// Initialise a project scaffold.
    ///
    /// Creates:
    /// - blockgrade.yaml
    /// - exercises/sum.exercise.yaml
    /// - optional starter solution file
    Init {
        /// Optional starter language
        ///
        /// Allowed values: js | python
        #[arg(value_parser = ["js", "python"])]
        language: Option<String>,
    },
}
