// src/main.rs

//! blockgrade
//!
//! Entry point for the blockgrade CLI.
//!
//! Responsibilities of this file:
//! - Load `.env`
//! - Install the tracing subscriber
//! - Parse CLI arguments and hand off to the runner
//!
//! There is intentionally *no business logic* here.

use anyhow::Result;
use clap::Parser;

use blockgrade::{cli, runner, telemetry};

/// Program entry point.
///
/// Uses Tokio because student code runs in child processes that are
/// awaited with a timeout, and `serve` runs an axum server.
#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();

    telemetry::init_tracing();

    let cli = cli::Cli::parse();

    runner::run(cli).await
}
