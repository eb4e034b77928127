//! Tracing subscriber setup.
//!
//! - LOG_LEVEL controls the filter (e.g. "debug" or directives like
//!   "info,blockgrade=debug,tower_http=info").
//! - LOG_FORMAT selects "pretty" (default) or "json".
//!
//! Logs go to stderr: stdout carries grade envelopes and CI JSON.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "info,blockgrade=debug,tower_http=info";

pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    // A subscriber may already be installed (tests, embedding); keep it.
    let installed = match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => builder.json().try_init(),
        _ => builder.try_init(),
    };

    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
