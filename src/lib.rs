// src/lib.rs

//! blockgrade
//!
//! Grading engine for kid-facing coding exercises: block programs, typed
//! code (JavaScript / Python) and canvas drawings.
//!
//! The core is [`engine::Grader`]: given normalized [`rules::ValidationRules`]
//! and a [`submission::SubmissionPayload`] it always produces a
//! [`engine::GradeResult`], running student code through a
//! [`sandbox::Executor`] when the exercise needs it.
//!
//! The remaining modules are the CLI and HTTP surfaces built on top.

pub mod auth;
pub mod checks;
pub mod cli;
pub mod config;
pub mod engine;
pub mod feedback;
pub mod grade_id;
pub mod rules;
pub mod runner;
pub mod sandbox;
pub mod server;
pub mod sinks;
pub mod submission;
pub mod telemetry;
pub mod util;

pub use engine::{GradeResult, Grader, Reason};
pub use rules::{normalize, ValidationRules};
pub use submission::SubmissionPayload;
