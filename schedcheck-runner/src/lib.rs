//! schedcheck runner library.
//!
//! Exposes the orchestrator and report modules for integration testing.
//! In production the `schedcheck` binary (main.rs) drives them.

pub mod cli;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod report;

pub use orchestrator::{Orchestrator, StepFailure};
