//! End-to-end orchestration tests.
//!
//! Every collaborator is replaced by an in-memory fake so the full
//! provision / stop / start / cleanup sequence runs without a cloud account.
//! Poll timing runs on tokio's paused clock.
//!
//! - `helpers/` -- fakes, shared call log, config builder
//! - `scenarios/` -- one file per group of scenarios
//!
//! ```bash
//! cargo test -p schedcheck-runner --test e2e
//! ```
