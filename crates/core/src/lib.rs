#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod types;

// --- re-exports ---

pub use error::{
    CleanupError, ConfigError, CredentialError, InvocationError, ProvisionError, QueryError,
    SchedcheckError,
};

pub use config::RunConfig;

pub use types::{
    CleanupStatus, Credentials, Phase, PollOutcome, RunResult, ScheduleAction, Step, TestFixture,
    Verdict,
};
