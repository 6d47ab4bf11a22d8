//! Error taxonomy, one enum per failure class.
//!
//! Every fatal condition short-circuits the remaining steps of a run, but none
//! of them skips cleanup. A poll timeout is deliberately absent here: it is an
//! expected outcome reported through [`PollOutcome`](crate::types::PollOutcome).

/// Top-level schedcheck error.
#[derive(Debug, thiserror::Error)]
pub enum SchedcheckError {
    /// Configuration error
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Fixture provisioning error
    #[error("provision error: {0}")]
    Provision(#[from] ProvisionError),

    /// Credential resolution error
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Scheduler invocation error
    #[error("invocation error: {0}")]
    Invocation(#[from] InvocationError),

    /// State query error
    #[error("state query error: {0}")]
    Query(#[from] QueryError),

    /// Cleanup error
    #[error("cleanup error: {0}")]
    Cleanup(#[from] CleanupError),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file does not exist
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// Config file is not valid TOML
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// A field holds an unusable value
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Failure to create the test fixture.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// The provisioning tool could not be started
    #[error("failed to run {program}: {reason}")]
    Spawn { program: String, reason: String },

    /// A provisioning stage exited unsuccessfully
    #[error("{stage} failed (exit code {code:?}): {stderr}")]
    StageFailed {
        stage: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The provisioning outputs are missing or malformed
    #[error("invalid provisioning output: {0}")]
    InvalidOutput(String),
}

/// Failure to obtain cloud credentials. Always unrecoverable for the run.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// No credential source produced anything usable
    #[error("no credential source available: {0}")]
    Unavailable(String),

    /// A required field is missing
    #[error("credential field '{0}' is missing or empty")]
    MissingField(&'static str),

    /// The credential export could not be parsed
    #[error("malformed credential export: {0}")]
    Malformed(String),
}

/// Failure of the scheduler-under-test.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    /// The scheduler could not be started
    #[error("failed to start scheduler ({program}): {reason}")]
    Spawn { program: String, reason: String },

    /// The scheduler ran but exited abnormally
    #[error("scheduler '{action}' exited with code {code:?}: {stderr_tail}")]
    NonZeroExit {
        action: String,
        code: Option<i32>,
        stderr_tail: String,
    },
}

/// A single state query failed. The poller absorbs these as `unknown`.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The query tool could not be started
    #[error("failed to run {program}: {reason}")]
    Spawn { program: String, reason: String },

    /// The query tool reported an error
    #[error("state query for '{resource_id}' failed: {reason}")]
    Failed { resource_id: String, reason: String },
}

/// Failure while tearing the fixture down. Logged, never escalated.
#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    /// Destroy ran and failed
    #[error("destroy failed: {0}")]
    DestroyFailed(String),

    /// The destroy tool could not be started
    #[error("failed to run {program}: {reason}")]
    Spawn { program: String, reason: String },
}
