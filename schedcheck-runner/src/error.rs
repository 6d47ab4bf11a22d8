//! Runner error type and exit code mapping.

use schedcheck_core::error::SchedcheckError;

/// Errors that stop the runner before or after a run.
///
/// A failed run is not an error: it is a [`RunResult`](schedcheck_core::RunResult)
/// with a failed verdict.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] SchedcheckError),

    /// Logging or collaborator set-up failed.
    #[error("setup error: {0}")]
    Setup(String),

    /// Report serialisation failed.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// Writing the report failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning |
    /// |------|---------|
    /// | 0 | Run passed |
    /// | 1 | Run failed, or the report could not be written |
    /// | 2 | Configuration or set-up error (nothing was provisioned) |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Setup(_) => 2,
            Self::JsonSerialize(_) | Self::Io(_) => 1,
        }
    }
}
