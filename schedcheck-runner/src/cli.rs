//! CLI argument definitions for the `schedcheck` binary.
//!
//! Every flag is optional: a bare `schedcheck` loads `schedcheck.toml` from the
//! working directory when present and otherwise runs on defaults.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use schedcheck_core::config::RunConfig;
use schedcheck_core::error::SchedcheckError;

/// End-to-end check of the EC2 stop/start scheduler.
///
/// Provisions a tagged instance, asks the scheduler to stop it, then to start
/// it again, and verifies each transition. The instance is destroyed on every
/// exit path.
///
/// The fixture is created from the Terraform module at `fixture.terraform_dir`
/// (default `tests/terraform`, relative to the working directory). The module
/// must accept a `region` variable and expose the configured instance id and
/// tag outputs.
#[derive(Parser, Debug)]
#[command(name = "schedcheck")]
#[command(version, about)]
pub struct RunnerCli {
    /// Path to a schedcheck.toml configuration file.
    ///
    /// When omitted, `schedcheck.toml` is used if it exists.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the target region.
    #[arg(long)]
    pub region: Option<String>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    #[arg(long)]
    pub log_format: Option<String>,

    /// Report format.
    #[arg(long, default_value = "text")]
    pub output: OutputFormat,

    /// Validate configuration and exit without provisioning anything.
    #[arg(long)]
    pub validate: bool,
}

/// Supported report formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary.
    Text,
    /// Machine-readable JSON.
    Json,
}

impl RunnerCli {
    /// Apply command-line overrides on top of a loaded config and re-validate.
    ///
    /// Flags take precedence over both the file and the environment.
    pub fn apply_overrides(&self, config: &mut RunConfig) -> Result<(), SchedcheckError> {
        if let Some(region) = &self.region {
            config.fixture.region = region.clone();
        }
        if let Some(level) = &self.log_level {
            config.general.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.general.log_format = format.clone();
        }
        config.validate()
    }
}
