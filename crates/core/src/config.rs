//! Run configuration: `schedcheck.toml` parsing and environment overrides.
//!
//! [`RunConfig`] is built once at start-up and passed by reference to every
//! component. Nothing downstream reads environment variables directly, except
//! the credential resolver's documented fallback.
//!
//! # Loading priority
//! 1. CLI flags (applied by the runner)
//! 2. Environment variables (`SCHEDCHECK_POLL_MAX_WAIT_SECS=600`, `AWS_REGION`)
//! 3. Config file (`schedcheck.toml`)
//! 4. Defaults (`Default` impls)
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), schedcheck_core::error::SchedcheckError> {
//! use schedcheck_core::config::RunConfig;
//!
//! // File + environment overrides
//! let config = RunConfig::load("schedcheck.toml").await?;
//!
//! // Straight from a TOML string
//! let config = RunConfig::parse("[poll]\ninterval_secs = 5")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ConfigError, SchedcheckError};

/// Default config file looked up when no path is given.
pub const DEFAULT_CONFIG_PATH: &str = "schedcheck.toml";

/// Complete configuration of one harness run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub fixture: FixtureConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub aws: AwsConfig,
}

impl RunConfig {
    /// Load a TOML file, apply environment overrides and validate.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, SchedcheckError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    ///
    /// Used for the implicit default path so the binary needs no arguments.
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self, SchedcheckError> {
        let mut config = match Self::from_file(path.as_ref()).await {
            Ok(config) => config,
            Err(SchedcheckError::Config(ConfigError::FileNotFound { path })) => {
                debug!(path = %path, "config file absent, using defaults");
                Self::default()
            }
            Err(e) => return Err(e),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file without environment overrides.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, SchedcheckError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SchedcheckError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                SchedcheckError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// Parse a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, SchedcheckError> {
        toml::from_str(toml_str).map_err(|e| {
            SchedcheckError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// Override values from the environment.
    ///
    /// Naming: `SCHEDCHECK_{SECTION}_{FIELD}`. `AWS_REGION` is honoured as the
    /// target region, with `SCHEDCHECK_FIXTURE_REGION` taking precedence.
    pub fn apply_env_overrides(&mut self) {
        override_string(&mut self.general.log_level, "SCHEDCHECK_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "SCHEDCHECK_GENERAL_LOG_FORMAT");

        override_string(&mut self.fixture.region, "AWS_REGION");
        override_string(&mut self.fixture.region, "SCHEDCHECK_FIXTURE_REGION");
        override_string(
            &mut self.fixture.terraform_bin,
            "SCHEDCHECK_FIXTURE_TERRAFORM_BIN",
        );
        override_string(
            &mut self.fixture.terraform_dir,
            "SCHEDCHECK_FIXTURE_TERRAFORM_DIR",
        );

        override_u64(&mut self.poll.max_wait_secs, "SCHEDCHECK_POLL_MAX_WAIT_SECS");
        override_u64(&mut self.poll.interval_secs, "SCHEDCHECK_POLL_INTERVAL_SECS");

        override_string(&mut self.scheduler.mode, "SCHEDCHECK_SCHEDULER_MODE");
        override_string(
            &mut self.scheduler.binary_path,
            "SCHEDCHECK_SCHEDULER_BINARY_PATH",
        );
        override_string(
            &mut self.scheduler.docker_image,
            "SCHEDCHECK_SCHEDULER_DOCKER_IMAGE",
        );
        override_string(&mut self.scheduler.log_level, "SCHEDCHECK_SCHEDULER_LOG_LEVEL");
        override_csv(
            &mut self.scheduler.extra_regions,
            "SCHEDCHECK_SCHEDULER_EXTRA_REGIONS",
        );

        override_string(&mut self.aws.cli_bin, "SCHEDCHECK_AWS_CLI_BIN");
        override_string(&mut self.aws.profile, "SCHEDCHECK_AWS_PROFILE");
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<(), SchedcheckError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.fixture.region.trim().is_empty() {
            return Err(invalid("fixture.region", "must not be empty".to_owned()));
        }

        if self.poll.interval_secs == 0 {
            return Err(invalid(
                "poll.interval_secs",
                "must be greater than 0".to_owned(),
            ));
        }
        if self.poll.interval_secs > self.poll.max_wait_secs {
            return Err(invalid(
                "poll.interval_secs",
                format!(
                    "must not exceed poll.max_wait_secs ({})",
                    self.poll.max_wait_secs
                ),
            ));
        }

        match self.scheduler.mode.as_str() {
            "binary" => {
                if self.scheduler.binary_path.is_empty() {
                    return Err(invalid(
                        "scheduler.binary_path",
                        "must not be empty in binary mode".to_owned(),
                    ));
                }
            }
            "docker" => {
                if self.scheduler.docker_image.is_empty() {
                    return Err(invalid(
                        "scheduler.docker_image",
                        "must not be empty in docker mode".to_owned(),
                    ));
                }
            }
            _ => {
                return Err(invalid(
                    "scheduler.mode",
                    "must be one of: binary, docker".to_owned(),
                ));
            }
        }

        if !valid_levels.contains(&self.scheduler.log_level.as_str()) {
            return Err(invalid(
                "scheduler.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> SchedcheckError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

/// Logging settings for the harness itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// trace, debug, info, warn, error
    pub log_level: String,
    /// json or pretty
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "pretty".to_owned(),
        }
    }
}

/// Where and how the fixture is provisioned.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureConfig {
    /// Target region
    pub region: String,
    /// Terraform executable
    pub terraform_bin: String,
    /// Directory holding the fixture's Terraform module
    pub terraform_dir: String,
    /// Terraform output carrying the instance id
    pub instance_id_output: String,
    /// Terraform output carrying the discovery tag key
    pub tag_key_output: String,
    /// Terraform output carrying the discovery tag value
    pub tag_value_output: String,
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            region: "eu-west-1".to_owned(),
            terraform_bin: "terraform".to_owned(),
            terraform_dir: "tests/terraform".to_owned(),
            instance_id_output: "instance_id".to_owned(),
            tag_key_output: "tag_key".to_owned(),
            tag_value_output: "tag_value".to_owned(),
        }
    }
}

/// State poller budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Give up after this many seconds of accumulated polling
    pub max_wait_secs: u64,
    /// Seconds between two state queries
    pub interval_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_wait_secs: 300,
            interval_secs: 15,
        }
    }
}

/// How the scheduler-under-test is launched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// binary or docker
    pub mode: String,
    /// Scheduler executable (binary mode)
    pub binary_path: String,
    /// Container image (docker mode)
    pub docker_image: String,
    /// Docker executable (docker mode)
    pub docker_bin: String,
    /// `LOG_LEVEL` handed to the scheduler
    pub log_level: String,
    /// Regions appended after the fixture region in `AWS_REGIONS`
    pub extra_regions: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mode: "binary".to_owned(),
            binary_path: "target/release/scheduler".to_owned(),
            docker_image: "scheduler:latest".to_owned(),
            docker_bin: "docker".to_owned(),
            log_level: "info".to_owned(),
            extra_regions: Vec::new(),
        }
    }
}

/// AWS CLI used for state queries and credential export.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    pub cli_bin: String,
    /// Named profile for credential export; empty means the default chain
    pub profile: String,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            cli_bin: "aws".to_owned(),
            profile: String::new(),
        }
    }
}

// --- environment override helpers ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        if !val.is_empty() {
            *target = val;
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}
