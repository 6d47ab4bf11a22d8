//! Invoker -- runs the scheduler-under-test to completion for one action.
//!
//! The scheduler is configured purely through environment variables:
//!
//! | Variable | Value |
//! |----------|-------|
//! | `SCHEDULE_ACTION` | `stop` or `start` |
//! | `AWS_REGIONS` | fixture region, then configured extra regions |
//! | `TAG_KEY` / `TAG_VALUE` | the fixture's discovery tag |
//! | `EC2_SCHEDULE` | always `true` |
//! | `LOG_LEVEL` | scheduler verbosity |
//!
//! `EXCLUDED_DATES` is stripped from the child environment: an inherited
//! exclusion for today would make the scheduler exit 0 without acting.
//!
//! Credentials are set on the child process only. In docker mode they are
//! forwarded with bare `-e NAME` flags so no value ever appears in argv.

use std::future::Future;

use tracing::{debug, error, info};

use schedcheck_core::config::SchedulerConfig;
use schedcheck_core::error::{ConfigError, InvocationError};
use schedcheck_core::types::{Credentials, ScheduleAction, TestFixture};

use crate::credentials::{ACCESS_KEY_VAR, SECRET_KEY_VAR, SESSION_TOKEN_VAR};
use crate::process::{self, CommandSpec};

pub const EXCLUDED_DATES_VAR: &str = "EXCLUDED_DATES";

/// Runs the scheduler-under-test.
pub trait SchedulerInvoker: Send + Sync + 'static {
    /// Run one scheduler pass and block until it exits.
    ///
    /// # Errors
    ///
    /// Returns `InvocationError` when the scheduler cannot be started or
    /// exits abnormally.
    fn invoke(
        &self,
        action: ScheduleAction,
        fixture: &TestFixture,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<(), InvocationError>> + Send;
}

/// Non-secret configuration handed to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerPayload {
    vars: Vec<(String, String)>,
}

impl SchedulerPayload {
    pub fn build(
        action: ScheduleAction,
        fixture: &TestFixture,
        extra_regions: &[String],
        log_level: &str,
    ) -> Self {
        let mut regions = vec![fixture.region.clone()];
        for region in extra_regions {
            if !region.is_empty() && !regions.contains(region) {
                regions.push(region.clone());
            }
        }

        let vars = vec![
            ("SCHEDULE_ACTION".to_owned(), action.as_str().to_owned()),
            ("AWS_REGIONS".to_owned(), regions.join(",")),
            ("TAG_KEY".to_owned(), fixture.tag_key.clone()),
            ("TAG_VALUE".to_owned(), fixture.tag_value.clone()),
            ("EC2_SCHEDULE".to_owned(), "true".to_owned()),
            ("LOG_LEVEL".to_owned(), log_level.to_owned()),
        ];
        Self { vars }
    }

    pub fn vars(&self) -> &[(String, String)] {
        &self.vars
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// How the scheduler process is launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchMode {
    /// Run a scheduler executable directly.
    Binary { path: String },
    /// `docker run --rm` a scheduler image.
    Docker { docker_bin: String, image: String },
}

impl LaunchMode {
    pub fn from_core(config: &SchedulerConfig) -> Result<Self, ConfigError> {
        match config.mode.as_str() {
            "binary" => Ok(Self::Binary {
                path: config.binary_path.clone(),
            }),
            "docker" => Ok(Self::Docker {
                docker_bin: config.docker_bin.clone(),
                image: config.docker_image.clone(),
            }),
            other => Err(ConfigError::InvalidValue {
                field: "scheduler.mode".to_owned(),
                reason: format!("unknown mode '{other}'"),
            }),
        }
    }

    fn program(&self) -> &str {
        match self {
            Self::Binary { path } => path,
            Self::Docker { docker_bin, .. } => docker_bin,
        }
    }
}

/// Invokes the scheduler as a child process.
pub struct ProcessInvoker {
    mode: LaunchMode,
    extra_regions: Vec<String>,
    log_level: String,
}

impl ProcessInvoker {
    pub fn new(mode: LaunchMode, extra_regions: Vec<String>, log_level: impl Into<String>) -> Self {
        Self {
            mode,
            extra_regions,
            log_level: log_level.into(),
        }
    }

    pub fn from_core(config: &SchedulerConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            LaunchMode::from_core(config)?,
            config.extra_regions.clone(),
            config.log_level.clone(),
        ))
    }

    fn command(
        &self,
        action: ScheduleAction,
        fixture: &TestFixture,
        credentials: &Credentials,
    ) -> CommandSpec {
        let payload =
            SchedulerPayload::build(action, fixture, &self.extra_regions, &self.log_level);

        let mut secret_names = vec![ACCESS_KEY_VAR, SECRET_KEY_VAR];
        let mut spec = CommandSpec::new(self.mode.program())
            .env_remove(EXCLUDED_DATES_VAR)
            .env(ACCESS_KEY_VAR, &credentials.access_key)
            .env(SECRET_KEY_VAR, &credentials.secret_key);
        if credentials.has_session_token() {
            spec = spec.env(SESSION_TOKEN_VAR, &credentials.session_token);
            secret_names.push(SESSION_TOKEN_VAR);
        } else {
            // An inherited token belongs to some other key pair.
            spec = spec.env_remove(SESSION_TOKEN_VAR);
        }
        for (key, value) in payload.vars() {
            spec = spec.env(key, value);
        }

        if let LaunchMode::Docker { image, .. } = &self.mode {
            spec = spec.args(["run", "--rm"]);
            for (key, _) in payload.vars() {
                spec = spec.args(["-e", key.as_str()]);
            }
            for name in secret_names {
                spec = spec.args(["-e", name]);
            }
            spec = spec.arg(image);
        }
        spec
    }
}

impl SchedulerInvoker for ProcessInvoker {
    async fn invoke(
        &self,
        action: ScheduleAction,
        fixture: &TestFixture,
        credentials: &Credentials,
    ) -> Result<(), InvocationError> {
        let spec = self.command(action, fixture, credentials);
        info!(
            action = %action,
            instance_id = %fixture.instance_id,
            command = %spec.display(),
            "invoking scheduler"
        );

        let output = process::run_command(&spec)
            .await
            .map_err(|e| InvocationError::Spawn {
                program: spec.program.clone(),
                reason: e.to_string(),
            })?;

        for line in output.stdout.lines().chain(output.stderr.lines()) {
            debug!(target: "scheduler", "{line}");
        }

        if !output.success() {
            let stderr_tail = process::tail(&output.stderr, 10);
            error!(action = %action, code = ?output.code, "scheduler exited abnormally");
            return Err(InvocationError::NonZeroExit {
                action: action.to_string(),
                code: output.code,
                stderr_tail,
            });
        }

        info!(action = %action, "scheduler completed");
        Ok(())
    }
}
