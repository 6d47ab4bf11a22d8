//! Credential Resolver -- turns ambient cloud identity into the credential triple.
//!
//! Credentials already present in the calling environment are used unchanged.
//! Only when `AWS_ACCESS_KEY_ID` is absent does the resolver fall back to a
//! [`CredentialSource`] (by default the AWS CLI's `export-credentials`, which
//! walks profiles, SSO and instance roles).

use std::future::Future;

use serde::Deserialize;
use tracing::{debug, info};

use schedcheck_core::config::AwsConfig;
use schedcheck_core::error::CredentialError;
use schedcheck_core::types::Credentials;

use crate::process::{self, CommandSpec};

pub const ACCESS_KEY_VAR: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_KEY_VAR: &str = "AWS_SECRET_ACCESS_KEY";
pub const SESSION_TOKEN_VAR: &str = "AWS_SESSION_TOKEN";

/// Source of credentials when the environment has none.
pub trait CredentialSource: Send + Sync + 'static {
    /// Resolve credentials from the ambient identity chain.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError` when no source yields usable credentials.
    fn export(&self) -> impl Future<Output = Result<Credentials, CredentialError>> + Send;
}

/// Credential variables as they were in the environment at resolution time.
///
/// Empty values count as absent.
#[derive(Default, Clone)]
pub struct EnvSnapshot {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub session_token: Option<String>,
}

impl EnvSnapshot {
    /// Read the three credential variables from the process environment.
    pub fn capture() -> Self {
        Self {
            access_key: non_empty_var(ACCESS_KEY_VAR),
            secret_key: non_empty_var(SECRET_KEY_VAR),
            session_token: non_empty_var(SESSION_TOKEN_VAR),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Resolves credentials once per run.
pub struct CredentialResolver<S: CredentialSource> {
    source: S,
}

impl<S: CredentialSource> CredentialResolver<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Resolve against the current process environment.
    pub async fn resolve(&self) -> Result<Credentials, CredentialError> {
        self.resolve_with(&EnvSnapshot::capture()).await
    }

    /// Resolve against an explicit environment snapshot.
    ///
    /// # Errors
    ///
    /// - `MissingField` when an access key is set without its secret
    /// - whatever the fallback source returns when the access key is absent
    pub async fn resolve_with(&self, env: &EnvSnapshot) -> Result<Credentials, CredentialError> {
        if let Some(access_key) = &env.access_key {
            let secret_key = env
                .secret_key
                .clone()
                .ok_or(CredentialError::MissingField(SECRET_KEY_VAR))?;
            debug!(
                session_token = env.session_token.is_some(),
                "using credentials from environment"
            );
            return Ok(Credentials::new(
                access_key.clone(),
                secret_key,
                env.session_token.clone(),
            ));
        }

        info!("no credentials in environment, resolving from ambient identity chain");
        let credentials = self.source.export().await?;
        if credentials.access_key.is_empty() {
            return Err(CredentialError::MissingField("AccessKeyId"));
        }
        if credentials.secret_key.is_empty() {
            return Err(CredentialError::MissingField("SecretAccessKey"));
        }
        info!(
            session_token = credentials.has_session_token(),
            "credentials resolved"
        );
        Ok(credentials)
    }
}

/// Exports credentials through `aws configure export-credentials`.
pub struct AwsCliCredentialSource {
    cli_bin: String,
    profile: Option<String>,
}

impl AwsCliCredentialSource {
    pub fn new(cli_bin: impl Into<String>, profile: Option<String>) -> Self {
        Self {
            cli_bin: cli_bin.into(),
            profile: profile.filter(|p| !p.is_empty()),
        }
    }

    pub fn from_core(config: &AwsConfig) -> Self {
        Self::new(config.cli_bin.clone(), Some(config.profile.clone()))
    }

    fn command(&self) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.cli_bin).args([
            "configure",
            "export-credentials",
            "--format",
            "process",
        ]);
        if let Some(profile) = &self.profile {
            spec = spec.args(["--profile", profile.as_str()]);
        }
        spec
    }
}

impl CredentialSource for AwsCliCredentialSource {
    async fn export(&self) -> Result<Credentials, CredentialError> {
        let output = process::run_command(&self.command()).await.map_err(|e| {
            CredentialError::Unavailable(format!("failed to run {}: {e}", self.cli_bin))
        })?;
        if !output.success() {
            return Err(CredentialError::Unavailable(process::tail(&output.stderr, 5)));
        }
        parse_export(&output.stdout)
    }
}

/// `credential_process` document printed by the AWS CLI.
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ExportedCredentials {
    access_key_id: String,
    secret_access_key: String,
    #[serde(default)]
    session_token: Option<String>,
}

/// Parse the JSON printed by `aws configure export-credentials --format process`.
pub fn parse_export(json: &str) -> Result<Credentials, CredentialError> {
    // serde_json errors quote offending input; keep only the position.
    let exported: ExportedCredentials = serde_json::from_str(json).map_err(|e| {
        CredentialError::Malformed(format!("line {} column {}", e.line(), e.column()))
    })?;
    Ok(Credentials::new(
        exported.access_key_id,
        exported.secret_access_key,
        exported.session_token.filter(|t| !t.is_empty()),
    ))
}
