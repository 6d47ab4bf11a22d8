//! Fixture provisioning backends.
//!
//! The default backend drives a Terraform module that creates one tagged
//! instance and exposes its id and discovery tag as outputs.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;

use serde::Deserialize;
use tracing::{info, warn};

use schedcheck_core::config::FixtureConfig;
use schedcheck_core::error::{CleanupError, ProvisionError};
use schedcheck_core::types::TestFixture;

use crate::process::{self, CommandOutput, CommandSpec};

/// Creates and destroys the test fixture.
pub trait ProvisioningBackend: Send + Sync + 'static {
    /// Create the fixture and report its identity.
    ///
    /// A failure may leave partial resources behind; `destroy` is still
    /// expected to be called.
    fn provision(&self) -> impl Future<Output = Result<TestFixture, ProvisionError>> + Send;

    /// Tear down whatever `provision` created, including partial state.
    fn destroy(&self) -> impl Future<Output = Result<(), CleanupError>> + Send;
}

/// Names of the Terraform outputs describing the fixture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputNames {
    pub instance_id: String,
    pub tag_key: String,
    pub tag_value: String,
}

impl Default for OutputNames {
    fn default() -> Self {
        Self {
            instance_id: "instance_id".to_owned(),
            tag_key: "tag_key".to_owned(),
            tag_value: "tag_value".to_owned(),
        }
    }
}

/// Terraform-backed fixture.
pub struct TerraformBackend {
    terraform_bin: String,
    dir: PathBuf,
    region: String,
    outputs: OutputNames,
}

impl TerraformBackend {
    pub fn new(
        terraform_bin: impl Into<String>,
        dir: impl Into<PathBuf>,
        region: impl Into<String>,
        outputs: OutputNames,
    ) -> Self {
        Self {
            terraform_bin: terraform_bin.into(),
            dir: dir.into(),
            region: region.into(),
            outputs,
        }
    }

    pub fn from_core(config: &FixtureConfig) -> Self {
        Self::new(
            config.terraform_bin.clone(),
            config.terraform_dir.clone(),
            config.region.clone(),
            OutputNames {
                instance_id: config.instance_id_output.clone(),
                tag_key: config.tag_key_output.clone(),
                tag_value: config.tag_value_output.clone(),
            },
        )
    }

    fn terraform<'a>(&self, args: impl IntoIterator<Item = &'a str>) -> CommandSpec {
        CommandSpec::new(&self.terraform_bin)
            .arg(format!("-chdir={}", self.dir.display()))
            .args(args)
            .env("TF_IN_AUTOMATION", "1")
    }

    fn init_command(&self) -> CommandSpec {
        self.terraform(["init", "-input=false"])
    }

    fn apply_command(&self) -> CommandSpec {
        self.terraform(["apply", "-auto-approve", "-input=false"])
            .arg(format!("-var=region={}", self.region))
    }

    fn output_command(&self) -> CommandSpec {
        self.terraform(["output", "-json"])
    }

    fn destroy_command(&self) -> CommandSpec {
        self.terraform(["destroy", "-auto-approve", "-input=false"])
            .arg(format!("-var=region={}", self.region))
    }

    async fn stage(&self, stage: &str, spec: &CommandSpec) -> Result<CommandOutput, ProvisionError> {
        info!(stage, command = %spec.display(), "terraform stage");
        let output = process::run_command(spec)
            .await
            .map_err(|e| ProvisionError::Spawn {
                program: self.terraform_bin.clone(),
                reason: e.to_string(),
            })?;
        if !output.success() {
            return Err(ProvisionError::StageFailed {
                stage: format!("terraform {stage}"),
                code: output.code,
                stderr: process::tail(&output.stderr, 10),
            });
        }
        Ok(output)
    }

    /// Map `terraform output -json` onto a fixture.
    ///
    /// A `region` output, when present, wins over the configured region.
    pub fn parse_outputs(&self, json: &str) -> Result<TestFixture, ProvisionError> {
        let outputs: HashMap<String, OutputValue> = serde_json::from_str(json)
            .map_err(|e| ProvisionError::InvalidOutput(format!("not terraform output json: {e}")))?;

        let get = |name: &str| -> Result<String, ProvisionError> {
            let value = outputs
                .get(name)
                .ok_or_else(|| ProvisionError::InvalidOutput(format!("missing output '{name}'")))?;
            match &value.value {
                serde_json::Value::String(s) if !s.is_empty() => Ok(s.clone()),
                serde_json::Value::String(_) => Err(ProvisionError::InvalidOutput(format!(
                    "output '{name}' is empty"
                ))),
                other => Err(ProvisionError::InvalidOutput(format!(
                    "output '{name}' is not a string: {other}"
                ))),
            }
        };

        let region = match outputs.get("region").map(|o| &o.value) {
            Some(serde_json::Value::String(r)) if !r.is_empty() => r.clone(),
            _ => self.region.clone(),
        };

        Ok(TestFixture {
            instance_id: get(&self.outputs.instance_id)?,
            region,
            tag_key: get(&self.outputs.tag_key)?,
            tag_value: get(&self.outputs.tag_value)?,
        })
    }
}

#[derive(Deserialize)]
struct OutputValue {
    value: serde_json::Value,
}

impl ProvisioningBackend for TerraformBackend {
    async fn provision(&self) -> Result<TestFixture, ProvisionError> {
        self.stage("init", &self.init_command()).await?;
        self.stage("apply", &self.apply_command()).await?;
        let output = self.stage("output", &self.output_command()).await?;
        let fixture = self.parse_outputs(&output.stdout)?;
        info!(fixture = %fixture, "fixture provisioned");
        Ok(fixture)
    }

    async fn destroy(&self) -> Result<(), CleanupError> {
        // init is idempotent and required when provisioning failed before it ran.
        for (stage, spec) in [
            ("init", self.init_command()),
            ("destroy", self.destroy_command()),
        ] {
            info!(stage, command = %spec.display(), "terraform stage");
            let output = process::run_command(&spec)
                .await
                .map_err(|e| CleanupError::Spawn {
                    program: self.terraform_bin.clone(),
                    reason: e.to_string(),
                })?;
            if !output.success() {
                warn!(stage, code = ?output.code, "terraform teardown stage failed");
                return Err(CleanupError::DestroyFailed(format!(
                    "terraform {stage} exited with {:?}: {}",
                    output.code,
                    process::tail(&output.stderr, 10)
                )));
            }
        }
        info!("fixture destroyed");
        Ok(())
    }
}
