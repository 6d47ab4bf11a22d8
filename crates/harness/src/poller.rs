//! State Poller -- bounded wait for a resource to reach a lifecycle state.
//!
//! [`wait_for_state`] queries immediately, then once per interval, until the
//! observed state matches or the budget is spent. Elapsed time is the sum of
//! intervals slept, not wall-clock time.
//!
//! A failed query is recorded as [`UNKNOWN_STATE`] and polling continues; only
//! the budget ends a wait. A timeout comes back as a `PollOutcome` with
//! `succeeded = false`, never as an error.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use schedcheck_core::config::PollConfig;
use schedcheck_core::error::QueryError;
use schedcheck_core::types::PollOutcome;

use crate::process::{self, CommandSpec};

/// State label recorded when a query fails.
pub const UNKNOWN_STATE: &str = "unknown";

/// Query for the current lifecycle state of a resource.
pub trait StateQuery: Send + Sync + 'static {
    /// Current state label (e.g. `running`, `stopped`, `pending`).
    ///
    /// # Errors
    ///
    /// Returns `QueryError` when the state could not be read. Callers in this
    /// crate treat that as transient.
    fn current_state(
        &self,
        resource_id: &str,
        region: &str,
    ) -> impl Future<Output = Result<String, QueryError>> + Send;
}

/// Poll budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub max_wait_secs: u64,
    pub interval_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            max_wait_secs: 300,
            interval_secs: 15,
        }
    }
}

impl PollSettings {
    pub fn from_core(config: &PollConfig) -> Self {
        Self {
            max_wait_secs: config.max_wait_secs,
            interval_secs: config.interval_secs,
        }
    }
}

/// Wait until `resource_id` reports `desired` (case-sensitive) or the budget runs out.
pub async fn wait_for_state<Q: StateQuery + ?Sized>(
    query: &Q,
    resource_id: &str,
    desired: &str,
    region: &str,
    settings: PollSettings,
) -> PollOutcome {
    // A zero interval would never advance the budget.
    let interval = settings.interval_secs.max(1);
    let mut elapsed = 0u64;
    let mut last_state = UNKNOWN_STATE.to_owned();

    info!(
        resource_id,
        desired,
        max_wait_secs = settings.max_wait_secs,
        interval_secs = interval,
        "waiting for state"
    );

    while elapsed < settings.max_wait_secs {
        last_state = match query.current_state(resource_id, region).await {
            Ok(state) => state,
            Err(e) => {
                warn!(resource_id, error = %e, "state query failed, treating as unknown");
                UNKNOWN_STATE.to_owned()
            }
        };

        if last_state == desired {
            info!(resource_id, state = %last_state, elapsed_secs = elapsed, "desired state reached");
            return PollOutcome {
                final_state: last_state,
                elapsed_secs: elapsed,
                succeeded: true,
            };
        }

        info!(
            resource_id,
            state = %last_state,
            desired,
            elapsed_secs = elapsed,
            "state not reached yet"
        );
        tokio::time::sleep(Duration::from_secs(interval)).await;
        elapsed += interval;
    }

    warn!(
        resource_id,
        desired,
        last_state = %last_state,
        elapsed_secs = elapsed,
        "timed out waiting for state"
    );
    PollOutcome {
        final_state: last_state,
        elapsed_secs: elapsed,
        succeeded: false,
    }
}

/// Reads EC2 instance state through the AWS CLI.
pub struct AwsCliStateQuery {
    cli_bin: String,
}

impl AwsCliStateQuery {
    pub fn new(cli_bin: impl Into<String>) -> Self {
        Self {
            cli_bin: cli_bin.into(),
        }
    }

    fn command(&self, resource_id: &str, region: &str) -> CommandSpec {
        CommandSpec::new(&self.cli_bin).args([
            "ec2",
            "describe-instances",
            "--instance-ids",
            resource_id,
            "--region",
            region,
            "--query",
            "Reservations[0].Instances[0].State.Name",
            "--output",
            "text",
        ])
    }
}

impl StateQuery for AwsCliStateQuery {
    async fn current_state(&self, resource_id: &str, region: &str) -> Result<String, QueryError> {
        let output = process::run_command(&self.command(resource_id, region))
            .await
            .map_err(|e| QueryError::Spawn {
                program: self.cli_bin.clone(),
                reason: e.to_string(),
            })?;

        if !output.success() {
            return Err(QueryError::Failed {
                resource_id: resource_id.to_owned(),
                reason: process::tail(&output.stderr, 3),
            });
        }

        let state = output.stdout.trim();
        // `--output text` prints "None" when the instance is not found.
        if state.is_empty() || state == "None" {
            return Err(QueryError::Failed {
                resource_id: resource_id.to_owned(),
                reason: "instance not found".to_owned(),
            });
        }
        debug!(resource_id, state, "state query");
        Ok(state.to_owned())
    }
}
