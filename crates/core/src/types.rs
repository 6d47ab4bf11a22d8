//! Domain types shared by the harness and the orchestrator.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Handle to the disposable instance created for one run.
///
/// Produced by the provisioning backend and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFixture {
    /// Cloud instance identifier (e.g. `i-0123456789abcdef0`)
    pub instance_id: String,
    /// Region the instance lives in
    pub region: String,
    /// Discovery tag key the scheduler filters on
    pub tag_key: String,
    /// Discovery tag value the scheduler filters on
    pub tag_value: String,
}

impl fmt::Display for TestFixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) {}={}",
            self.instance_id, self.region, self.tag_key, self.tag_value
        )
    }
}

/// Cloud credential triple handed to the scheduler.
///
/// Lives only in memory. `Debug` redacts the secret and the session token,
/// and the type is intentionally not `Serialize`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    /// Empty when the source did not issue a session token.
    pub session_token: String,
}

impl Credentials {
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            session_token: session_token.unwrap_or_default(),
        }
    }

    pub fn has_session_token(&self) -> bool {
        !self.session_token.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field(
                "session_token",
                &if self.has_session_token() {
                    "<redacted>"
                } else {
                    "<none>"
                },
            )
            .finish()
    }
}

/// Action the scheduler-under-test is asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleAction {
    Stop,
    Start,
}

impl ScheduleAction {
    /// Value understood by the scheduler's `SCHEDULE_ACTION` variable.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Start => "start",
        }
    }
}

impl fmt::Display for ScheduleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of waiting for a resource to reach a lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOutcome {
    /// Last state observed (`unknown` when the last query failed)
    pub final_state: String,
    /// Accumulated poll budget spent, in seconds
    pub elapsed_secs: u64,
    pub succeeded: bool,
}

/// Orchestration steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Provision,
    ResolveCredentials,
    WaitRunning,
    InvokeStop,
    WaitStopped,
    InvokeStart,
    WaitRunningAfterStart,
}

impl Step {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Provision => "provision fixture",
            Self::ResolveCredentials => "resolve credentials",
            Self::WaitRunning => "wait for running",
            Self::InvokeStop => "invoke scheduler (stop)",
            Self::WaitStopped => "wait for stopped",
            Self::InvokeStart => "invoke scheduler (start)",
            Self::WaitRunningAfterStart => "wait for running after start",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// States of the orchestration state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Provisioned,
    WaitingRunning,
    StoppingInvoked,
    WaitingStopped,
    StartingInvoked,
    WaitingRunning2,
    Passed,
    Failed,
}

/// Final verdict of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed { step: Step, reason: String },
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

/// What happened when the fixture was torn down.
///
/// Recorded for reporting only; it never changes the verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum CleanupStatus {
    Destroyed,
    Failed(String),
}

/// Terminal artifact of one orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub verdict: Verdict,
    /// Present once provisioning succeeded
    pub fixture: Option<TestFixture>,
    /// Poll for `running` right after provisioning
    pub initial: Option<PollOutcome>,
    /// Poll for `stopped` after the stop invocation
    pub stopped: Option<PollOutcome>,
    /// Poll for `running` after the start invocation
    pub restarted: Option<PollOutcome>,
    /// Every phase entered, in order
    pub phases: Vec<Phase>,
    pub cleanup: CleanupStatus,
}

impl RunResult {
    pub fn passed(&self) -> bool {
        self.verdict.is_pass()
    }

    /// The step that failed, if any.
    pub fn failed_step(&self) -> Option<Step> {
        match &self.verdict {
            Verdict::Passed => None,
            Verdict::Failed { step, .. } => Some(*step),
        }
    }
}
