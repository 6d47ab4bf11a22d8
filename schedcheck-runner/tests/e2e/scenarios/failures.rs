//! Runs that fail at a step: the remaining steps are skipped, cleanup is not.

use std::future::pending;

use schedcheck_core::types::{CleanupStatus, Phase, ScheduleAction, Step};
use schedcheck_runner::report;

use crate::helpers::fakes::*;

/// Scheduler exits non-zero on stop -> fail, start never invoked, destroy once.
#[tokio::test(start_paused = true)]
async fn test_e2e_stop_invocation_failure() {
    let calls = CallLog::new();
    let orchestrator = orchestrator(
        FakeBackend::healthy(&calls),
        ScriptedStateQuery::states(&calls, &["running"]),
        RecordingInvoker::failing_on(&calls, ScheduleAction::Stop),
        StaticCredentialSource::available(&calls),
    );

    let result = orchestrator.run_until(pending()).await;

    assert_eq!(result.failed_step(), Some(Step::InvokeStop));
    assert_eq!(report::exit_code(&result), 1);
    assert_eq!(calls.invocations(), vec![ScheduleAction::Stop]);
    assert!(result.stopped.is_none());
    assert_eq!(calls.destroys(), 1);
    assert_eq!(result.phases.last(), Some(&Phase::Failed));
}

/// 20 ticks of `running` while waiting for `stopped` -> timeout, start never invoked.
#[tokio::test(start_paused = true)]
async fn test_e2e_stop_poll_timeout() {
    let calls = CallLog::new();
    let orchestrator = orchestrator(
        FakeBackend::healthy(&calls),
        ScriptedStateQuery::states(&calls, &["running"]),
        RecordingInvoker::healthy(&calls),
        StaticCredentialSource::available(&calls),
    );

    let result = orchestrator.run_until(pending()).await;

    assert_eq!(result.failed_step(), Some(Step::WaitStopped));
    let stopped = result.stopped.clone().expect("stop poll recorded");
    assert!(!stopped.succeeded);
    assert_eq!(stopped.final_state, "running");
    assert_eq!(stopped.elapsed_secs, 300);
    // one initial query plus twenty while waiting for stopped
    assert_eq!(calls.queries(), 21);
    assert_eq!(calls.invocations(), vec![ScheduleAction::Stop]);
    assert!(result.restarted.is_none());
    assert_eq!(calls.destroys(), 1);
}

/// The instance never comes up -> fail before the scheduler is ever invoked.
#[tokio::test(start_paused = true)]
async fn test_e2e_initial_running_timeout() {
    let calls = CallLog::new();
    let orchestrator = orchestrator(
        FakeBackend::healthy(&calls),
        ScriptedStateQuery::states(&calls, &["pending"]),
        RecordingInvoker::healthy(&calls),
        StaticCredentialSource::available(&calls),
    );

    let result = orchestrator.run_until(pending()).await;

    assert_eq!(result.failed_step(), Some(Step::WaitRunning));
    assert!(calls.invocations().is_empty());
    assert_eq!(calls.destroys(), 1);
}

/// Instance does not come back after start -> fail at the last wait.
#[tokio::test(start_paused = true)]
async fn test_e2e_restart_poll_timeout() {
    let calls = CallLog::new();
    let orchestrator = orchestrator(
        FakeBackend::healthy(&calls),
        ScriptedStateQuery::states(&calls, &["running", "stopped"]),
        RecordingInvoker::healthy(&calls),
        StaticCredentialSource::available(&calls),
    );

    let result = orchestrator.run_until(pending()).await;

    assert_eq!(result.failed_step(), Some(Step::WaitRunningAfterStart));
    assert_eq!(
        calls.invocations(),
        vec![ScheduleAction::Stop, ScheduleAction::Start]
    );
    assert_eq!(
        result.restarted.map(|o| o.final_state),
        Some("stopped".to_owned())
    );
    assert_eq!(calls.destroys(), 1);
}

/// Scheduler exits non-zero on start -> fail at invoke start, cleanup still runs.
#[tokio::test(start_paused = true)]
async fn test_e2e_start_invocation_failure() {
    let calls = CallLog::new();
    let orchestrator = orchestrator(
        FakeBackend::healthy(&calls),
        ScriptedStateQuery::states(&calls, &["running", "stopped"]),
        RecordingInvoker::failing_on(&calls, ScheduleAction::Start),
        StaticCredentialSource::available(&calls),
    );

    let result = orchestrator.run_until(pending()).await;

    assert_eq!(result.failed_step(), Some(Step::InvokeStart));
    assert!(result.restarted.is_none());
    assert_eq!(calls.destroys(), 1);
}

/// Provisioning fails -> nothing else runs, destroy is still attempted once.
#[tokio::test(start_paused = true)]
async fn test_e2e_provision_failure_still_destroys() {
    let calls = CallLog::new();
    let orchestrator = orchestrator(
        FakeBackend::failing_provision(&calls, "Error: UnauthorizedOperation"),
        ScriptedStateQuery::states(&calls, &["running"]),
        RecordingInvoker::healthy(&calls),
        StaticCredentialSource::available(&calls),
    );

    let result = orchestrator.run_until(pending()).await;

    assert_eq!(result.failed_step(), Some(Step::Provision));
    assert!(result.fixture.is_none());
    assert_eq!(result.phases, vec![Phase::Init, Phase::Failed]);
    assert_eq!(calls.queries(), 0);
    assert_eq!(calls.credential_exports(), 0);
    assert!(calls.invocations().is_empty());
    assert_eq!(calls.destroys(), 1);
    assert_eq!(result.cleanup, CleanupStatus::Destroyed);
}

/// The failure reason carries the collaborator's message.
#[tokio::test(start_paused = true)]
async fn test_e2e_failure_reason_is_descriptive() {
    let calls = CallLog::new();
    let orchestrator = orchestrator(
        FakeBackend::failing_provision(&calls, "Error: UnauthorizedOperation"),
        ScriptedStateQuery::states(&calls, &["running"]),
        RecordingInvoker::healthy(&calls),
        StaticCredentialSource::available(&calls),
    );

    let result = orchestrator.run_until(pending()).await;

    match result.verdict {
        schedcheck_core::types::Verdict::Failed { reason, .. } => {
            assert!(reason.contains("UnauthorizedOperation"), "reason: {reason}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
}
