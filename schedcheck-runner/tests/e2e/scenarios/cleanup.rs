//! Cleanup runs exactly once on every exit path.

use std::future::pending;
use std::time::Duration;

use schedcheck_core::types::{CleanupStatus, Phase, ScheduleAction, Step, Verdict};
use schedcheck_runner::report;

use crate::helpers::fakes::*;

/// A panicking collaborator fails the run at its step; cleanup still runs.
#[tokio::test(start_paused = true)]
async fn test_e2e_panic_in_scheduler_still_cleans_up() {
    let calls = CallLog::new();
    let orchestrator = orchestrator(
        FakeBackend::healthy(&calls),
        ScriptedStateQuery::states(&calls, &["running"]),
        RecordingInvoker::panicking_on(&calls, ScheduleAction::Stop),
        StaticCredentialSource::available(&calls),
    );

    let result = orchestrator.run_until(pending()).await;

    match &result.verdict {
        Verdict::Failed { step, reason } => {
            assert_eq!(*step, Step::InvokeStop);
            assert!(reason.starts_with("panicked"), "reason: {reason}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(calls.destroys(), 1);
    assert_eq!(result.cleanup, CleanupStatus::Destroyed);
    // progress recorded before the panic survives
    assert!(result.fixture.is_some());
    assert!(result.initial.is_some());
}

/// Termination while waiting for `stopped` aborts the wait and cleans up.
#[tokio::test(start_paused = true)]
async fn test_e2e_interrupt_aborts_and_cleans_up() {
    let calls = CallLog::new();
    let orchestrator = orchestrator(
        FakeBackend::healthy(&calls),
        ScriptedStateQuery::states(&calls, &["running"]),
        RecordingInvoker::healthy(&calls),
        StaticCredentialSource::available(&calls),
    );

    let shutdown = async {
        tokio::time::sleep(Duration::from_secs(40)).await;
        "SIGTERM"
    };
    let result = orchestrator.run_until(shutdown).await;

    assert_eq!(
        result.verdict,
        Verdict::Failed {
            step: Step::WaitStopped,
            reason: "interrupted by SIGTERM".to_owned(),
        }
    );
    assert_eq!(calls.invocations(), vec![ScheduleAction::Stop]);
    assert!(result.stopped.is_none());
    assert_eq!(calls.destroys(), 1);

    let queries = calls.queries();
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(calls.queries(), queries);
    calls.assert_destroyed_last();
}

/// Termination during provisioning lets the apply finish, then destroys.
#[tokio::test(start_paused = true)]
async fn test_e2e_interrupt_during_provisioning_waits_for_apply() {
    let calls = CallLog::new();
    let orchestrator = orchestrator(
        FakeBackend::slow_provision(&calls, 60),
        ScriptedStateQuery::states(&calls, &round_trip_script()),
        RecordingInvoker::healthy(&calls),
        StaticCredentialSource::available(&calls),
    );

    let shutdown = async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        "SIGINT"
    };
    let result = orchestrator.run_until(shutdown).await;

    assert_eq!(
        result.verdict,
        Verdict::Failed {
            step: Step::Provision,
            reason: "interrupted by SIGINT".to_owned(),
        }
    );
    assert_eq!(
        calls.events(),
        vec!["provision-start", "provision-done", "destroy"]
    );
    // the fixture that finished provisioning is still reported
    assert!(result.fixture.is_some());
    assert_eq!(
        result.phases,
        vec![Phase::Init, Phase::Provisioned, Phase::Failed]
    );
    assert_eq!(result.cleanup, CleanupStatus::Destroyed);
    assert_eq!(calls.credential_exports(), 0);
}

/// Termination while the scheduler runs kills it and cleans up.
#[tokio::test(start_paused = true)]
async fn test_e2e_interrupt_during_invoke_cleans_up() {
    let calls = CallLog::new();
    let orchestrator = orchestrator(
        FakeBackend::healthy(&calls),
        ScriptedStateQuery::states(&calls, &["running"]),
        RecordingInvoker::slow_on(&calls, ScheduleAction::Stop, 30),
        StaticCredentialSource::available(&calls),
    );

    let shutdown = async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        "SIGTERM"
    };
    let result = orchestrator.run_until(shutdown).await;

    assert_eq!(
        result.verdict,
        Verdict::Failed {
            step: Step::InvokeStop,
            reason: "interrupted by SIGTERM".to_owned(),
        }
    );

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(
        calls.events(),
        vec![
            "provision-start",
            "provision-done",
            "credential-export",
            "query",
            "invoke-stop",
            "destroy",
        ]
    );
    assert_eq!(calls.invocations(), vec![ScheduleAction::Stop]);
}

/// Dropping the run mid-provision still destroys, but only after the apply is done.
#[tokio::test(start_paused = true)]
async fn test_e2e_dropped_run_during_provisioning_destroys_after_apply() {
    let calls = CallLog::new();
    let orchestrator = orchestrator(
        FakeBackend::slow_provision(&calls, 60),
        ScriptedStateQuery::states(&calls, &round_trip_script()),
        RecordingInvoker::healthy(&calls),
        StaticCredentialSource::available(&calls),
    );

    let dropped =
        tokio::time::timeout(Duration::from_secs(10), orchestrator.run_until(pending())).await;
    assert!(dropped.is_err());
    assert_eq!(calls.destroys(), 0);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(
        calls.events(),
        vec!["provision-start", "provision-done", "destroy"]
    );
    assert_eq!(calls.queries(), 0);
    assert!(calls.invocations().is_empty());
}

/// Dropping the run mid-poll stops the polling before the deferred destroy.
#[tokio::test(start_paused = true)]
async fn test_e2e_dropped_run_while_polling_stops_steps() {
    let calls = CallLog::new();
    let orchestrator = orchestrator(
        FakeBackend::healthy(&calls),
        ScriptedStateQuery::states(&calls, &["running"]),
        RecordingInvoker::healthy(&calls),
        StaticCredentialSource::available(&calls),
    );

    let dropped =
        tokio::time::timeout(Duration::from_secs(40), orchestrator.run_until(pending())).await;
    assert!(dropped.is_err());
    let queries = calls.queries();

    tokio::time::sleep(Duration::from_secs(600)).await;
    calls.assert_destroyed_last();
    assert_eq!(calls.queries(), queries);
    assert_eq!(calls.invocations(), vec![ScheduleAction::Stop]);
}

/// A failed destroy is reported but does not turn a pass into a failure.
#[tokio::test(start_paused = true)]
async fn test_e2e_destroy_failure_keeps_verdict() {
    let calls = CallLog::new();
    let orchestrator = orchestrator(
        FakeBackend::failing_destroy(&calls, "DependencyViolation"),
        ScriptedStateQuery::states(&calls, &round_trip_script()),
        RecordingInvoker::healthy(&calls),
        StaticCredentialSource::available(&calls),
    );

    let result = orchestrator.run_until(pending()).await;

    assert_eq!(result.verdict, Verdict::Passed);
    assert_eq!(report::exit_code(&result), 0);
    match &result.cleanup {
        CleanupStatus::Failed(reason) => assert!(reason.contains("DependencyViolation")),
        other => panic!("expected failed cleanup, got {other:?}"),
    }
    assert_eq!(calls.destroys(), 1);
}

/// A failed destroy does not mask the original failure either.
#[tokio::test(start_paused = true)]
async fn test_e2e_destroy_failure_keeps_failed_step() {
    let calls = CallLog::new();
    let orchestrator = orchestrator(
        FakeBackend::failing_destroy(&calls, "DependencyViolation"),
        ScriptedStateQuery::states(&calls, &["running"]),
        RecordingInvoker::failing_on(&calls, ScheduleAction::Stop),
        StaticCredentialSource::available(&calls),
    );

    let result = orchestrator.run_until(pending()).await;

    assert_eq!(result.failed_step(), Some(Step::InvokeStop));
    assert!(matches!(result.cleanup, CleanupStatus::Failed(_)));
    assert_eq!(calls.destroys(), 1);
}
