//! Healthy stop/start round trip.

use std::future::pending;

use schedcheck_core::types::{CleanupStatus, Phase, ScheduleAction, Verdict};
use schedcheck_runner::report;

use crate::helpers::fakes::*;

/// running; running, running, stopped; stopped, running -> pass, destroy once.
#[tokio::test(start_paused = true)]
async fn test_e2e_round_trip_passes() {
    let calls = CallLog::new();
    let orchestrator = orchestrator(
        FakeBackend::healthy(&calls),
        ScriptedStateQuery::states(&calls, &round_trip_script()),
        RecordingInvoker::healthy(&calls),
        StaticCredentialSource::available(&calls),
    );

    let result = orchestrator.run_until(pending()).await;

    assert_eq!(result.verdict, Verdict::Passed);
    assert_eq!(report::exit_code(&result), 0);
    assert_eq!(result.fixture, Some(fixture()));

    let initial = result.initial.expect("initial poll recorded");
    assert!(initial.succeeded);
    assert_eq!(initial.elapsed_secs, 0);

    let stopped = result.stopped.expect("stop poll recorded");
    assert!(stopped.succeeded);
    assert_eq!(stopped.final_state, "stopped");
    assert_eq!(stopped.elapsed_secs, 30);

    let restarted = result.restarted.expect("restart poll recorded");
    assert!(restarted.succeeded);
    assert_eq!(restarted.final_state, "running");
    assert_eq!(restarted.elapsed_secs, 15);

    assert_eq!(
        calls.invocations(),
        vec![ScheduleAction::Stop, ScheduleAction::Start]
    );
    assert_eq!(calls.provisions(), 1);
    assert_eq!(calls.queries(), 6);
    assert_eq!(calls.destroys(), 1);
    assert_eq!(result.cleanup, CleanupStatus::Destroyed);
}

/// Every phase of the state machine is entered in order.
#[tokio::test(start_paused = true)]
async fn test_e2e_round_trip_phase_sequence() {
    let calls = CallLog::new();
    let orchestrator = orchestrator(
        FakeBackend::healthy(&calls),
        ScriptedStateQuery::states(&calls, &round_trip_script()),
        RecordingInvoker::healthy(&calls),
        StaticCredentialSource::available(&calls),
    );

    let result = orchestrator.run_until(pending()).await;

    assert_eq!(
        result.phases,
        vec![
            Phase::Init,
            Phase::Provisioned,
            Phase::WaitingRunning,
            Phase::StoppingInvoked,
            Phase::WaitingStopped,
            Phase::StartingInvoked,
            Phase::WaitingRunning2,
            Phase::Passed,
        ]
    );
}

/// Transient query failures during a wait do not fail the run.
#[tokio::test(start_paused = true)]
async fn test_e2e_transient_query_failures_are_absorbed() {
    let calls = CallLog::new();
    let script = [
        None,
        Some("pending"),
        Some("running"),
        None,
        Some("stopping"),
        Some("stopped"),
        Some("pending"),
        None,
        Some("running"),
    ];
    let orchestrator = orchestrator(
        FakeBackend::healthy(&calls),
        ScriptedStateQuery::new(&calls, &script),
        RecordingInvoker::healthy(&calls),
        StaticCredentialSource::available(&calls),
    );

    let result = orchestrator.run_until(pending()).await;

    assert!(result.passed(), "verdict: {:?}", result.verdict);
    assert_eq!(result.initial.map(|o| o.elapsed_secs), Some(30));
    assert_eq!(result.stopped.map(|o| o.elapsed_secs), Some(30));
    assert_eq!(result.restarted.map(|o| o.elapsed_secs), Some(30));
    assert_eq!(calls.destroys(), 1);
}

/// The signal-driven entry point behaves like `run_until` when no signal arrives.
#[tokio::test(start_paused = true)]
async fn test_e2e_run_with_signal_handlers() {
    let calls = CallLog::new();
    let orchestrator = orchestrator(
        FakeBackend::healthy(&calls),
        ScriptedStateQuery::states(&calls, &round_trip_script()),
        RecordingInvoker::healthy(&calls),
        StaticCredentialSource::available(&calls),
    );

    let result = orchestrator.run().await;

    assert!(result.passed());
    assert_eq!(calls.destroys(), 1);
}

/// Each run gets its own id.
#[tokio::test(start_paused = true)]
async fn test_e2e_run_ids_are_unique() {
    let calls = CallLog::new();
    let orchestrator = orchestrator(
        FakeBackend::healthy(&calls),
        ScriptedStateQuery::states(&calls, &["running", "stopped", "running"]),
        RecordingInvoker::healthy(&calls),
        StaticCredentialSource::available(&calls),
    );

    let first = orchestrator.run_until(pending()).await;
    let second = orchestrator.run_until(pending()).await;

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(calls.destroys(), 2);
}
