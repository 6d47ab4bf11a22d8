//! Run orchestration -- the provision / stop / start round trip.
//!
//! # Step order
//!
//! 1. Provision the fixture
//! 2. Resolve credentials
//! 3. Wait for `running`
//! 4. Invoke the scheduler with `stop`, wait for `stopped`
//! 5. Invoke the scheduler with `start`, wait for `running`
//!
//! The first failing step ends the run. A `FixtureGuard` owns the step task
//! from the moment it is spawned and destroys the fixture exactly once after
//! the steps have stopped, whether they passed, failed, panicked or were
//! interrupted by SIGINT/SIGTERM.
//!
//! # Interrupts
//!
//! A running `terraform apply` is never killed: that loses its state and leaks
//! whatever it already created. An interrupt during provisioning lets it
//! finish, stops the steps at the next step boundary and then destroys. Any
//! other step is aborted outright.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use schedcheck_core::config::RunConfig;
use schedcheck_core::types::{
    CleanupStatus, Credentials, Phase, PollOutcome, RunResult, ScheduleAction, Step, TestFixture,
    Verdict,
};
use schedcheck_harness::credentials::{CredentialResolver, CredentialSource, EnvSnapshot};
use schedcheck_harness::invoker::SchedulerInvoker;
use schedcheck_harness::poller::{PollSettings, StateQuery, wait_for_state};
use schedcheck_harness::provision::ProvisioningBackend;

pub const STATE_RUNNING: &str = "running";
pub const STATE_STOPPED: &str = "stopped";

/// The spawned step sequence.
struct StepTask {
    handle: JoinHandle<Result<(), StepFailure>>,
    finished: bool,
    /// Stops the steps at the next step boundary.
    cancel: CancellationToken,
    /// Cancelled once the step future has completed or been dropped.
    done: CancellationToken,
    progress: Arc<RunProgress>,
}

impl StepTask {
    fn spawn<F>(steps: F, cancel: CancellationToken, progress: Arc<RunProgress>) -> Self
    where
        F: Future<Output = Result<(), StepFailure>> + Send + 'static,
    {
        let done = CancellationToken::new();
        let on_exit = done.clone().drop_guard();
        let handle = tokio::spawn(
            async move {
                // Declared first so it drops last, after any in-flight child process.
                let _on_exit = on_exit;
                steps.await
            }
            .in_current_span(),
        );
        Self {
            handle,
            finished: false,
            cancel,
            done,
            progress,
        }
    }

    /// Wait for the steps to finish. Cancel-safe.
    async fn join(&mut self) -> Result<Result<(), StepFailure>, JoinError> {
        let joined = (&mut self.handle).await;
        self.finished = true;
        joined
    }

    /// Ask the steps to stop. Provisioning is left to finish.
    fn interrupt(&self) {
        if self.finished || self.done.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        if self.progress.current_step() == Step::Provision {
            info!("provisioning in flight, letting it finish before cleanup");
        } else {
            self.handle.abort();
        }
    }

    /// Wait until the step future is gone.
    async fn settle(&mut self) {
        if !self.finished {
            let _ = self.join().await;
        }
    }
}

/// Releases the fixture exactly once.
///
/// Owns the step task, since a failed or interrupted provision can still
/// leave partial resources behind and destroy must never race it. If the
/// guard is dropped unreleased (the owning future was cancelled), the steps
/// are interrupted and destroy is spawned on the current runtime to run once
/// they have stopped.
struct FixtureGuard<P: ProvisioningBackend> {
    backend: Arc<P>,
    steps: StepTask,
    released: bool,
}

impl<P: ProvisioningBackend> FixtureGuard<P> {
    fn arm(backend: Arc<P>, steps: StepTask) -> Self {
        Self {
            backend,
            steps,
            released: false,
        }
    }

    /// Stop the steps, then destroy the fixture. Returns `None` if it was already released.
    async fn release(&mut self) -> Option<CleanupStatus> {
        if self.released {
            return None;
        }
        self.steps.interrupt();
        self.steps.settle().await;

        self.released = true;
        info!("destroying fixture");
        let status = match self.backend.destroy().await {
            Ok(()) => CleanupStatus::Destroyed,
            Err(e) => {
                // Cleanup failures are reported, never escalated.
                error!(error = %e, "fixture cleanup failed, resources may be left behind");
                CleanupStatus::Failed(e.to_string())
            }
        };
        Some(status)
    }
}

impl<P: ProvisioningBackend> Drop for FixtureGuard<P> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        warn!("fixture guard dropped before release, destroying once the steps have stopped");
        self.steps.interrupt();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let backend = Arc::clone(&self.backend);
                let stopped = self.steps.done.clone();
                handle.spawn(
                    async move {
                        stopped.cancelled().await;
                        if let Err(e) = backend.destroy().await {
                            error!(error = %e, "deferred fixture cleanup failed");
                        }
                    }
                    .in_current_span(),
                );
            }
            Err(_) => error!("no runtime available, fixture was not destroyed"),
        }
    }
}

/// A step that ended the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub step: Step,
    pub reason: String,
}

impl StepFailure {
    fn new(step: Step, reason: impl ToString) -> Self {
        Self {
            step,
            reason: reason.to_string(),
        }
    }
}

#[derive(Default)]
struct Progress {
    current: Option<Step>,
    phases: Vec<Phase>,
    fixture: Option<TestFixture>,
    initial: Option<PollOutcome>,
    stopped: Option<PollOutcome>,
    restarted: Option<PollOutcome>,
}

/// Run state shared with the step task; survives a panic in that task.
#[derive(Default)]
struct RunProgress {
    inner: Mutex<Progress>,
}

impl RunProgress {
    fn update<R>(&self, f: impl FnOnce(&mut Progress) -> R) -> R {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut inner)
    }

    fn begin(&self, step: Step) {
        info!(step = %step, "step started");
        self.update(|p| p.current = Some(step));
    }

    fn enter(&self, phase: Phase) {
        self.update(|p| p.phases.push(phase));
    }

    fn current_step(&self) -> Step {
        self.update(|p| p.current.unwrap_or(Step::Provision))
    }
}

/// Collaborators handed to the step task.
struct StepContext<P, Q, I, C>
where
    P: ProvisioningBackend,
    Q: StateQuery,
    I: SchedulerInvoker,
    C: CredentialSource,
{
    backend: Arc<P>,
    query: Arc<Q>,
    invoker: Arc<I>,
    resolver: Arc<CredentialResolver<C>>,
    env: Option<EnvSnapshot>,
    poll: PollSettings,
    cancel: CancellationToken,
}

impl<P, Q, I, C> StepContext<P, Q, I, C>
where
    P: ProvisioningBackend,
    Q: StateQuery,
    I: SchedulerInvoker,
    C: CredentialSource,
{
    /// Refuse to start `step` once the run has been cancelled.
    fn checkpoint(&self, step: Step) -> Result<(), StepFailure> {
        if self.cancel.is_cancelled() {
            return Err(StepFailure::new(step, "run cancelled before step started"));
        }
        Ok(())
    }
}

/// Drives one run.
pub struct Orchestrator<P, Q, I, C>
where
    P: ProvisioningBackend,
    Q: StateQuery,
    I: SchedulerInvoker,
    C: CredentialSource,
{
    config: Arc<RunConfig>,
    backend: Arc<P>,
    query: Arc<Q>,
    invoker: Arc<I>,
    resolver: Arc<CredentialResolver<C>>,
    /// Credential environment; `None` reads the process environment at resolution time.
    env: Option<EnvSnapshot>,
}

impl<P, Q, I, C> Orchestrator<P, Q, I, C>
where
    P: ProvisioningBackend,
    Q: StateQuery,
    I: SchedulerInvoker,
    C: CredentialSource,
{
    pub fn new(config: RunConfig, backend: P, query: Q, invoker: I, credentials: C) -> Self {
        Self {
            config: Arc::new(config),
            backend: Arc::new(backend),
            query: Arc::new(query),
            invoker: Arc::new(invoker),
            resolver: Arc::new(CredentialResolver::new(credentials)),
            env: None,
        }
    }

    /// Resolve credentials against `env` instead of the process environment.
    pub fn with_env(mut self, env: EnvSnapshot) -> Self {
        self.env = Some(env);
        self
    }

    /// Run to completion, aborting early on SIGINT or SIGTERM.
    pub async fn run(&self) -> RunResult {
        self.run_until(shutdown_signal()).await
    }

    /// Run to completion, aborting early when `shutdown` resolves.
    ///
    /// `shutdown` yields a label recorded in the failure reason.
    pub async fn run_until<F>(&self, shutdown: F) -> RunResult
    where
        F: Future<Output = &'static str>,
    {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("run", run_id = %run_id);
        self.drive(run_id, shutdown).instrument(span).await
    }

    async fn drive<F>(&self, run_id: String, shutdown: F) -> RunResult
    where
        F: Future<Output = &'static str>,
    {
        info!(
            region = %self.config.fixture.region,
            max_wait_secs = self.config.poll.max_wait_secs,
            interval_secs = self.config.poll.interval_secs,
            "run started"
        );

        let progress = Arc::new(RunProgress::default());
        progress.enter(Phase::Init);

        let cancel = CancellationToken::new();
        let ctx = StepContext {
            backend: Arc::clone(&self.backend),
            query: Arc::clone(&self.query),
            invoker: Arc::clone(&self.invoker),
            resolver: Arc::clone(&self.resolver),
            env: self.env.clone(),
            poll: PollSettings::from_core(&self.config.poll),
            cancel: cancel.clone(),
        };
        let steps = StepTask::spawn(
            execute_steps(ctx, Arc::clone(&progress)),
            cancel,
            Arc::clone(&progress),
        );
        let mut guard = FixtureGuard::arm(Arc::clone(&self.backend), steps);

        tokio::pin!(shutdown);
        let outcome = tokio::select! {
            joined = guard.steps.join() => match joined {
                Ok(result) => result,
                Err(e) => Err(StepFailure::new(progress.current_step(), join_failure_reason(e))),
            },
            signal = &mut shutdown => {
                let step = progress.current_step();
                warn!(signal, step = %step, "termination requested, stopping run");
                guard.steps.interrupt();
                guard.steps.settle().await;
                Err(StepFailure::new(step, format!("interrupted by {signal}")))
            }
        };

        let verdict = match outcome {
            Ok(()) => {
                progress.enter(Phase::Passed);
                Verdict::Passed
            }
            Err(failure) => {
                error!(step = %failure.step, reason = %failure.reason, "run failed");
                progress.enter(Phase::Failed);
                Verdict::Failed {
                    step: failure.step,
                    reason: failure.reason,
                }
            }
        };

        let cleanup = guard
            .release()
            .await
            .unwrap_or_else(|| CleanupStatus::Failed("fixture already released".to_owned()));

        let result = progress.update(|p| RunResult {
            run_id,
            verdict,
            fixture: p.fixture.take(),
            initial: p.initial.take(),
            stopped: p.stopped.take(),
            restarted: p.restarted.take(),
            phases: std::mem::take(&mut p.phases),
            cleanup,
        });
        info!(passed = result.passed(), "run finished");
        result
    }
}

async fn execute_steps<P, Q, I, C>(
    ctx: StepContext<P, Q, I, C>,
    progress: Arc<RunProgress>,
) -> Result<(), StepFailure>
where
    P: ProvisioningBackend,
    Q: StateQuery,
    I: SchedulerInvoker,
    C: CredentialSource,
{
    ctx.checkpoint(Step::Provision)?;
    progress.begin(Step::Provision);
    let fixture = ctx
        .backend
        .provision()
        .await
        .map_err(|e| StepFailure::new(Step::Provision, e))?;
    info!(fixture = %fixture, "fixture ready");
    progress.update(|p| {
        p.fixture = Some(fixture.clone());
        p.phases.push(Phase::Provisioned);
    });

    ctx.checkpoint(Step::ResolveCredentials)?;
    progress.begin(Step::ResolveCredentials);
    let resolved = match &ctx.env {
        Some(env) => ctx.resolver.resolve_with(env).await,
        None => ctx.resolver.resolve().await,
    };
    let credentials = resolved.map_err(|e| StepFailure::new(Step::ResolveCredentials, e))?;

    await_state(&ctx, &progress, &fixture, Step::WaitRunning, STATE_RUNNING).await?;
    invoke(&ctx, &progress, &fixture, &credentials, ScheduleAction::Stop).await?;
    await_state(&ctx, &progress, &fixture, Step::WaitStopped, STATE_STOPPED).await?;
    invoke(&ctx, &progress, &fixture, &credentials, ScheduleAction::Start).await?;
    await_state(
        &ctx,
        &progress,
        &fixture,
        Step::WaitRunningAfterStart,
        STATE_RUNNING,
    )
    .await?;

    Ok(())
}

async fn await_state<P, Q, I, C>(
    ctx: &StepContext<P, Q, I, C>,
    progress: &RunProgress,
    fixture: &TestFixture,
    step: Step,
    desired: &str,
) -> Result<(), StepFailure>
where
    P: ProvisioningBackend,
    Q: StateQuery,
    I: SchedulerInvoker,
    C: CredentialSource,
{
    let phase = match step {
        Step::WaitRunning => Phase::WaitingRunning,
        Step::WaitStopped => Phase::WaitingStopped,
        _ => Phase::WaitingRunning2,
    };
    ctx.checkpoint(step)?;
    progress.begin(step);
    progress.enter(phase);

    let outcome = wait_for_state(
        ctx.query.as_ref(),
        &fixture.instance_id,
        desired,
        &fixture.region,
        ctx.poll,
    )
    .await;

    let failure = (!outcome.succeeded).then(|| {
        StepFailure::new(
            step,
            format!(
                "{} did not reach '{}' within {}s (last state: {})",
                fixture.instance_id, desired, ctx.poll.max_wait_secs, outcome.final_state
            ),
        )
    });
    progress.update(|p| match step {
        Step::WaitRunning => p.initial = Some(outcome),
        Step::WaitStopped => p.stopped = Some(outcome),
        _ => p.restarted = Some(outcome),
    });

    match failure {
        Some(failure) => Err(failure),
        None => Ok(()),
    }
}

async fn invoke<P, Q, I, C>(
    ctx: &StepContext<P, Q, I, C>,
    progress: &RunProgress,
    fixture: &TestFixture,
    credentials: &Credentials,
    action: ScheduleAction,
) -> Result<(), StepFailure>
where
    P: ProvisioningBackend,
    Q: StateQuery,
    I: SchedulerInvoker,
    C: CredentialSource,
{
    let (step, phase) = match action {
        ScheduleAction::Stop => (Step::InvokeStop, Phase::StoppingInvoked),
        ScheduleAction::Start => (Step::InvokeStart, Phase::StartingInvoked),
    };
    ctx.checkpoint(step)?;
    progress.begin(step);
    progress.enter(phase);
    ctx.invoker
        .invoke(action, fixture, credentials)
        .await
        .map_err(|e| StepFailure::new(step, e))
}

fn join_failure_reason(e: JoinError) -> String {
    if !e.is_panic() {
        return format!("step task was cancelled: {e}");
    }
    let payload = e.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned());
    format!("panicked: {message}")
}

/// Resolve on SIGTERM or SIGINT. Never resolves if the handlers cannot be installed.
async fn shutdown_signal() -> &'static str {
    match wait_for_shutdown_signal().await {
        Ok(signal) => signal,
        Err(e) => {
            warn!(error = %e, "signal handlers unavailable, run cannot be interrupted");
            std::future::pending().await
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("failed to install Ctrl+C handler: {}", e))?;
    Ok("Ctrl+C")
}
