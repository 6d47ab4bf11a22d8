//! Final report rendering, text or JSON.

use std::io::Write;

use colored::Colorize;
use serde::Serialize;

use schedcheck_core::types::{CleanupStatus, PollOutcome, RunResult, Step, Verdict};

use crate::cli::OutputFormat;
use crate::error::RunnerError;

pub const PASS_BANNER: &str = "ALL TESTS PASSED";

/// Exit code for a finished run: 0 on pass, 1 on fail.
pub fn exit_code(result: &RunResult) -> i32 {
    if result.passed() { 0 } else { 1 }
}

/// Writes the report in the selected format.
pub struct ReportWriter {
    format: OutputFormat,
}

impl ReportWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Render to stdout.
    pub fn render<T: Render + Serialize>(&self, payload: &T) -> Result<(), RunnerError> {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        self.render_to(&mut handle, payload)
    }

    pub fn render_to<T: Render + Serialize>(
        &self,
        w: &mut dyn Write,
        payload: &T,
    ) -> Result<(), RunnerError> {
        match self.format {
            OutputFormat::Text => payload.render_text(w)?,
            OutputFormat::Json => {
                serde_json::to_writer_pretty(&mut *w, payload)?;
                writeln!(w)?;
            }
        }
        Ok(())
    }
}

/// Human-readable rendering.
pub trait Render {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()>;
}

impl Render for RunResult {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(w, "run {}", self.run_id)?;
        match &self.fixture {
            Some(fixture) => writeln!(w, "fixture: {fixture}")?,
            None => writeln!(w, "fixture: not provisioned")?,
        }

        for (step, outcome) in [
            (Step::WaitRunning, &self.initial),
            (Step::WaitStopped, &self.stopped),
            (Step::WaitRunningAfterStart, &self.restarted),
        ] {
            if let Some(outcome) = outcome {
                writeln!(w, "  {}: {}", step, describe_poll(outcome))?;
            }
        }

        match &self.cleanup {
            CleanupStatus::Destroyed => writeln!(w, "cleanup: fixture destroyed")?,
            CleanupStatus::Failed(reason) => writeln!(
                w,
                "cleanup: {} ({reason})",
                "FAILED, resources may remain".yellow()
            )?,
        }

        match &self.verdict {
            Verdict::Passed => writeln!(w, "{}", PASS_BANNER.green().bold())?,
            Verdict::Failed { step, reason } => writeln!(
                w,
                "{}",
                format!("TEST FAILED at step '{step}': {reason}").red().bold()
            )?,
        }
        Ok(())
    }
}

fn describe_poll(outcome: &PollOutcome) -> String {
    if outcome.succeeded {
        format!("{} after {}s", outcome.final_state, outcome.elapsed_secs)
    } else {
        format!(
            "timed out after {}s (last state: {})",
            outcome.elapsed_secs, outcome.final_state
        )
    }
}
