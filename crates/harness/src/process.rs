//! Subprocess plumbing shared by every collaborator that shells out.
//!
//! Programs and arguments are logged at debug level. Environment values are
//! never logged: they may carry credentials.

use std::path::PathBuf;
use std::process::Stdio;

use tracing::debug;

/// A fully described child process invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Variables added to (or replaced in) the inherited environment
    pub envs: Vec<(String, String)>,
    /// Variables removed from the inherited environment
    pub env_removals: Vec<String>,
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_removals.push(key.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Program and arguments joined for log lines.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished child process.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Run a child process to completion and capture its output.
///
/// Stdin is closed. The child is killed if the returned future is dropped.
///
/// # Errors
///
/// Returns the spawn error when the program cannot be started. A non-zero
/// exit is not an error here; callers inspect [`CommandOutput::success`].
pub async fn run_command(spec: &CommandSpec) -> std::io::Result<CommandOutput> {
    debug!(command = %spec.display(), "running command");

    let mut command = tokio::process::Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for key in &spec.env_removals {
        command.env_remove(key);
    }
    for (key, value) in &spec.envs {
        command.env(key, value);
    }
    if let Some(dir) = &spec.current_dir {
        command.current_dir(dir);
    }

    let output = command.output().await?;
    let result = CommandOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    debug!(
        program = %spec.program,
        code = ?result.code,
        stdout_bytes = output.stdout.len(),
        stderr_bytes = output.stderr.len(),
        "command finished"
    );
    Ok(result)
}

/// Last `max_lines` non-empty lines of `text`, for error messages.
pub fn tail(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}
