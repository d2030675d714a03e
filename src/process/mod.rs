//! External process execution behind a mockable seam.
//!
//! Every tool `dock` drives (`terraform`, `scw`, `doctl`, `ssh`, `scp`) is
//! invoked through [`CommandRunner`], so orchestration code can be exercised
//! against scripted outputs instead of real binaries.

use std::ffi::OsString;
use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::thread;

use camino::Utf8PathBuf;
use shell_escape::unix::escape;
use thiserror::Error;
use tracing::debug;

/// Description of a single process invocation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandSpec {
    /// Program name or path.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Extra environment variables layered over the inherited environment.
    pub envs: Vec<(String, String)>,
    /// Working directory, if different from the current one.
    pub cwd: Option<Utf8PathBuf>,
}

impl CommandSpec {
    /// Starts a spec for `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets an environment variable for the child process.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Runs the child in `dir`.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Renders the invocation as a shell-escaped command line for logs.
    #[must_use]
    pub fn command_line(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(escape(self.program.as_str().into()).into_owned());
        for arg in &self.args {
            let text = arg.to_string_lossy();
            parts.push(escape(text).into_owned());
        }
        parts.join(" ")
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        for (key, value) in &self.envs {
            command.env(key, value);
        }
        if let Some(dir) = &self.cwd {
            command.current_dir(dir);
        }
        command
    }
}

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Human readable exit status.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }
}

/// Errors raised while launching or checking external processes.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProcessError {
    /// Raised when the program cannot be started at all.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Error reported by the OS.
        message: String,
    },
    /// Raised when a program exits unsuccessfully.
    #[error("{program} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Program that failed.
        program: String,
        /// Exit status reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the command.
        stderr: String,
    },
}

impl ProcessError {
    fn spawn(program: &str, err: &io::Error) -> Self {
        Self::Spawn {
            program: program.to_owned(),
            message: err.to_string(),
        }
    }
}

/// Converts a failed [`CommandOutput`] into [`ProcessError::CommandFailure`].
///
/// # Errors
///
/// Returns [`ProcessError::CommandFailure`] when the exit code is not zero.
pub fn check_output(program: &str, output: CommandOutput) -> Result<CommandOutput, ProcessError> {
    if output.is_success() {
        return Ok(output);
    }
    Err(ProcessError::CommandFailure {
        program: program.to_owned(),
        status: output.code,
        status_text: output.status_text(),
        stderr: output.stderr.trim().to_owned(),
    })
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs the command to completion, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Spawn`] if the command cannot be started.
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProcessError>;

    /// Runs the command with inherited stdio and returns its exit code.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Spawn`] if the command cannot be started.
    fn run_interactive(&self, spec: &CommandSpec) -> Result<Option<i32>, ProcessError>;

    /// Starts the command detached from the terminal and returns its PID.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Spawn`] if the command cannot be started.
    fn spawn_background(&self, spec: &CommandSpec) -> Result<u32, ProcessError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProcessError> {
        debug!(command = %spec.command_line(), "running");
        let output = spec
            .to_command()
            .stdin(Stdio::null())
            .output()
            .map_err(|err| ProcessError::spawn(&spec.program, &err))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn run_interactive(&self, spec: &CommandSpec) -> Result<Option<i32>, ProcessError> {
        debug!(command = %spec.command_line(), "running interactively");
        let status = spec
            .to_command()
            .status()
            .map_err(|err| ProcessError::spawn(&spec.program, &err))?;
        Ok(status.code())
    }

    fn spawn_background(&self, spec: &CommandSpec) -> Result<u32, ProcessError> {
        debug!(command = %spec.command_line(), "spawning in background");
        let mut child = spec
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .map_err(|err| ProcessError::spawn(&spec.program, &err))?;
        let pid = child.id();

        // Reap the child if it exits while we are still running so liveness
        // probes do not see a zombie.
        thread::spawn(move || {
            if let Err(err) = child.wait() {
                debug!(pid, error = %err, "failed to reap background process");
            }
        });

        Ok(pid)
    }
}

/// Returns `true` when a process with `pid` exists (signal-0 probe).
#[must_use]
pub fn pid_alive(pid: u32) -> bool {
    let Ok(raw) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    // SAFETY: `kill` with signal 0 performs only permission and existence checks.
    let result = unsafe { libc::kill(raw, 0) };
    if result == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Sends `SIGTERM` to `pid`, returning `true` when the signal was delivered.
#[must_use]
pub fn terminate(pid: u32) -> bool {
    let Ok(raw) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    // SAFETY: sending SIGTERM to a positive pid has no memory-safety implications.
    let result = unsafe { libc::kill(raw, libc::SIGTERM) };
    result == 0
}
