// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External command execution.
//!
//! Commands either run interactively, inheriting the terminal so the operator
//! sees progress and can answer things like sudo password prompts, or
//! non-interactively with their output captured for probing.

use crate::step::{Apply, ApplyError, ProbeState, ProvisioningStep, StepCategory};

use std::{
    ffi::OsString,
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
    process::{Command, ExitStatus},
};
use tracing::{debug, instrument};

/// Program plus arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: OsString,
    args: Vec<OsString>,
}

impl CommandLine {
    /// Construct new command line.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Construct command line from a program followed by its arguments.
    ///
    /// Returns `None` for an empty listing.
    pub fn from_argv(argv: impl IntoIterator<Item = impl Into<OsString>>) -> Option<Self> {
        let mut argv = argv.into_iter().map(Into::into);
        let program = argv.next()?;
        Some(Self {
            program,
            args: argv.collect(),
        })
    }

    /// Construct command line, prefixed with sudo if asked to.
    pub fn privileged(program: impl Into<OsString>, sudo: bool) -> Self {
        if sudo {
            Self::new("sudo").arg(program)
        } else {
            Self::new(program)
        }
    }

    /// Append argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append listing of arguments.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

impl Display for CommandLine {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(fmt, " {}", arg.to_string_lossy())?;
        }

        Ok(())
    }
}

/// Captured result of a non-interactive command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Combined output for diagnostics, without trailing newlines.
    pub fn diagnostic(&self) -> String {
        let mut message = String::new();
        if !self.stdout.trim().is_empty() {
            message.push_str(self.stdout.trim_end());
        }
        if !self.stderr.trim().is_empty() {
            if !message.is_empty() {
                message.push('\n');
            }
            message.push_str(self.stderr.trim_end());
        }

        message
    }
}

/// Run command attached to the terminal.
///
/// Blocks until the command exits.
///
/// # Errors
///
/// - Return [`CommandError::Spawn`] if the command cannot be started.
/// - Return [`CommandError::Failed`] if the command exits unsuccessfully.
#[instrument(skip(line), fields(command = %line), level = "debug")]
pub fn syscall_interactive(line: &CommandLine) -> Result<()> {
    let status = line
        .to_command()
        .spawn()
        .and_then(|mut child| child.wait())
        .map_err(|err| CommandError::Spawn {
            source: err,
            program: line.to_string(),
        })?;

    if !status.success() {
        return Err(CommandError::Failed {
            program: line.to_string(),
            status,
            diagnostic: "see output above".into(),
        });
    }

    Ok(())
}

/// Run command with captured output.
///
/// Never fails on exit status, callers decide what a status means.
///
/// # Errors
///
/// - Return [`CommandError::Spawn`] if the command cannot be started.
#[instrument(skip(line), fields(command = %line), level = "debug")]
pub fn syscall_non_interactive(line: &CommandLine) -> Result<CommandOutput> {
    let output = line.to_command().output().map_err(|err| CommandError::Spawn {
        source: err,
        program: line.to_string(),
    })?;

    let output = CommandOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(output.stdout.as_slice()).into_owned(),
        stderr: String::from_utf8_lossy(output.stderr.as_slice()).into_owned(),
    };
    debug!("{line} exited with {}", output.status);

    Ok(output)
}

/// Probe by running a check command.
///
/// Success means present, failure means absent, and a command that cannot
/// even start means the state is unknown.
pub fn check_succeeds(line: &CommandLine) -> ProbeState {
    match syscall_non_interactive(line) {
        Ok(output) if output.status.success() => ProbeState::Present,
        Ok(_) => ProbeState::Absent,
        Err(err) => ProbeState::Unknown(err.to_string()),
    }
}

struct RunCommand {
    line: CommandLine,
    overwrites: Vec<PathBuf>,
}

impl Apply for RunCommand {
    fn apply(&self) -> Result<(), ApplyError> {
        Ok(syscall_interactive(&self.line)?)
    }

    fn targets(&self) -> Vec<PathBuf> {
        self.overwrites.clone()
    }
}

/// Step that runs a command unless a check command succeeds.
///
/// Without a check, the command runs on every invocation.
pub fn run_command(
    id: impl Into<String>,
    check: Option<CommandLine>,
    run: CommandLine,
    overwrites: Vec<PathBuf>,
) -> ProvisioningStep {
    let description = format!("run {run}");
    let probe = move || match &check {
        Some(check) => check_succeeds(check),
        None => ProbeState::Absent,
    };

    ProvisioningStep::new(id, probe, RunCommand { line: run, overwrites })
        .description(description)
        .category(StepCategory::Command)
}

/// Command execution error types.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Command cannot be started.
    #[error("failed to run {program:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        program: String,
    },

    /// Command exited unsuccessfully.
    #[error("{program:?} failed with {status}: {diagnostic}")]
    Failed {
        program: String,
        status: ExitStatus,
        diagnostic: String,
    },
}

impl From<CommandError> for ApplyError {
    fn from(error: CommandError) -> Self {
        match error {
            CommandError::Spawn { source, program } => ApplyError::Other(format!(
                "failed to run {program:?}: {source}"
            )),
            CommandError::Failed {
                program,
                status,
                diagnostic,
            } => ApplyError::tool(program, status, diagnostic),
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = CommandError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sh(script: &str) -> CommandLine {
        CommandLine::new("sh").args(["-c", script])
    }

    #[test]
    fn capture_output() -> anyhow::Result<()> {
        let output = syscall_non_interactive(&sh("echo out; echo err >&2; exit 3"))?;
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.diagnostic(), "out\nerr");
        Ok(())
    }

    #[test]
    fn check_command_states() {
        assert_eq!(check_succeeds(&sh("true")), ProbeState::Present);
        assert_eq!(check_succeeds(&sh("false")), ProbeState::Absent);
        assert!(matches!(
            check_succeeds(&CommandLine::new("/surely/not/a/real/program")),
            ProbeState::Unknown(_)
        ));
    }

    #[test]
    fn failed_command_keeps_exit_status() {
        let error = ApplyError::from(syscall_interactive(&sh("exit 7")).unwrap_err());
        assert!(matches!(error, ApplyError::Tool { status: Some(7), .. }));
    }

    #[test]
    fn command_line_display() {
        let line = CommandLine::privileged("apt-get", true).args(["install", "-y", "tree"]);
        assert_eq!(line.to_string(), "sudo apt-get install -y tree");

        assert_eq!(CommandLine::from_argv(Vec::<String>::new()), None);
        assert_eq!(
            CommandLine::from_argv(["rbenv", "install", "3.3.0"]).map(|line| line.to_string()),
            Some("rbenv install 3.3.0".into())
        );
    }
}
