// SPDX-License-Identifier: PMPL-1.0-or-later

//! Subprocess execution for backend commands

use crate::error::BackendError;
use std::fmt;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// A program plus its arguments, never passed through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ShellCommand {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
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

    /// Build from a whitespace-separated line, e.g. `"tc qdisc del dev eth0 root"`.
    pub fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        let program = words.next().unwrap_or_default();
        Self::new(program).args(words)
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: &str) -> Self {
        Self {
            success: true,
            status: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn failed(status: i32, stderr: &str) -> Self {
        Self {
            success: false,
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }
}

/// The only place ruckus spawns processes.
pub trait CommandRunner: Send + Sync {
    /// Run to completion. `Err` only when the process could not be started.
    fn run(&self, command: &ShellCommand) -> Result<CommandOutput, BackendError>;

    /// Run and treat a non-zero exit as an error.
    fn run_checked(&self, command: &ShellCommand) -> Result<CommandOutput, BackendError> {
        let output = self.run(command)?;
        if output.success {
            Ok(output)
        } else {
            Err(BackendError::CommandFailed {
                command: command.to_string(),
                status: output
                    .status
                    .map(|code| format!("status {}", code))
                    .unwrap_or_else(|| "a signal".to_string()),
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    /// Run a removal command whose failure just means "nothing to remove".
    fn run_tolerant(&self, command: &ShellCommand) -> Result<(), BackendError> {
        let output = self.run(command)?;
        if !output.success {
            debug!(command = %command, stderr = output.stderr.trim(), "ignored failure");
        }
        Ok(())
    }
}

/// Executes commands on the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, command: &ShellCommand) -> Result<CommandOutput, BackendError> {
        debug!(command = %command, "exec");
        let output = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|err| BackendError::Spawn {
                command: command.to_string(),
                reason: err.to_string(),
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Records every command and answers from canned rules.
///
/// Backs `--dry-run` (everything succeeds, nothing is executed) and the
/// backend tests (selected commands fail or return fixed output).
#[derive(Debug, Clone, Default)]
pub struct RecordingRunner {
    log: Arc<Mutex<Vec<ShellCommand>>>,
    rules: Arc<Mutex<Vec<(String, CommandOutput)>>>,
    echo: bool,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Print each command to stdout as it is "run".
    pub fn echoing() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    /// Any command whose rendered line contains `needle` gets `output`.
    /// Later rules win over earlier ones.
    pub fn respond(&self, needle: &str, output: CommandOutput) -> &Self {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((needle.to_string(), output));
        self
    }

    pub fn fail_on(&self, needle: &str) -> &Self {
        self.respond(needle, CommandOutput::failed(2, "simulated failure"))
    }

    pub fn commands(&self) -> Vec<ShellCommand> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.commands().iter().map(ToString::to_string).collect()
    }

    pub fn clear_log(&self) {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, command: &ShellCommand) -> Result<CommandOutput, BackendError> {
        let line = command.to_string();
        if self.echo {
            println!("  [dry-run] {}", line);
        }
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.clone());
        let rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        let answer = rules
            .iter()
            .rev()
            .find(|(needle, _)| line.contains(needle.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| CommandOutput::ok(""));
        Ok(answer)
    }
}
