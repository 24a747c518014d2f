//! Host command execution for the node-side iSCSI and mount tooling.

use std::process::Command;

use thiserror::Error;
use tracing::debug;

/// Captured result of a host command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code, absent when the process was killed by a signal.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the process exited with status zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Output with the given exit code and empty streams.
    #[must_use]
    pub const fn with_code(code: i32) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

/// Failures running host commands.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum CommandError {
    /// The program could not be started.
    #[error("failed to start {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Operating system error text.
        message: String,
    },
    /// The program ran and exited unsuccessfully.
    #[error("{program} exited with {}: {stderr}", display_code(*code))]
    Failed {
        /// Program that failed.
        program: String,
        /// Exit code, if any.
        code: Option<i32>,
        /// Trimmed standard error.
        stderr: String,
    },
}

fn display_code(code: Option<i32>) -> String {
    code.map_or_else(|| String::from("no status"), |value| format!("status {value}"))
}

/// Runs host programs. Implemented by a fake in tests.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args` and captures its output.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Spawn`] when the program cannot be started.
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CommandError>;

    /// Runs `program` and treats a non-zero exit as an error.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Spawn`] or [`CommandError::Failed`].
    fn run_checked(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CommandError> {
        let output = self.run(program, args)?;
        if output.is_success() {
            Ok(output)
        } else {
            Err(CommandError::Failed {
                program: program.to_owned(),
                code: output.code,
                stderr: output.stderr.trim().to_owned(),
            })
        }
    }
}

/// Runner that spawns real processes.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CommandError> {
        debug!(program, ?args, "running host command");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| CommandError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
