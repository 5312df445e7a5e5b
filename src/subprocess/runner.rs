use async_trait::async_trait;
use std::time::{Duration, Instant};

use super::command::StageCommand;
use super::error::ProcessError;
use crate::config::DiagnosticChannel;

/// What a finished stage left behind, besides the transfer file
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl StageOutput {
    /// Captured text on the stream(s) that count as diagnostics
    pub fn diagnostics(&self, channel: DiagnosticChannel) -> String {
        match channel {
            DiagnosticChannel::Stdout => self.stdout.clone(),
            DiagnosticChannel::Stderr => self.stderr.clone(),
            DiagnosticChannel::Both => format!("{}{}", self.stdout, self.stderr),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Error(i32),
    Signal(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        if status.success() {
            return ExitStatus::Success;
        }
        if let Some(code) = status.code() {
            return ExitStatus::Error(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitStatus::Signal(signal);
            }
        }
        ExitStatus::Error(1)
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: StageCommand) -> Result<StageOutput, ProcessError>;
}

/// Spawns the interpreter for real
pub struct TokioProcessRunner;

fn spawn_error(error: std::io::Error, interpreter: &str) -> ProcessError {
    if error.kind() == std::io::ErrorKind::NotFound {
        ProcessError::InterpreterNotFound(interpreter.to_string())
    } else {
        ProcessError::Io(error)
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: StageCommand) -> Result<StageOutput, ProcessError> {
        let start = Instant::now();
        let child = command
            .to_tokio()
            .spawn()
            .map_err(|e| spawn_error(e, &command.interpreter))?;

        // Dropping the future on timeout drops the child, which kills it
        let output = match command.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ProcessError::Timeout(limit))??,
            None => child.wait_with_output().await?,
        };

        Ok(StageOutput {
            status: output.status.into(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: start.elapsed(),
        })
    }
}
