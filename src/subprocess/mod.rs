//! Launching external pipeline stages.
//!
//! [`SubprocessManager`] runs a [`StageCommand`] through a [`ProcessRunner`]:
//! [`TokioProcessRunner`] in production, [`MockProcessRunner`] in tests.

pub mod command;
pub mod error;
pub mod mock;
pub mod runner;

#[cfg(test)]
mod tests;

pub use command::StageCommand;
pub use error::ProcessError;
pub use mock::{MockProcessRunner, ScriptedRunBuilder};
pub use runner::{ExitStatus, ProcessRunner, StageOutput, TokioProcessRunner};

use std::sync::Arc;

#[derive(Clone)]
pub struct SubprocessManager {
    runner: Arc<dyn ProcessRunner>,
}

impl SubprocessManager {
    pub fn production() -> Self {
        Self {
            runner: Arc::new(TokioProcessRunner),
        }
    }

    pub fn mock() -> (Self, MockProcessRunner) {
        let mock = MockProcessRunner::new();
        let manager = Self {
            runner: Arc::new(mock.clone()),
        };
        (manager, mock)
    }

    pub async fn run(&self, command: StageCommand) -> Result<StageOutput, ProcessError> {
        tracing::debug!("Running {}", command.display());
        if let Some(dir) = &command.working_dir {
            tracing::trace!("Working directory: {}", dir.display());
        }

        let result = self.runner.run(command.clone()).await;
        match &result {
            Ok(output) => match output.status {
                ExitStatus::Signal(signal) => tracing::warn!(
                    "'{}' terminated by signal {} after {:?}",
                    command.stage_name(),
                    signal,
                    output.duration
                ),
                status => tracing::debug!(
                    "'{}' finished with {:?} in {:?} ({} bytes stdout, {} bytes stderr)",
                    command.stage_name(),
                    status,
                    output.duration,
                    output.stdout.len(),
                    output.stderr.len()
                ),
            },
            Err(e) => tracing::debug!("'{}' did not complete: {}", command.stage_name(), e),
        }
        result
    }
}
