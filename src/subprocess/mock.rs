use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::command::StageCommand;
use super::error::ProcessError;
use super::runner::{ExitStatus, ProcessRunner, StageOutput};

/// Runner that plays back scripted stage runs instead of spawning.
///
/// Runs are keyed by the stage's file name. A scripted run can rewrite the
/// transfer file the way a real stage would.
#[derive(Clone, Default)]
pub struct MockProcessRunner {
    scripts: Arc<Mutex<HashMap<String, ScriptedRun>>>,
    calls: Arc<Mutex<Vec<StageCommand>>>,
}

#[derive(Debug, Clone)]
struct ScriptedRun {
    writes_transfer: Option<String>,
    stdout: String,
    stderr: String,
    status: ExitStatus,
}

pub struct ScriptedRunBuilder {
    runner: MockProcessRunner,
    stage: String,
    run: ScriptedRun,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script what running `stage` does; the default is a silent success
    pub fn on_stage(&self, stage: &str) -> ScriptedRunBuilder {
        ScriptedRunBuilder {
            runner: self.clone(),
            stage: stage.to_string(),
            run: ScriptedRun {
                writes_transfer: None,
                stdout: String::new(),
                stderr: String::new(),
                status: ExitStatus::Success,
            },
        }
    }

    /// Every command received so far, in order
    pub fn calls(&self) -> Vec<StageCommand> {
        locked(&self.calls).clone()
    }
}

impl ScriptedRunBuilder {
    pub fn writes_transfer(mut self, content: &str) -> Self {
        self.run.writes_transfer = Some(content.to_string());
        self
    }

    pub fn prints(mut self, stdout: &str) -> Self {
        self.run.stdout = stdout.to_string();
        self
    }

    pub fn prints_stderr(mut self, stderr: &str) -> Self {
        self.run.stderr = stderr.to_string();
        self
    }

    pub fn exits_with(mut self, code: i32) -> Self {
        self.run.status = if code == 0 {
            ExitStatus::Success
        } else {
            ExitStatus::Error(code)
        };
        self
    }

    pub fn install(self) {
        locked(&self.runner.scripts).insert(self.stage, self.run);
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn run(&self, command: StageCommand) -> Result<StageOutput, ProcessError> {
        locked(&self.calls).push(command.clone());

        let stage = command.stage_name();
        let run = locked(&self.scripts)
            .get(&stage)
            .cloned()
            .ok_or(ProcessError::Unscripted(stage))?;

        if let Some(content) = &run.writes_transfer {
            tokio::fs::write(command.transfer_path(), content).await?;
        }

        Ok(StageOutput {
            status: run.status,
            stdout: run.stdout,
            stderr: run.stderr,
            duration: Duration::from_millis(1),
        })
    }
}
