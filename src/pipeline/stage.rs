//! Runs one external pipeline stage through the shared transfer file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use super::state::PipelineState;
use super::PipelineError;
use crate::config::{DiagnosticChannel, DiagnosticPolicy, ShellConfig};
use crate::subprocess::{ExitStatus, StageCommand, StageOutput, SubprocessManager};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "message", rename_all = "lowercase")]
pub enum ExecutionOutcome {
    Succeeded,
    Failed(String),
    Malformed(String),
}

/// One stage run, kept in memory for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub stage: String,
    pub module: usize,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub outcome: ExecutionOutcome,
}

#[derive(Debug, PartialEq, Eq)]
enum Verdict {
    Passed { warning: Option<String> },
    Failed(String),
}

fn evaluate(output: &StageOutput, channel: DiagnosticChannel, policy: DiagnosticPolicy) -> Verdict {
    let diagnostics = output.diagnostics(channel);

    match (policy, output.status) {
        (DiagnosticPolicy::Strict, _) if diagnostics.is_empty() => Verdict::Passed { warning: None },
        (DiagnosticPolicy::Strict, _) => Verdict::Failed(diagnostics),
        (DiagnosticPolicy::ExitStatus, ExitStatus::Success) => Verdict::Passed {
            warning: (!diagnostics.is_empty()).then_some(diagnostics),
        },
        (DiagnosticPolicy::ExitStatus, _) if !diagnostics.is_empty() => Verdict::Failed(diagnostics),
        (DiagnosticPolicy::ExitStatus, ExitStatus::Signal(signal)) => {
            Verdict::Failed(format!("stage terminated by signal {signal}"))
        }
        (DiagnosticPolicy::ExitStatus, ExitStatus::Error(code)) => {
            Verdict::Failed(format!("stage exited with code {code}"))
        }
    }
}

/// Stage names are file names inside the stage directory
fn validate_stage_name(stage: &str) -> Result<(), PipelineError> {
    let valid = !stage.is_empty()
        && stage != "."
        && !stage.contains("..")
        && !stage.contains('/')
        && !stage.contains('\\');

    if valid {
        Ok(())
    } else {
        Err(PipelineError::InvalidStageName(stage.to_string()))
    }
}

pub struct StageRunner {
    config: Arc<ShellConfig>,
    subprocess: SubprocessManager,
    transfer_lock: Mutex<()>,
    history: std::sync::Mutex<Vec<ExecutionRecord>>,
}

impl StageRunner {
    pub fn new(config: Arc<ShellConfig>, subprocess: SubprocessManager) -> Self {
        Self {
            config,
            subprocess,
            transfer_lock: Mutex::new(()),
            history: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn history(&self) -> Vec<ExecutionRecord> {
        self.history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }

    /// Execute `stage` with `argument_json` for the module that is current
    /// when the call starts.
    ///
    /// Runs are serialized on the transfer file; a second call waits for the
    /// first to finish. On success the stage's rewritten transfer file is the
    /// module's result, which is also returned.
    pub async fn execute(
        &self,
        state: &Mutex<PipelineState>,
        stage: &str,
        argument_json: &str,
    ) -> Result<Value, PipelineError> {
        let argument: Value =
            serde_json::from_str(argument_json).map_err(PipelineError::MalformedArgument)?;
        validate_stage_name(stage)?;

        let _transfer = self.transfer_lock.lock().await;

        let module = {
            let mut state = state.lock().await;
            let module = state.current_index();
            state.set_argument(module, argument);
            module
        };

        let started_at = Utc::now();
        let start = Instant::now();
        let outcome = self.run_stage(stage, argument_json).await;

        let record_outcome = match &outcome {
            Ok(_) => ExecutionOutcome::Succeeded,
            Err(PipelineError::MalformedResult(e)) => ExecutionOutcome::Malformed(e.to_string()),
            Err(e) => ExecutionOutcome::Failed(e.wire_message()),
        };
        self.record(ExecutionRecord {
            stage: stage.to_string(),
            module,
            started_at,
            duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            outcome: record_outcome,
        });

        let result = outcome?;
        state.lock().await.set_result(module, result.clone());
        tracing::info!("Stage '{}' completed for module {}", stage, module);
        Ok(result)
    }

    async fn run_stage(&self, stage: &str, argument_json: &str) -> Result<Value, PipelineError> {
        let command = StageCommand::for_stage(&self.config, stage);
        let transfer_path = command.transfer_path();
        tokio::fs::write(&transfer_path, argument_json)
            .await
            .map_err(|source| PipelineError::TransferFile {
                path: transfer_path.clone(),
                source,
            })?;

        let output = self.subprocess.run(command).await?;

        match evaluate(
            &output,
            self.config.diagnostic_channel,
            self.config.diagnostic_policy,
        ) {
            Verdict::Failed(message) => {
                tracing::warn!("Stage '{}' failed: {}", stage, message.trim_end());
                return Err(PipelineError::StageFailed(message));
            }
            Verdict::Passed {
                warning: Some(warning),
            } => {
                tracing::warn!("Stage '{}' reported: {}", stage, warning.trim_end());
            }
            Verdict::Passed { warning: None } => {}
        }

        let content = tokio::fs::read_to_string(&transfer_path)
            .await
            .map_err(|source| PipelineError::TransferFile {
                path: transfer_path.clone(),
                source,
            })?;
        serde_json::from_str(&content).map_err(PipelineError::MalformedResult)
    }

    fn record(&self, record: ExecutionRecord) {
        if let Ok(mut history) = self.history.lock() {
            history.push(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subprocess::MockProcessRunner;
    use serde_json::json;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    fn output(status: ExitStatus, stdout: &str, stderr: &str) -> StageOutput {
        StageOutput {
            status,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            duration: Duration::from_millis(1),
        }
    }

    fn runner_in(dir: &TempDir) -> (StageRunner, MockProcessRunner) {
        let (manager, mock) = SubprocessManager::mock();
        let config = Arc::new(ShellConfig::for_app_dir(dir.path()));
        (StageRunner::new(config, manager), mock)
    }

    #[test]
    fn test_strict_policy_fails_on_any_output() {
        let verdict = evaluate(
            &output(ExitStatus::Success, "warning: deprecated\n", ""),
            DiagnosticChannel::Stdout,
            DiagnosticPolicy::Strict,
        );
        assert_eq!(verdict, Verdict::Failed("warning: deprecated\n".to_string()));
    }

    #[test]
    fn test_strict_policy_ignores_exit_code() {
        let verdict = evaluate(
            &output(ExitStatus::Error(2), "", ""),
            DiagnosticChannel::Stdout,
            DiagnosticPolicy::Strict,
        );
        assert_eq!(verdict, Verdict::Passed { warning: None });
    }

    #[test]
    fn test_channel_selection() {
        let out = output(ExitStatus::Success, "", "boom");
        assert_eq!(
            evaluate(&out, DiagnosticChannel::Stdout, DiagnosticPolicy::Strict),
            Verdict::Passed { warning: None }
        );
        assert_eq!(
            evaluate(&out, DiagnosticChannel::Stderr, DiagnosticPolicy::Strict),
            Verdict::Failed("boom".to_string())
        );
        assert_eq!(
            evaluate(
                &output(ExitStatus::Success, "a", "b"),
                DiagnosticChannel::Both,
                DiagnosticPolicy::Strict
            ),
            Verdict::Failed("ab".to_string())
        );
    }

    #[test]
    fn test_exit_status_policy() {
        let policy = DiagnosticPolicy::ExitStatus;
        let channel = DiagnosticChannel::Stdout;

        assert_eq!(
            evaluate(&output(ExitStatus::Success, "note", ""), channel, policy),
            Verdict::Passed {
                warning: Some("note".to_string())
            }
        );
        assert_eq!(
            evaluate(&output(ExitStatus::Error(3), "", ""), channel, policy),
            Verdict::Failed("stage exited with code 3".to_string())
        );
        assert_eq!(
            evaluate(&output(ExitStatus::Error(3), "bad input", ""), channel, policy),
            Verdict::Failed("bad input".to_string())
        );
        assert_eq!(
            evaluate(&output(ExitStatus::Signal(9), "", ""), channel, policy),
            Verdict::Failed("stage terminated by signal 9".to_string())
        );
    }

    #[test]
    fn test_stage_name_validation() {
        assert!(validate_stage_name("stage0.py").is_ok());
        for bad in ["", ".", "..", "../etc/passwd", "lib/stage", "a\\b"] {
            assert!(
                matches!(
                    validate_stage_name(bad),
                    Err(PipelineError::InvalidStageName(_))
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_malformed_argument_leaves_state_untouched() {
        let dir = TempDir::new().unwrap();
        let (runner, mock) = runner_in(&dir);
        let state = Mutex::new(PipelineState::new());

        let err = runner.execute(&state, "stage0", "{not json").await.unwrap_err();
        assert!(matches!(err, PipelineError::MalformedArgument(_)));
        assert_eq!(state.lock().await.result(0), None);
        assert_eq!(state.lock().await.argument(0), Some(&json!({})));
        assert!(mock.calls().is_empty());
        assert!(runner.history().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_stage_name_never_spawns() {
        let dir = TempDir::new().unwrap();
        let (runner, mock) = runner_in(&dir);
        let state = Mutex::new(PipelineState::new());

        let err = runner
            .execute(&state, "../escape", "{}")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidStageName(_)));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_successful_stage_records_result() {
        let dir = TempDir::new().unwrap();
        let (runner, mock) = runner_in(&dir);
        mock.on_stage("stage0")
            .writes_transfer(r#"{"a":1,"b":2}"#)
            .install();
        let state = Mutex::new(PipelineState::new());

        let result = runner.execute(&state, "stage0", r#"{"a":1}"#).await.unwrap();
        assert_eq!(result, json!({"a": 1, "b": 2}));

        let state = state.lock().await;
        assert_eq!(state.argument(0), Some(&json!({"a": 1})));
        assert_eq!(state.result(0), Some(&json!({"a": 1, "b": 2})));

        let call = &mock.calls()[0];
        assert_eq!(call.script, PathBuf::from("lib/pipeline/stage0"));
        assert_eq!(call.transfer_file, PathBuf::from("args.json"));
        assert_eq!(call.working_dir.as_deref(), Some(dir.path()));

        let history = runner.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].outcome, ExecutionOutcome::Succeeded);
        assert_eq!(history[0].module, 0);
    }

    #[tokio::test]
    async fn test_untouched_transfer_file_echoes_argument() {
        let dir = TempDir::new().unwrap();
        let (runner, mock) = runner_in(&dir);
        mock.on_stage("noop").install();
        let state = Mutex::new(PipelineState::new());

        let result = runner.execute(&state, "noop", r#"[1,2,3]"#).await.unwrap();
        assert_eq!(result, json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn test_diagnostic_output_fails_stage() {
        let dir = TempDir::new().unwrap();
        let (runner, mock) = runner_in(&dir);
        mock.on_stage("stage0")
            .prints("KeyError: 'column'\n")
            .install();
        let state = Mutex::new(PipelineState::new());
        state.lock().await.set_result(0, json!({"previous": true}));

        let err = runner.execute(&state, "stage0", "{}").await.unwrap_err();
        match err {
            PipelineError::StageFailed(message) => assert_eq!(message, "KeyError: 'column'\n"),
            other => panic!("Expected StageFailed, got {other:?}"),
        }
        assert_eq!(
            state.lock().await.result(0),
            Some(&json!({"previous": true}))
        );
        assert!(matches!(
            runner.history()[0].outcome,
            ExecutionOutcome::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_malformed_result_is_not_recorded() {
        let dir = TempDir::new().unwrap();
        let (runner, mock) = runner_in(&dir);
        mock.on_stage("stage0").writes_transfer("half{").install();
        let state = Mutex::new(PipelineState::new());

        let err = runner.execute(&state, "stage0", "{}").await.unwrap_err();
        assert!(matches!(err, PipelineError::MalformedResult(_)));
        assert_eq!(state.lock().await.result(0), None);
        assert!(matches!(
            runner.history()[0].outcome,
            ExecutionOutcome::Malformed(_)
        ));
    }

    #[tokio::test]
    async fn test_result_lands_on_current_module() {
        let dir = TempDir::new().unwrap();
        let (runner, mock) = runner_in(&dir);
        mock.on_stage("stage2").install();
        let state = Mutex::new(PipelineState::new());
        state.lock().await.set_current_index(2);

        runner.execute(&state, "stage2", r#"{"x":0}"#).await.unwrap();

        let state = state.lock().await;
        assert_eq!(state.argument(2), Some(&json!({"x": 0})));
        assert_eq!(state.result(2), Some(&json!({"x": 0})));
        assert_eq!(state.result(0), None);
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_reported() {
        let dir = TempDir::new().unwrap();
        let mut config = ShellConfig::for_app_dir(dir.path());
        config.interpreter = "nonexistent-interpreter-12345".to_string();
        let runner = StageRunner::new(Arc::new(config), SubprocessManager::production());
        let state = Mutex::new(PipelineState::new());

        let err = runner.execute(&state, "stage0", "{}").await.unwrap_err();
        assert!(matches!(err, PipelineError::Process(_)));
        assert_eq!(state.lock().await.result(0), None);
    }
}
