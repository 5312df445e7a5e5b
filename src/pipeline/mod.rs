//! The module/pipeline state machine.
//!
//! - [`PipelineState`] - per-module arguments and results, current module
//! - [`Navigator`] - reachability and the `Idle → Loading → Ready` handshake
//! - [`StageRunner`] - runs an external stage through the transfer file
//! - [`Pipeline`] - one owned session tying the three together

pub mod navigator;
pub mod stage;
pub mod state;

pub use navigator::{ModulePayload, NavigationPhase, Navigator, ViewHost, ViewHostError};
pub use stage::{ExecutionOutcome, ExecutionRecord, StageRunner};
pub use state::PipelineState;

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::ShellConfig;
use crate::subprocess::{ProcessError, SubprocessManager};

/// Sentinel sent back on `LOADMODULE` when a module cannot be reached
pub const DENIED: &str = "DENIED";

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Module {target} is not reachable")]
    NotReachable { target: i64 },

    #[error("Malformed stage argument: {0}")]
    MalformedArgument(#[source] serde_json::Error),

    #[error("Invalid stage name: {0:?}")]
    InvalidStageName(String),

    #[error("{0}")]
    StageFailed(String),

    #[error("Stage timed out after {0:?}")]
    StageTimeout(Duration),

    #[error("Stage wrote a malformed result: {0}")]
    MalformedResult(#[source] serde_json::Error),

    #[error("Transfer file {path:?}: {source}")]
    TransferFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Process(ProcessError),

    #[error("View host error: {0}")]
    ViewHost(#[from] ViewHostError),
}

impl From<ProcessError> for PipelineError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::Timeout(duration) => PipelineError::StageTimeout(duration),
            other => PipelineError::Process(other),
        }
    }
}

impl PipelineError {
    /// The string handed to the presentation layer for this error.
    ///
    /// A failed stage reports its captured output verbatim.
    pub fn wire_message(&self) -> String {
        match self {
            PipelineError::NotReachable { .. } => DENIED.to_string(),
            PipelineError::StageFailed(output) => output.clone(),
            other => other.to_string(),
        }
    }
}

/// Diagnostic view of a running session
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSnapshot {
    pub state: PipelineState,
    pub navigation: NavigationPhase,
    pub executions: Vec<ExecutionRecord>,
}

/// One pipeline session: the owned state plus the components that mutate it
pub struct Pipeline {
    state: Mutex<PipelineState>,
    navigator: Mutex<Navigator>,
    stages: StageRunner,
}

impl Pipeline {
    pub fn new(
        config: Arc<ShellConfig>,
        subprocess: SubprocessManager,
        view_host: Arc<dyn ViewHost>,
    ) -> Self {
        let navigator = Navigator::new(view_host)
            .with_module_count(config.module_count)
            .with_view_naming(&config.view_prefix, &config.view_extension);

        Self {
            state: Mutex::new(PipelineState::new()),
            navigator: Mutex::new(navigator),
            stages: StageRunner::new(config, subprocess),
        }
    }

    pub async fn request_go_to(&self, target: i64) -> Result<(), PipelineError> {
        let mut navigator = self.navigator.lock().await;
        let mut state = self.state.lock().await;
        navigator.request_go_to(&mut state, target)
    }

    pub async fn view_ready(&self) -> Option<ModulePayload> {
        let mut navigator = self.navigator.lock().await;
        let state = self.state.lock().await;
        navigator.view_ready(&state)
    }

    pub async fn execute(&self, stage: &str, argument_json: &str) -> Result<(), PipelineError> {
        self.stages
            .execute(&self.state, stage, argument_json)
            .await
            .map(|_| ())
    }

    pub async fn state(&self) -> PipelineState {
        self.state.lock().await.clone()
    }

    pub async fn snapshot(&self) -> PipelineSnapshot {
        let navigation = self.navigator.lock().await.phase();
        let state = self.state.lock().await.clone();
        PipelineSnapshot {
            state,
            navigation,
            executions: self.stages.history(),
        }
    }
}
