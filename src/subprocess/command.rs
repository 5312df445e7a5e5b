use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::ShellConfig;

/// One stage invocation: `<interpreter> <script> <transfer file>`.
///
/// `script` and `transfer_file` are resolved by the child, so when a
/// `working_dir` is set they are relative to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommand {
    pub interpreter: String,
    pub script: PathBuf,
    pub transfer_file: PathBuf,
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl StageCommand {
    pub fn new(
        interpreter: impl Into<String>,
        script: impl Into<PathBuf>,
        transfer_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
            transfer_file: transfer_file.into(),
            working_dir: None,
            timeout: None,
        }
    }

    /// The invocation of `stage` inside the application directory
    pub fn for_stage(config: &ShellConfig, stage: &str) -> Self {
        Self::new(
            config.interpreter.clone(),
            config.stage_dir.join(stage),
            config.transfer_file.clone(),
        )
        .in_dir(&config.app_dir)
        .with_timeout(config.stage_timeout)
    }

    pub fn in_dir(mut self, dir: &Path) -> Self {
        self.working_dir = Some(dir.to_path_buf());
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Transfer file path as seen from this process
    pub fn transfer_path(&self) -> PathBuf {
        match &self.working_dir {
            Some(dir) => dir.join(&self.transfer_file),
            None => self.transfer_file.clone(),
        }
    }

    pub fn stage_name(&self) -> String {
        self.script
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn display(&self) -> String {
        format!(
            "{} {} {}",
            self.interpreter,
            self.script.display(),
            self.transfer_file.display()
        )
    }

    pub(crate) fn to_tokio(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.interpreter);
        cmd.arg(&self.script).arg(&self.transfer_file);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.kill_on_drop(true)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        cmd
    }
}
