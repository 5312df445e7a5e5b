use anyhow::{anyhow, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod loader;

pub use loader::ConfigLoader;

/// File name looked up inside the application directory
pub const APP_CONFIG_FILE: &str = "pipeline-shell.toml";

/// Get the per-user directory that may hold a `config.toml`
pub fn get_user_config_dir() -> Result<PathBuf> {
    ProjectDirs::from("edu", "pathlabs", "pipeline-shell")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or_else(|| anyhow!("Could not determine home directory"))
}

/// Which captured output stream counts as a stage's diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticChannel {
    Stdout,
    Stderr,
    Both,
}

/// How a finished stage is judged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticPolicy {
    /// Any diagnostic output fails the stage, whatever the exit status
    Strict,
    /// Only a non-zero exit status fails the stage; output is logged as a warning
    ExitStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShellConfig {
    pub app_dir: PathBuf,
    pub interpreter: String,
    pub stage_dir: PathBuf,
    pub transfer_file: PathBuf,
    pub view_prefix: String,
    pub view_extension: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_count: Option<usize>,
    pub bind_address: IpAddr,
    pub port: u16,
    pub diagnostic_channel: DiagnosticChannel,
    pub diagnostic_policy: DiagnosticPolicy,
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub stage_timeout: Option<Duration>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            app_dir: PathBuf::from("."),
            interpreter: "python".to_string(),
            stage_dir: PathBuf::from("lib").join("pipeline"),
            transfer_file: PathBuf::from("args.json"),
            view_prefix: "module".to_string(),
            view_extension: "html".to_string(),
            module_count: None,
            bind_address: IpAddr::from([127, 0, 0, 1]),
            port: 8080,
            diagnostic_channel: DiagnosticChannel::Stdout,
            diagnostic_policy: DiagnosticPolicy::Strict,
            stage_timeout: None,
        }
    }
}

impl ShellConfig {
    /// Build a default configuration rooted at `app_dir`
    pub fn for_app_dir(app_dir: impl Into<PathBuf>) -> Self {
        Self {
            app_dir: app_dir.into(),
            ..Self::default()
        }
    }

    pub fn merge_env_vars(&mut self) {
        self.apply_env(|key| std::env::var(key).ok());
    }

    /// Apply `PIPELINE_SHELL_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("PIPELINE_SHELL_APP_DIR") {
            self.app_dir = PathBuf::from(dir);
        }

        if let Some(interpreter) = lookup("PIPELINE_SHELL_INTERPRETER") {
            self.interpreter = interpreter;
        }

        if let Some(port) = lookup("PIPELINE_SHELL_PORT") {
            match port.parse::<u16>() {
                Ok(value) => self.port = value,
                Err(_) => tracing::warn!("Ignoring invalid PIPELINE_SHELL_PORT: {}", port),
            }
        }

        if let Some(bind) = lookup("PIPELINE_SHELL_BIND") {
            match bind.parse::<IpAddr>() {
                Ok(value) => self.bind_address = value,
                Err(_) => tracing::warn!("Ignoring invalid PIPELINE_SHELL_BIND: {}", bind),
            }
        }

        if let Some(timeout) = lookup("PIPELINE_SHELL_STAGE_TIMEOUT") {
            match humantime_serde::re::humantime::parse_duration(&timeout) {
                Ok(value) => self.stage_timeout = Some(value),
                Err(_) => {
                    tracing::warn!("Ignoring invalid PIPELINE_SHELL_STAGE_TIMEOUT: {}", timeout)
                }
            }
        }

        if let Some(policy) = lookup("PIPELINE_SHELL_DIAGNOSTIC_POLICY") {
            match policy.as_str() {
                "strict" => self.diagnostic_policy = DiagnosticPolicy::Strict,
                "exit-status" => self.diagnostic_policy = DiagnosticPolicy::ExitStatus,
                _ => tracing::warn!(
                    "Ignoring invalid PIPELINE_SHELL_DIAGNOSTIC_POLICY: {}",
                    policy
                ),
            }
        }
    }

    /// File name of the view for `module`, e.g. `module3.html`
    pub fn view_file_name(&self, module: usize) -> String {
        format!("{}{}.{}", self.view_prefix, module, self.view_extension)
    }

    pub fn transfer_path(&self) -> PathBuf {
        self.app_dir.join(&self.transfer_file)
    }
}

pub fn config_path_in(app_dir: &Path) -> PathBuf {
    app_dir.join(APP_CONFIG_FILE)
}
