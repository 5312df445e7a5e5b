//! Common test utilities and helpers

#![allow(dead_code)]

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Builds a throwaway application directory with views and `sh` stages
pub struct TestAppBuilder {
    temp_dir: TempDir,
    stages: Vec<(String, String)>,
    views: Vec<(String, String)>,
    config: Option<String>,
}

impl TestAppBuilder {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp_dir: TempDir::new()?,
            stages: Vec::new(),
            views: Vec::new(),
            config: None,
        })
    }

    /// Add a stage script; it runs as `sh <script> <transfer file>`
    pub fn with_stage(mut self, name: &str, body: &str) -> Self {
        self.stages.push((name.to_string(), body.to_string()));
        self
    }

    pub fn with_view(mut self, file_name: &str, html: &str) -> Self {
        self.views.push((file_name.to_string(), html.to_string()));
        self
    }

    /// Extra `pipeline-shell.toml` content, appended after `interpreter = "sh"`
    pub fn with_config(mut self, toml: &str) -> Self {
        self.config = Some(toml.to_string());
        self
    }

    pub fn build(self) -> Result<TestApp> {
        let root = self.temp_dir.path().to_path_buf();
        let stage_dir = root.join("lib").join("pipeline");
        fs::create_dir_all(&stage_dir)?;

        for (name, body) in &self.stages {
            fs::write(stage_dir.join(name), body)?;
        }
        for (file_name, html) in &self.views {
            fs::write(root.join(file_name), html)?;
        }

        let mut config = String::from("interpreter = \"sh\"\n");
        if let Some(extra) = &self.config {
            config.push_str(extra);
        }
        fs::write(root.join("pipeline-shell.toml"), config)?;

        Ok(TestApp {
            _temp_dir: self.temp_dir,
            root,
        })
    }
}

pub struct TestApp {
    _temp_dir: TempDir,
    root: PathBuf,
}

impl TestApp {
    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn transfer_file(&self) -> PathBuf {
        self.root.join("args.json")
    }

    pub fn shell_config(&self) -> pipeline_shell::config::ShellConfig {
        let mut config = pipeline_shell::config::ShellConfig::for_app_dir(&self.root);
        config.interpreter = "sh".to_string();
        config
    }
}

/// Stage that overwrites the transfer file with `json`
pub fn stage_writing(json: &str) -> String {
    format!("printf '%s' '{}' > \"$1\"\n", json)
}

/// Stage that prints `message` and leaves the transfer file alone
pub fn stage_printing(message: &str) -> String {
    format!("echo '{}'\n", message)
}
