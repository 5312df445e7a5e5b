use super::{config_path_in, get_user_config_dir, ShellConfig};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Layers TOML files on top of the built-in defaults.
///
/// Later layers win key by key. Environment overrides are applied last, in
/// [`ConfigLoader::build`].
#[derive(Debug, Default)]
pub struct ConfigLoader {
    merged: toml::Table,
    sources: Vec<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `config.toml` from the per-user config directory, if present
    pub async fn load_user(&mut self) -> Result<bool> {
        match get_user_config_dir() {
            Ok(dir) => self.load_optional(&dir.join("config.toml")).await,
            Err(e) => {
                tracing::debug!("Skipping user config: {}", e);
                Ok(false)
            }
        }
    }

    /// Merge `path` when it exists; a missing file is not an error
    pub async fn load_optional(&mut self, path: &Path) -> Result<bool> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            tracing::trace!("No config at {}", path.display());
            return Ok(false);
        }
        self.load_file(path).await?;
        Ok(true)
    }

    /// Merge `path`, failing if it is missing or not valid TOML
    pub async fn load_file(&mut self, path: &Path) -> Result<()> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let table: toml::Table = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        tracing::debug!("Loaded {} keys from {}", table.len(), path.display());
        self.merge(table);
        self.sources.push(path.to_path_buf());
        Ok(())
    }

    pub fn merge(&mut self, table: toml::Table) {
        for (key, value) in table {
            self.merged.insert(key, value);
        }
    }

    /// The `app_dir` the layers merged so far point at, if any
    pub fn app_dir(&self) -> Option<PathBuf> {
        self.merged
            .get("app_dir")
            .and_then(|v| v.as_str())
            .map(PathBuf::from)
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn build(self) -> Result<ShellConfig> {
        let mut config: ShellConfig = toml::Value::Table(self.merged)
            .try_into()
            .context("Invalid configuration")?;
        config.merge_env_vars();
        Ok(config)
    }
}

/// Load the effective configuration.
///
/// Order: defaults, user config, `<app_dir>/pipeline-shell.toml`, the
/// explicit `config_file`, then `PIPELINE_SHELL_*` variables. An `app_dir`
/// passed here wins over every layer.
pub async fn load_config(app_dir: Option<&Path>, config_file: Option<&Path>) -> Result<ShellConfig> {
    let mut loader = ConfigLoader::new();
    loader.load_user().await?;

    let search_dir = app_dir
        .map(Path::to_path_buf)
        .or_else(|| std::env::var("PIPELINE_SHELL_APP_DIR").ok().map(PathBuf::from))
        .or_else(|| loader.app_dir())
        .unwrap_or_else(|| PathBuf::from("."));
    loader.load_optional(&config_path_in(&search_dir)).await?;

    if let Some(path) = config_file {
        loader.load_file(path).await?;
    }

    tracing::debug!("Configuration sources: {:?}", loader.sources());

    let mut config = loader.build()?;
    if let Some(dir) = app_dir {
        config.app_dir = dir.to_path_buf();
    }
    Ok(config)
}
