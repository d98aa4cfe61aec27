//! Locating and reading the config file.

use crate::env::resolve_env_vars_with;
use crate::schema::ParleyConfig;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Default config file name within the config directory.
const CONFIG_FILE_NAME: &str = "config.yaml";

/// Resolve the Parley config directory.
/// Priority: `PARLEY_CONFIG_DIR` env > `~/.parley/` > `./.parley`
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PARLEY_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    match dirs::home_dir() {
        Some(home) => home.join(".parley"),
        None => PathBuf::from(".parley"),
    }
}

/// Resolve the full path to the main config file.
pub fn config_file_path(config_dir: &Path) -> PathBuf {
    config_dir.join(CONFIG_FILE_NAME)
}

/// Read, substitute env vars, and parse the config at `path`.
///
/// Returns defaults if the file does not exist (first run).
pub async fn load_config(path: &Path) -> Result<ParleyConfig> {
    load_config_with_env(path, &std::env::vars().collect()).await
}

/// Same as [`load_config`] with an explicit environment.
pub async fn load_config_with_env(path: &Path, env: &HashMap<String, String>) -> Result<ParleyConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "Config file does not exist; using defaults");
        return Ok(ParleyConfig::default());
    }

    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    if raw.trim().is_empty() {
        return Ok(ParleyConfig::default());
    }

    let value: serde_json::Value = serde_yaml::from_str(&raw)
        .with_context(|| format!("Failed to parse config YAML at: {}", path.display()))?;
    let value = resolve_env_vars_with(&value, env)
        .with_context(|| format!("Failed to resolve env vars in: {}", path.display()))?;
    let config: ParleyConfig =
        serde_json::from_value(value).context("Config does not match the expected schema")?;

    info!(path = %path.display(), "Loaded config");
    Ok(config)
}
