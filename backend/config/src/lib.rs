//! Runtime configuration for the Parley plugin runtime.
//!
//! Provides:
//! - Typed config schema with serde defaults
//! - YAML loading from `$PARLEY_CONFIG_DIR` or `~/.parley/`
//! - `${ENV_VAR}` substitution
//! - Validation with path-qualified messages

pub mod env;
pub mod io;
pub mod schema;
pub mod validation;

pub use env::{resolve_env_vars, resolve_env_vars_with, MissingEnvVarError};
pub use io::{config_dir, config_file_path, load_config, load_config_with_env};
pub use schema::{GatewayConfig, LoggingConfig, ParleyConfig, PluginsConfig, RelayConfig};
pub use validation::{validate, ConfigValidationError, ValidationReport};

use anyhow::{bail, Result};
use std::path::Path;

/// Load and validate a config file.
///
/// Warnings are logged; the first validation error aborts loading. Callers
/// that install a subscriber from this config should use [`load_config`],
/// then [`check_config`] once logging is up.
pub async fn load_and_prepare(path: &Path) -> Result<ParleyConfig> {
    let config = load_config(path).await?;
    check_config(&config)?;
    Ok(config)
}

/// Validate `config`, logging every warning and error.
pub fn check_config(config: &ParleyConfig) -> Result<ValidationReport> {
    let report = validate(config);
    for warning in &report.warnings {
        tracing::warn!(path = %warning.path, message = %warning.message, "Config warning");
    }
    for error in &report.errors {
        tracing::error!(path = %error.path, message = %error.message, "Config error");
    }
    if let Some(first) = report.errors.first() {
        bail!("{first}");
    }
    Ok(report)
}
