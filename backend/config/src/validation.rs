//! Config validation with field paths in every message.

use crate::schema::ParleyConfig;
use thiserror::Error;

/// A config validation problem with field path and message.
#[derive(Debug, Error)]
#[error("config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

/// All problems found in one pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate the config and return every error and warning.
pub fn validate(config: &ParleyConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_logging(config, &mut report);
    validate_plugins(config, &mut report);
    validate_relay(config, &mut report);
    validate_gateway(config, &mut report);
    report
}

fn validate_logging(config: &ParleyConfig, report: &mut ValidationReport) {
    if config.logging.level.trim().is_empty() {
        report.error("logging.level", "level cannot be empty");
    }
    if let Some(dir) = &config.logging.directory {
        if dir.trim().is_empty() {
            report.warn("logging.directory", "empty directory; file logging disabled");
        }
    }
}

fn validate_plugins(config: &ParleyConfig, report: &mut ValidationReport) {
    let plugins = &config.plugins;
    let timeouts = [
        ("plugins.initTimeoutMs", plugins.init_timeout_ms),
        ("plugins.disposeTimeoutMs", plugins.dispose_timeout_ms),
        ("plugins.interceptorTimeoutMs", plugins.interceptor_timeout_ms),
        ("plugins.toolTimeoutMs", plugins.tool_timeout_ms),
    ];
    for (path, value) in timeouts {
        if value == 0 {
            report.error(path, "timeout must be > 0");
        }
    }
    if plugins.event_capacity == 0 {
        report.error("plugins.eventCapacity", "eventCapacity must be > 0");
    }
    for (i, id) in plugins.disabled.iter().enumerate() {
        if id.trim().is_empty() {
            report.error(format!("plugins.disabled[{i}]"), "plugin id cannot be empty");
        }
    }
    for id in plugins.settings.keys() {
        if plugins.is_disabled(id) {
            report.warn(
                format!("plugins.settings.{id}"),
                "settings configured for a disabled plugin",
            );
        }
    }
}

fn validate_relay(config: &ParleyConfig, report: &mut ValidationReport) {
    if config.relay.buffer_chunks == 0 {
        report.error("relay.bufferChunks", "bufferChunks must be > 0");
    } else if config.relay.buffer_chunks > 64 {
        report.warn(
            "relay.bufferChunks",
            "large buffers delay cancellation by up to bufferChunks chunks",
        );
    }
}

fn validate_gateway(config: &ParleyConfig, report: &mut ValidationReport) {
    let gateway = &config.gateway;
    if gateway.model.trim().is_empty() {
        report.error("gateway.model", "model cannot be empty");
    }
    if !(0.0..=2.0).contains(&gateway.temperature) {
        report.error("gateway.temperature", "temperature must be within 0.0..=2.0");
    }
    if gateway.max_tokens == 0 {
        report.error("gateway.maxTokens", "maxTokens must be > 0");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let report = validate(&ParleyConfig::default());
        assert!(report.is_valid());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn zero_values_are_errors() {
        let mut config = ParleyConfig::default();
        config.plugins.init_timeout_ms = 0;
        config.relay.buffer_chunks = 0;
        config.gateway.temperature = 3.5;
        let report = validate(&config);
        let paths: Vec<&str> = report.errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["plugins.initTimeoutMs", "relay.bufferChunks", "gateway.temperature"]
        );
    }

    #[test]
    fn settings_for_disabled_plugin_warns() {
        let mut config = ParleyConfig::default();
        config.plugins.disabled.push("p".into());
        config.plugins.settings.insert("p".into(), serde_json::json!({}));
        let report = validate(&config);
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
    }
}
