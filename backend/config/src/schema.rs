//! Parley runtime configuration schema.
//!
//! Every field has a default so a missing or partial `config.yaml` still
//! yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParleyConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub plugins: PluginsConfig,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines on the console instead of human-readable output.
    #[serde(default)]
    pub json: bool,
    /// Directory for daily-rolling NDJSON log files. Disabled when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            directory: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Plugins
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginsConfig {
    /// Upper bound for a plugin initializer.
    #[serde(default = "default_init_timeout_ms")]
    pub init_timeout_ms: u64,
    /// Upper bound for a plugin disposer.
    #[serde(default = "default_dispose_timeout_ms")]
    pub dispose_timeout_ms: u64,
    /// Upper bound for a single interceptor call.
    #[serde(default = "default_interceptor_timeout_ms")]
    pub interceptor_timeout_ms: u64,
    /// Upper bound for a single tool execution.
    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,
    /// Capacity of the lifecycle event bus.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Plugin ids registered in the disabled state.
    #[serde(default)]
    pub disabled: Vec<String>,
    /// Per-plugin settings handed to the initializer, keyed by plugin id.
    #[serde(default)]
    pub settings: HashMap<String, serde_json::Value>,
}

fn default_init_timeout_ms() -> u64 {
    5_000
}

fn default_dispose_timeout_ms() -> u64 {
    5_000
}

fn default_interceptor_timeout_ms() -> u64 {
    10_000
}

fn default_tool_timeout_ms() -> u64 {
    30_000
}

fn default_event_capacity() -> usize {
    64
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            init_timeout_ms: default_init_timeout_ms(),
            dispose_timeout_ms: default_dispose_timeout_ms(),
            interceptor_timeout_ms: default_interceptor_timeout_ms(),
            tool_timeout_ms: default_tool_timeout_ms(),
            event_capacity: default_event_capacity(),
            disabled: Vec::new(),
            settings: HashMap::new(),
        }
    }
}

impl PluginsConfig {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn dispose_timeout(&self) -> Duration {
        Duration::from_millis(self.dispose_timeout_ms)
    }

    pub fn interceptor_timeout(&self) -> Duration {
        Duration::from_millis(self.interceptor_timeout_ms)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }

    /// Settings for one plugin, `Null` when none are configured.
    pub fn settings_for(&self, plugin_id: &str) -> serde_json::Value {
        self.settings
            .get(plugin_id)
            .cloned()
            .unwrap_or(serde_json::Value::Null)
    }

    pub fn is_disabled(&self, plugin_id: &str) -> bool {
        self.disabled.iter().any(|id| id == plugin_id)
    }
}

// ---------------------------------------------------------------------------
// Streaming relay
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    /// Chunks buffered between the upstream reader and the caller.
    #[serde(default = "default_buffer_chunks")]
    pub buffer_chunks: usize,
}

fn default_buffer_chunks() -> usize {
    1
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_chunks: default_buffer_chunks(),
        }
    }
}

// ---------------------------------------------------------------------------
// Gateway request defaults
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}
