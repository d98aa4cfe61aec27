use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A lifecycle notification published by the plugin manager.
///
/// Events are observer-only: nothing in the request path waits on them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginEvent {
    pub id: Uuid,
    pub plugin_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: PluginEventKind,
}

/// What happened to the plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PluginEventKind {
    Loaded,
    Unloaded,
    Error { stage: FaultStage, message: String },
}

/// Where inside a plugin a fault was raised.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FaultStage {
    Initialize,
    Dispose,
    BeforeSend,
    AfterReceive,
    Tool,
    UiExtension,
}

impl PluginEvent {
    pub fn new(plugin_id: impl Into<String>, kind: PluginEventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            plugin_id: plugin_id.into(),
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn loaded(plugin_id: impl Into<String>) -> Self {
        Self::new(plugin_id, PluginEventKind::Loaded)
    }

    pub fn unloaded(plugin_id: impl Into<String>) -> Self {
        Self::new(plugin_id, PluginEventKind::Unloaded)
    }

    pub fn error(plugin_id: impl Into<String>, stage: FaultStage, message: impl Into<String>) -> Self {
        Self::new(
            plugin_id,
            PluginEventKind::Error {
                stage,
                message: message.into(),
            },
        )
    }
}

impl std::fmt::Display for FaultStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| format!("{:?}", self));
        write!(f, "{}", s)
    }
}
