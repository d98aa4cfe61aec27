//! Plugin SDK
//!
//! The capability traits plugin authors implement, and the data structures
//! that cross the plugin boundary. Only the plugin manager calls into these
//! traits; plugins never call each other.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use parley_core::{ChatMessage, ConversationContext, ParamType, ToolArguments, ToolDefinition, ToolResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Coarse grouping used by admin views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginCategory {
    Moderation,
    Productivity,
    Integration,
    Observability,
    Utility,
    Other,
}

/// Identity and descriptive metadata of a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub id: String,
    pub name: String,
    pub version: String,
    pub category: PluginCategory,
    #[serde(default)]
    pub description: String,
}

impl PluginMetadata {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        category: PluginCategory,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            category,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Context passed to a plugin initializer.
#[derive(Debug, Clone)]
pub struct PluginInitContext {
    pub plugin_id: String,
    /// The plugin's entry under `plugins.settings`, `Null` when absent.
    pub settings: Value,
}

/// Base capability every plugin implements.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn metadata(&self) -> &PluginMetadata;

    /// Called once before the plugin becomes active.
    async fn initialize(&self, _ctx: &PluginInitContext) -> Result<()> {
        Ok(())
    }

    /// Called once when the plugin is unloaded.
    async fn dispose(&self) -> Result<()> {
        Ok(())
    }

    fn as_interceptor(&self) -> Option<&dyn MessageInterceptor> {
        None
    }

    fn as_tool_provider(&self) -> Option<&dyn ToolProvider> {
        None
    }

    fn as_ui_extension(&self) -> Option<&dyn UiExtension> {
        None
    }
}

/// Observes, rewrites, or cancels messages around the model call.
#[async_trait]
pub trait MessageInterceptor: Send + Sync {
    async fn on_before_send(
        &self,
        _message: &ChatMessage,
        _ctx: &mut ConversationContext,
    ) -> Result<InterceptResult> {
        Ok(InterceptResult::proceed())
    }

    async fn on_after_receive(
        &self,
        _message: &ChatMessage,
        _ctx: &mut ConversationContext,
    ) -> Result<InterceptResult> {
        Ok(InterceptResult::proceed())
    }
}

/// Exposes named tools.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Tool definitions, read once at registration time.
    fn list_tools(&self) -> Vec<ToolDefinition>;

    /// Run a tool with arguments already validated against its schema.
    async fn execute_tool(
        &self,
        name: &str,
        args: &ToolArguments,
        cancel: &CancellationToken,
    ) -> Result<ToolResult>;
}

/// Contributes UI elements to the chat surface.
pub trait UiExtension: Send + Sync {
    fn message_actions(&self, _message: &ChatMessage) -> Result<Vec<MessageAction>> {
        Ok(Vec::new())
    }

    fn input_extensions(&self) -> Result<Vec<InputExtension>> {
        Ok(Vec::new())
    }

    fn settings_schema(&self) -> Result<Option<SettingsSchema>> {
        Ok(None)
    }
}

/// Which capability traits a plugin exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub interceptor: bool,
    pub tools: bool,
    pub ui: bool,
}

impl Capabilities {
    pub fn of(plugin: &dyn Plugin) -> Self {
        Self {
            interceptor: plugin.as_interceptor().is_some(),
            tools: plugin.as_tool_provider().is_some(),
            ui: plugin.as_ui_extension().is_some(),
        }
    }
}

// ---------------------------------------------------------------------------
// Interception result
// ---------------------------------------------------------------------------

/// Result returned by an interceptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterceptResult {
    /// `false` stops the chain and suppresses the gateway call.
    #[serde(rename = "continue")]
    pub proceed: bool,
    /// Replaces the message seen by the next interceptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_message: Option<ChatMessage>,
    /// Only meaningful when `proceed` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl Default for InterceptResult {
    fn default() -> Self {
        Self {
            proceed: true,
            modified_message: None,
            cancel_reason: None,
            metadata: HashMap::new(),
        }
    }
}

impl InterceptResult {
    pub fn proceed() -> Self {
        Self::default()
    }

    pub fn replace(message: ChatMessage) -> Self {
        Self {
            modified_message: Some(message),
            ..Self::default()
        }
    }

    pub fn cancel(reason: impl Into<String>) -> Self {
        Self {
            proceed: false,
            cancel_reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        !self.proceed
    }
}

// ---------------------------------------------------------------------------
// UI contributions
// ---------------------------------------------------------------------------

/// An action rendered next to a chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageAction {
    /// Filled in by the manager during aggregation.
    #[serde(default)]
    pub plugin_id: String,
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Tool invoked when the action is clicked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
}

impl MessageAction {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            plugin_id: String::new(),
            id: id.into(),
            label: label.into(),
            icon: None,
            tool: None,
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn invoking(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }
}

/// A control added to the message composer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputExtension {
    #[serde(default)]
    pub plugin_id: String,
    pub id: String,
    pub label: String,
    /// Slash command that activates the extension, e.g. `/upper`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
}

impl InputExtension {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            plugin_id: String::new(),
            id: id.into(),
            label: label.into(),
            trigger: None,
        }
    }

    pub fn triggered_by(mut self, trigger: impl Into<String>) -> Self {
        self.trigger = Some(trigger.into());
        self
    }
}

/// One configurable field in a plugin's settings form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingField {
    pub key: String,
    pub label: String,
    pub field_type: ParamType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: String,
}

/// Settings form contributed by a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsSchema {
    #[serde(default)]
    pub plugin_id: String,
    pub fields: Vec<SettingField>,
}
