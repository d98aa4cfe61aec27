//! Built-in plugins.
//!
//! These ship with Parley and are registered through [`builtin_catalog`].
//! Each one exercises a different capability mix: a moderating interceptor
//! with a settings form, an observing interceptor, and a tool provider with
//! UI contributions.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use parley_core::{
    ChatMessage, ConversationContext, ParamType, ToolArguments, ToolDefinition, ToolParameter,
    ToolResult,
};
use parley_logging::log_preview;
use serde_json::json;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::catalog::PluginCatalog;
use crate::sdk::{
    InputExtension, InterceptResult, MessageAction, MessageInterceptor, Plugin, PluginCategory,
    PluginInitContext, PluginMetadata, SettingField, SettingsSchema, ToolProvider, UiExtension,
};

pub const CONTENT_FILTER_ID: &str = "builtin.content-filter";
pub const AUDIT_LOG_ID: &str = "builtin.audit-log";
pub const TEXT_TOOLS_ID: &str = "builtin.text-tools";

/// Catalog with every built-in plugin, in load order.
pub fn builtin_catalog() -> PluginCatalog {
    let mut catalog = PluginCatalog::new();
    catalog.register(CONTENT_FILTER_ID, || Ok(ContentFilterPlugin::new(Vec::new())));
    catalog.register(AUDIT_LOG_ID, || Ok(AuditLogPlugin::new()));
    catalog.register(TEXT_TOOLS_ID, || Ok(TextToolsPlugin::new()));
    catalog
}

// ---------------------------------------------------------------------------
// Content filter: blocks messages matching a word list
// ---------------------------------------------------------------------------

pub struct ContentFilterPlugin {
    meta: PluginMetadata,
    blocked_words: RwLock<Vec<String>>,
}

impl ContentFilterPlugin {
    pub fn new(blocked_words: Vec<String>) -> Self {
        Self {
            meta: PluginMetadata::new(CONTENT_FILTER_ID, "Content Filter", "1.0.0", PluginCategory::Moderation)
                .with_description("Blocks messages that contain configured words"),
            blocked_words: RwLock::new(normalize(blocked_words)),
        }
    }

    async fn screen(&self, message: &ChatMessage) -> InterceptResult {
        let lower = message.content.to_lowercase();
        for word in self.blocked_words.read().await.iter() {
            if lower.contains(word.as_str()) {
                return InterceptResult::cancel(format!("Blocked word detected: {word}"));
            }
        }
        InterceptResult::proceed()
    }
}

fn normalize(words: Vec<String>) -> Vec<String> {
    words
        .into_iter()
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

#[async_trait]
impl Plugin for ContentFilterPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.meta
    }

    async fn initialize(&self, ctx: &PluginInitContext) -> Result<()> {
        let Some(configured) = ctx.settings.get("blockedWords") else {
            return Ok(());
        };
        let words: Vec<String> = serde_json::from_value(configured.clone())
            .map_err(|e| anyhow::anyhow!("blockedWords must be a list of strings: {e}"))?;
        let mut blocked = self.blocked_words.write().await;
        blocked.extend(normalize(words));
        blocked.sort();
        blocked.dedup();
        debug!(plugin = %ctx.plugin_id, words = blocked.len(), "Content filter configured");
        Ok(())
    }

    fn as_interceptor(&self) -> Option<&dyn MessageInterceptor> {
        Some(self)
    }

    fn as_ui_extension(&self) -> Option<&dyn UiExtension> {
        Some(self)
    }
}

#[async_trait]
impl MessageInterceptor for ContentFilterPlugin {
    async fn on_before_send(&self, message: &ChatMessage, _ctx: &mut ConversationContext) -> Result<InterceptResult> {
        Ok(self.screen(message).await)
    }

    async fn on_after_receive(&self, message: &ChatMessage, _ctx: &mut ConversationContext) -> Result<InterceptResult> {
        Ok(self.screen(message).await)
    }
}

impl UiExtension for ContentFilterPlugin {
    fn settings_schema(&self) -> Result<Option<SettingsSchema>> {
        Ok(Some(SettingsSchema {
            plugin_id: String::new(),
            fields: vec![SettingField {
                key: "blockedWords".into(),
                label: "Blocked words".into(),
                field_type: ParamType::Array,
                default: Some(json!([])),
                description: "Case-insensitive words that stop a message from being sent".into(),
            }],
        }))
    }
}

// ---------------------------------------------------------------------------
// Audit log: records every message in both directions
// ---------------------------------------------------------------------------

pub struct AuditLogPlugin {
    meta: PluginMetadata,
    seen: AtomicU64,
}

impl AuditLogPlugin {
    pub fn new() -> Self {
        Self {
            meta: PluginMetadata::new(AUDIT_LOG_ID, "Audit Log", "1.0.0", PluginCategory::Observability)
                .with_description("Logs a redacted preview of every message"),
            seen: AtomicU64::new(0),
        }
    }

    pub fn messages_seen(&self) -> u64 {
        self.seen.load(Ordering::Relaxed)
    }

    fn record(&self, direction: &str, message: &ChatMessage, ctx: &mut ConversationContext) -> InterceptResult {
        let count = self.seen.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            target: "audit",
            conversation = %ctx.conversation_id(),
            direction,
            role = ?message.role,
            chars = message.content.chars().count(),
            preview = %log_preview(&message.content, 80),
            "Message observed"
        );
        ctx.plugin_data_mut()
            .insert("audit.sequence".into(), json!(count));
        InterceptResult::proceed()
    }
}

impl Default for AuditLogPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for AuditLogPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.meta
    }

    async fn dispose(&self) -> Result<()> {
        info!(target: "audit", total = self.messages_seen(), "Audit log closed");
        Ok(())
    }

    fn as_interceptor(&self) -> Option<&dyn MessageInterceptor> {
        Some(self)
    }
}

#[async_trait]
impl MessageInterceptor for AuditLogPlugin {
    async fn on_before_send(&self, message: &ChatMessage, ctx: &mut ConversationContext) -> Result<InterceptResult> {
        Ok(self.record("outgoing", message, ctx))
    }

    async fn on_after_receive(&self, message: &ChatMessage, ctx: &mut ConversationContext) -> Result<InterceptResult> {
        Ok(self.record("incoming", message, ctx))
    }
}

// ---------------------------------------------------------------------------
// Text tools: word counting and case conversion
// ---------------------------------------------------------------------------

pub struct TextToolsPlugin {
    meta: PluginMetadata,
}

impl TextToolsPlugin {
    pub fn new() -> Self {
        Self {
            meta: PluginMetadata::new(TEXT_TOOLS_ID, "Text Tools", "1.0.0", PluginCategory::Utility)
                .with_description("Small text utilities exposed as tools"),
        }
    }
}

impl Default for TextToolsPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for TextToolsPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.meta
    }

    fn as_tool_provider(&self) -> Option<&dyn ToolProvider> {
        Some(self)
    }

    fn as_ui_extension(&self) -> Option<&dyn UiExtension> {
        Some(self)
    }
}

#[async_trait]
impl ToolProvider for TextToolsPlugin {
    fn list_tools(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new("word_count", "Count words and characters in a text")
                .param(ToolParameter::new("text", ParamType::String).required().describe("Text to measure")),
            ToolDefinition::new("change_case", "Convert text to upper, lower, or title case")
                .param(ToolParameter::new("text", ParamType::String).required())
                .param(
                    ToolParameter::new("case", ParamType::String)
                        .with_default(json!("upper"))
                        .one_of(vec![json!("upper"), json!("lower"), json!("title")]),
                ),
        ]
    }

    async fn execute_tool(&self, name: &str, args: &ToolArguments, _cancel: &CancellationToken) -> Result<ToolResult> {
        let text = args.str("text").unwrap_or_default();
        match name {
            "word_count" => Ok(ToolResult::ok(json!({
                "words": text.split_whitespace().count(),
                "characters": text.chars().count(),
            }))),
            "change_case" => {
                let converted = match args.str("case").unwrap_or("upper") {
                    "lower" => text.to_lowercase(),
                    "title" => title_case(text),
                    _ => text.to_uppercase(),
                };
                Ok(ToolResult::ok(json!({ "text": converted })))
            }
            other => anyhow::bail!("text-tools has no tool named {other}"),
        }
    }
}

fn title_case(text: &str) -> String {
    text.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

impl UiExtension for TextToolsPlugin {
    fn message_actions(&self, message: &ChatMessage) -> Result<Vec<MessageAction>> {
        if message.content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![
            MessageAction::new("count-words", "Count words")
                .with_icon("hash")
                .invoking("word_count"),
        ])
    }

    fn input_extensions(&self) -> Result<Vec<InputExtension>> {
        Ok(vec![InputExtension::new("upper", "Uppercase").triggered_by("/upper")])
    }
}
