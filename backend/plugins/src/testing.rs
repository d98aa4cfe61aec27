//! Plugins with scripted behavior, shared by the unit tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parley_core::{
    ChatMessage, ConversationContext, ParamType, ToolArguments, ToolDefinition, ToolParameter,
    ToolResult, ToolUsage,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::sdk::{
    InputExtension, InterceptResult, MessageAction, MessageInterceptor, Plugin, PluginCategory,
    PluginInitContext, PluginMetadata, ToolProvider, UiExtension,
};

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

fn meta(id: &str) -> PluginMetadata {
    PluginMetadata::new(id, id, "1.0.0", PluginCategory::Other)
}

// ---------------------------------------------------------------------------
// Interceptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Behavior {
    Proceed,
    Cancel(String),
    Uppercase,
    Append(String),
    Tag(&'static str, Value),
    Fail,
    Panic,
    Stall,
    WriteScratch(&'static str),
    RequireScratch(&'static str),
}

pub struct ScriptedInterceptor {
    meta: PluginMetadata,
    behavior: Behavior,
    log: CallLog,
}

impl ScriptedInterceptor {
    pub fn id(&self) -> &str {
        &self.meta.id
    }

    fn react(&self, message: &ChatMessage, ctx: &mut ConversationContext) -> Result<InterceptResult> {
        self.log.lock().unwrap().push(self.meta.id.clone());
        Ok(match &self.behavior {
            Behavior::Proceed | Behavior::Stall => InterceptResult::proceed(),
            Behavior::Cancel(reason) => InterceptResult::cancel(reason.clone()),
            Behavior::Uppercase => InterceptResult::replace(message.with_content(message.content.to_uppercase())),
            Behavior::Append(suffix) => {
                InterceptResult::replace(message.with_content(format!("{}{suffix}", message.content)))
            }
            Behavior::Tag(key, value) => InterceptResult::proceed().with_metadata(*key, value.clone()),
            Behavior::Fail => anyhow::bail!("interceptor exploded"),
            Behavior::Panic => panic!("interceptor panicked"),
            Behavior::WriteScratch(key) => {
                ctx.plugin_data_mut().insert((*key).to_string(), json!(true));
                InterceptResult::proceed()
            }
            Behavior::RequireScratch(key) => {
                if ctx.plugin_data().contains_key(*key) {
                    InterceptResult::proceed()
                } else {
                    InterceptResult::cancel(format!("missing scratch key {key}"))
                }
            }
        })
    }
}

pub fn interceptor(id: &str, behavior: Behavior, log: &CallLog) -> ScriptedInterceptor {
    ScriptedInterceptor {
        meta: meta(id),
        behavior,
        log: log.clone(),
    }
}

impl Plugin for ScriptedInterceptor {
    fn metadata(&self) -> &PluginMetadata {
        &self.meta
    }

    fn as_interceptor(&self) -> Option<&dyn MessageInterceptor> {
        Some(self)
    }
}

#[async_trait]
impl MessageInterceptor for ScriptedInterceptor {
    async fn on_before_send(&self, message: &ChatMessage, ctx: &mut ConversationContext) -> Result<InterceptResult> {
        if matches!(self.behavior, Behavior::Stall) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        self.react(message, ctx)
    }

    async fn on_after_receive(&self, message: &ChatMessage, ctx: &mut ConversationContext) -> Result<InterceptResult> {
        if matches!(self.behavior, Behavior::Stall) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        self.react(message, ctx)
    }
}

// ---------------------------------------------------------------------------
// Tool provider
// ---------------------------------------------------------------------------

/// Exposes `search`, `explode`, `panic`, and `wait` tools.
pub struct SearchPlugin {
    meta: PluginMetadata,
    pub disposed: Arc<Mutex<bool>>,
}

impl SearchPlugin {
    pub fn new(id: &str) -> Self {
        Self {
            meta: meta(id),
            disposed: Arc::new(Mutex::new(false)),
        }
    }
}

#[async_trait]
impl Plugin for SearchPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.meta
    }

    async fn dispose(&self) -> Result<()> {
        *self.disposed.lock().unwrap() = true;
        Ok(())
    }

    fn as_tool_provider(&self) -> Option<&dyn ToolProvider> {
        Some(self)
    }

    fn as_ui_extension(&self) -> Option<&dyn UiExtension> {
        Some(self)
    }
}

#[async_trait]
impl ToolProvider for SearchPlugin {
    fn list_tools(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new("search", "Search the workspace")
                .param(ToolParameter::new("query", ParamType::String).required())
                .param(ToolParameter::new("limit", ParamType::Integer).with_default(json!(5))),
            ToolDefinition::new("explode", "Always fails"),
            ToolDefinition::new("panic", "Always panics"),
            ToolDefinition::new("wait", "Waits until cancelled"),
        ]
    }

    async fn execute_tool(&self, name: &str, args: &ToolArguments, cancel: &CancellationToken) -> Result<ToolResult> {
        match name {
            "search" => {
                let query = args.str("query").unwrap_or_default();
                let limit = args.i64("limit").unwrap_or_default();
                Ok(ToolResult::ok(json!({ "query": query, "limit": limit, "hits": [] })).with_usage(
                    ToolUsage {
                        input_tokens: 3,
                        output_tokens: 0,
                        cost_usd: None,
                    },
                ))
            }
            "explode" => anyhow::bail!("backend unavailable"),
            "panic" => panic!("tool panicked"),
            "wait" => {
                cancel.cancelled().await;
                Ok(ToolResult::ok(Value::Null))
            }
            other => anyhow::bail!("unknown tool {other}"),
        }
    }
}

impl UiExtension for SearchPlugin {
    fn message_actions(&self, message: &ChatMessage) -> Result<Vec<MessageAction>> {
        Ok(vec![MessageAction::new("search-this", format!("Search '{}'", message.content)).invoking("search")])
    }

    fn input_extensions(&self) -> Result<Vec<InputExtension>> {
        Ok(vec![InputExtension::new("search", "Search").triggered_by("/search")])
    }
}

// ---------------------------------------------------------------------------
// Misbehaving lifecycles
// ---------------------------------------------------------------------------

pub enum InitBehavior {
    Fail,
    Panic,
    Stall,
}

pub struct BrokenInit {
    meta: PluginMetadata,
    behavior: InitBehavior,
}

pub fn broken_init(id: &str, behavior: InitBehavior) -> BrokenInit {
    BrokenInit { meta: meta(id), behavior }
}

#[async_trait]
impl Plugin for BrokenInit {
    fn metadata(&self) -> &PluginMetadata {
        &self.meta
    }

    async fn initialize(&self, _ctx: &PluginInitContext) -> Result<()> {
        match self.behavior {
            InitBehavior::Fail => anyhow::bail!("missing credentials"),
            InitBehavior::Panic => panic!("init panicked"),
            InitBehavior::Stall => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            }
        }
    }
}

/// UI extension whose every hook panics.
pub struct BrokenUi {
    meta: PluginMetadata,
}

pub fn broken_ui(id: &str) -> BrokenUi {
    BrokenUi { meta: meta(id) }
}

impl Plugin for BrokenUi {
    fn metadata(&self) -> &PluginMetadata {
        &self.meta
    }

    fn as_ui_extension(&self) -> Option<&dyn UiExtension> {
        Some(self)
    }
}

impl UiExtension for BrokenUi {
    fn message_actions(&self, _message: &ChatMessage) -> Result<Vec<MessageAction>> {
        panic!("ui panicked")
    }

    fn input_extensions(&self) -> Result<Vec<InputExtension>> {
        anyhow::bail!("no inputs today")
    }
}

/// Tool provider whose tool listing panics.
pub struct BrokenTools {
    meta: PluginMetadata,
}

pub fn broken_tools(id: &str) -> BrokenTools {
    BrokenTools { meta: meta(id) }
}

impl Plugin for BrokenTools {
    fn metadata(&self) -> &PluginMetadata {
        &self.meta
    }

    fn as_tool_provider(&self) -> Option<&dyn ToolProvider> {
        Some(self)
    }
}

#[async_trait]
impl ToolProvider for BrokenTools {
    fn list_tools(&self) -> Vec<ToolDefinition> {
        panic!("tool table corrupted")
    }

    async fn execute_tool(
        &self,
        name: &str,
        _args: &ToolArguments,
        _cancel: &CancellationToken,
    ) -> Result<ToolResult> {
        anyhow::bail!("no tool {name}")
    }
}
