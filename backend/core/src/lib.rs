//! Shared data model for the Parley plugin runtime.

pub mod context;
pub mod error;
pub mod event;
pub mod gateway;
pub mod message;
pub mod stream;
pub mod tools;

pub use context::{ConversationContext, PluginData};
pub use error::{PluginError, PluginResult};
pub use event::{FaultStage, PluginEvent, PluginEventKind};
pub use gateway::{ChatCompletion, ChatRequest, LlmGateway, SamplingParams, ScriptedGateway, TextDeltaStream};
pub use message::{ChatMessage, Role};
pub use stream::StreamChunk;
pub use tools::{
    ParamType, ToolArguments, ToolDefinition, ToolErrorKind, ToolParameter, ToolParameters,
    ToolResult, ToolUsage,
};
