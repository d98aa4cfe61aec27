//! Parley plugin runtime.
//!
//! Registration and lifecycle, the message interception chain, tool
//! dispatch, UI aggregation, and the streaming relay, all behind
//! [`PluginManager`]. [`TurnRunner`] drives a full chat turn through them.

pub mod builtin;
pub mod catalog;
pub mod dispatcher;
pub mod event_bus;
pub mod fault;
pub mod interception;
pub mod lifecycle;
pub mod manager;
pub mod registry;
pub mod relay;
pub mod sdk;
pub mod slots;
pub mod turn;

#[cfg(test)]
mod testing;

pub use builtin::{builtin_catalog, AuditLogPlugin, ContentFilterPlugin, TextToolsPlugin};
pub use catalog::{PluginCatalog, PluginFactory};
pub use dispatcher::{DispatchOutcome, ToolDispatcher};
pub use event_bus::EventBus;
pub use fault::{FaultCause, PluginFault};
pub use interception::{ChainOutcome, Direction, InterceptionChain};
pub use lifecycle::PluginState;
pub use manager::{LoadFailure, LoadReport, PluginManager};
pub use registry::{PluginInfo, PluginRegistry, RegistrySnapshot};
pub use relay::{RelayStream, StreamingRelay};
pub use sdk::{
    Capabilities, InputExtension, InterceptResult, MessageAction, MessageInterceptor, Plugin,
    PluginCategory, PluginInitContext, PluginMetadata, SettingField, SettingsSchema, ToolProvider,
    UiExtension,
};
pub use slots::ResolvedPluginTool;
pub use turn::{TurnOutcome, TurnRunner};
