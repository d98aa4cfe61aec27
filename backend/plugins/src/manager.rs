//! Plugin manager: the single owner of the plugin runtime.
//!
//! Everything the host does with plugins goes through here: registration
//! and unloading, enable/disable, the two interception passes, tool calls,
//! and UI aggregation. Faults contained in any of those paths are published
//! as `PluginEvent`s, and panics additionally move the plugin to `Error`.

use std::sync::Arc;

use parley_config::PluginsConfig;
use parley_core::{
    ChatMessage, ConversationContext, FaultStage, PluginError, PluginEvent, PluginResult,
    ToolParameters, ToolResult,
};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::PluginCatalog;
use crate::dispatcher::ToolDispatcher;
use crate::event_bus::EventBus;
use crate::fault::{guarded_sync, FaultCause, PluginFault};
use crate::interception::{ChainOutcome, Direction, InterceptionChain};
use crate::lifecycle::{self, PluginState};
use crate::registry::{PluginInfo, PluginRegistry};
use crate::sdk::{InputExtension, MessageAction, Plugin, PluginInitContext, SettingsSchema};
use crate::slots::{self, Contributions, ResolvedPluginTool};

/// What happened during [`PluginManager::load_plugins`].
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub disabled: Vec<String>,
    pub failed: Vec<LoadFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadFailure {
    pub plugin_id: String,
    pub reason: String,
}

pub struct PluginManager {
    config: PluginsConfig,
    catalog: PluginCatalog,
    registry: PluginRegistry,
    events: EventBus,
    chain: InterceptionChain,
    dispatcher: ToolDispatcher,
}

impl PluginManager {
    pub fn new(config: PluginsConfig) -> Self {
        Self {
            registry: PluginRegistry::new(),
            events: EventBus::new(config.event_capacity),
            chain: InterceptionChain::new(config.interceptor_timeout()),
            dispatcher: ToolDispatcher::new(config.tool_timeout()),
            catalog: PluginCatalog::new(),
            config,
        }
    }

    pub fn with_catalog(mut self, catalog: PluginCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Lifecycle event stream. Events published before subscribing are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<PluginEvent> {
        self.events.subscribe()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Register every catalog plugin in order. One plugin failing does not
    /// stop the rest. Plugins listed in `plugins.disabled` end up `Disabled`.
    pub async fn load_plugins(&self) -> LoadReport {
        let mut report = LoadReport::default();
        for (catalog_id, built) in self.catalog.instantiate() {
            let plugin = match built {
                Ok(plugin) => plugin,
                Err(reason) => {
                    warn!(plugin = %catalog_id, error = %reason, "Plugin factory failed");
                    self.events
                        .publish(PluginEvent::error(&catalog_id, FaultStage::Initialize, &reason));
                    report.failed.push(LoadFailure { plugin_id: catalog_id, reason });
                    continue;
                }
            };
            let id = plugin.metadata().id.clone();
            if id != catalog_id {
                warn!(catalog_id = %catalog_id, plugin = %id, "Catalog id differs from plugin metadata id");
            }

            if let Err(e) = self.register_plugin(plugin).await {
                report.failed.push(LoadFailure {
                    plugin_id: id,
                    reason: e.to_string(),
                });
                continue;
            }
            if self.config.is_disabled(&id) {
                if let Err(e) = self.set_plugin_enabled(&id, false).await {
                    warn!(plugin = %id, error = %e, "Could not disable plugin");
                }
                report.disabled.push(id);
            } else {
                report.loaded.push(id);
            }
        }
        info!(
            loaded = report.loaded.len(),
            disabled = report.disabled.len(),
            failed = report.failed.len(),
            "Plugins loaded"
        );
        report
    }

    /// Register and initialize a plugin.
    ///
    /// On success the plugin is `Active` and a `Loaded` event is published.
    /// If the initializer fails, panics, or times out, the plugin is `Error`,
    /// an `Error` event is published, and `InitializationFailure` is returned.
    pub async fn register_plugin(&self, plugin: Arc<dyn Plugin>) -> PluginResult<()> {
        let metadata = plugin.metadata().clone();
        let id = metadata.id.clone();
        if id.trim().is_empty() {
            return Err(PluginError::ValidationError("plugin id cannot be empty".into()));
        }

        let tools = match plugin.as_tool_provider() {
            Some(provider) => match guarded_sync(|| Ok(provider.list_tools())) {
                Ok(tools) => tools,
                Err(cause) => {
                    if self.registry.snapshot().await.get(&id).is_some() {
                        return Err(PluginError::DuplicateIdentifier(id));
                    }
                    self.registry.record_fault(metadata, &cause.message()).await;
                    return Err(self.init_failed(&id, cause));
                }
            },
            None => Vec::new(),
        };

        self.registry.reserve(plugin.clone(), tools).await?;

        let ctx = PluginInitContext {
            plugin_id: id.clone(),
            settings: self.config.settings_for(&id),
        };
        match lifecycle::run_initialize(plugin.as_ref(), &ctx, self.config.init_timeout()).await {
            Ok(()) => {
                self.registry.activate(&id).await?;
                self.events.publish(PluginEvent::loaded(&id));
                info!(plugin = %id, version = %metadata.version, "Plugin registered");
                Ok(())
            }
            Err(cause) => {
                self.registry.fail(&id, &cause.message()).await;
                Err(self.init_failed(&id, cause))
            }
        }
    }

    fn init_failed(&self, id: &str, cause: FaultCause) -> PluginError {
        let reason = cause.message();
        self.events
            .publish(PluginEvent::error(id, FaultStage::Initialize, &reason));
        PluginError::InitializationFailure {
            plugin: id.to_string(),
            reason,
        }
    }

    /// Dispose and remove a plugin. A failing disposer is reported through
    /// an `Error` event; the plugin is removed regardless.
    pub async fn unload_plugin(&self, id: &str) -> PluginResult<()> {
        let entry = self.registry.begin_unload(id).await?;
        if let Err(cause) = lifecycle::run_dispose(entry.plugin.as_ref(), self.config.dispose_timeout()).await {
            self.events
                .publish(PluginEvent::error(id, FaultStage::Dispose, cause.message()));
        }
        self.registry.remove(id).await?;
        self.events.publish(PluginEvent::unloaded(id));
        info!(plugin = %id, "Plugin unloaded");
        Ok(())
    }

    /// Toggle a plugin between `Active` and `Disabled`. Disabled plugins keep
    /// their registry position and are skipped everywhere.
    pub async fn set_plugin_enabled(&self, id: &str, enabled: bool) -> PluginResult<()> {
        let state = self.registry.set_enabled(id, enabled).await?;
        info!(plugin = %id, state = %state, "Plugin toggled");
        Ok(())
    }

    /// Unload every plugin, last registered first.
    pub async fn shutdown(&self) {
        let snapshot = self.registry.snapshot().await;
        for entry in snapshot.entries().iter().rev() {
            if let Err(e) = self.unload_plugin(entry.id()).await {
                debug!(plugin = %entry.id(), error = %e, "Skipped during shutdown");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Registered plugins in registration order, whatever their state.
    pub async fn get_loaded_plugins(&self) -> Vec<PluginInfo> {
        let snapshot = self.registry.snapshot().await;
        snapshot.entries().iter().map(|e| e.info()).collect()
    }

    pub async fn get_plugin(&self, id: &str) -> Option<PluginInfo> {
        let snapshot = self.registry.snapshot().await;
        snapshot
            .get(id)
            .map(|e| e.info())
            .or_else(|| snapshot.fault(id).map(|f| f.info()))
    }

    /// Plugins in the `Error` state, with the reason recorded.
    pub async fn failed_plugins(&self) -> Vec<PluginInfo> {
        let snapshot = self.registry.snapshot().await;
        snapshot.faulted().iter().map(|f| f.info()).collect()
    }

    pub async fn plugin_state(&self, id: &str) -> PluginState {
        self.snapshot_state(id).await
    }

    async fn snapshot_state(&self, id: &str) -> PluginState {
        self.registry.snapshot().await.state_of(id)
    }

    // -----------------------------------------------------------------------
    // Interception
    // -----------------------------------------------------------------------

    pub async fn on_before_send(&self, message: ChatMessage, ctx: &mut ConversationContext) -> ChainOutcome {
        self.intercept(Direction::BeforeSend, message, ctx).await
    }

    pub async fn on_after_receive(&self, message: ChatMessage, ctx: &mut ConversationContext) -> ChainOutcome {
        self.intercept(Direction::AfterReceive, message, ctx).await
    }

    async fn intercept(&self, direction: Direction, message: ChatMessage, ctx: &mut ConversationContext) -> ChainOutcome {
        let snapshot = self.registry.snapshot().await;
        let outcome = self.chain.run(&snapshot, direction, message, ctx).await;
        self.report_faults(&outcome.faults).await;
        outcome
    }

    // -----------------------------------------------------------------------
    // Tools
    // -----------------------------------------------------------------------

    /// Tools of every active plugin.
    pub async fn list_tools(&self) -> Vec<ResolvedPluginTool> {
        let snapshot = self.registry.snapshot().await;
        slots::collect_plugin_tools(&snapshot)
    }

    /// Invoke a tool. See [`ToolDispatcher::execute`] for which failures are
    /// errors and which are failed results.
    pub async fn execute_tool(
        &self,
        plugin_id: &str,
        tool_name: &str,
        params: &ToolParameters,
        cancel: &CancellationToken,
    ) -> PluginResult<ToolResult> {
        let snapshot = self.registry.snapshot().await;
        let outcome = self
            .dispatcher
            .execute(&snapshot, plugin_id, tool_name, params, cancel)
            .await?;
        if let Some(fault) = outcome.fault {
            self.report_faults(std::slice::from_ref(&fault)).await;
        }
        Ok(outcome.result)
    }

    // -----------------------------------------------------------------------
    // UI
    // -----------------------------------------------------------------------

    pub async fn get_message_actions(&self, message: &ChatMessage) -> Vec<MessageAction> {
        let snapshot = self.registry.snapshot().await;
        self.settle(slots::collect_message_actions(&snapshot, message)).await
    }

    pub async fn get_input_extensions(&self) -> Vec<InputExtension> {
        let snapshot = self.registry.snapshot().await;
        self.settle(slots::collect_input_extensions(&snapshot)).await
    }

    pub async fn get_all_plugin_settings(&self) -> Vec<SettingsSchema> {
        let snapshot = self.registry.snapshot().await;
        self.settle(slots::collect_settings(&snapshot)).await
    }

    async fn settle<T>(&self, contributions: Contributions<T>) -> Vec<T> {
        self.report_faults(&contributions.faults).await;
        contributions.items
    }

    // -----------------------------------------------------------------------
    // Faults
    // -----------------------------------------------------------------------

    async fn report_faults(&self, faults: &[PluginFault]) {
        for fault in faults {
            self.events.publish(PluginEvent::error(
                &fault.plugin_id,
                fault.stage,
                fault.cause.message(),
            ));
            if fault.cause.is_panic() && self.registry.fail(&fault.plugin_id, &fault.cause.message()).await {
                warn!(plugin = %fault.plugin_id, stage = %fault.stage, "Plugin panicked; moved to error state");
            }
        }
    }
}
