//! Plugin registry: tracks registered plugins and their states.
//!
//! The registry is copy-on-write. Readers take an `Arc<RegistrySnapshot>`
//! and iterate it without holding any lock; writers clone the current
//! snapshot, mutate the clone, and swap it in. A pass that captured a
//! snapshot keeps seeing it even while plugins are loaded or unloaded.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parley_core::{PluginError, PluginResult, ToolDefinition};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::lifecycle::PluginState;
use crate::sdk::{Capabilities, MessageInterceptor, Plugin, PluginCategory, PluginMetadata, UiExtension};

/// A registered plugin together with its registry bookkeeping.
#[derive(Clone)]
pub struct RegistryEntry {
    pub plugin: Arc<dyn Plugin>,
    pub metadata: PluginMetadata,
    pub state: PluginState,
    pub capabilities: Capabilities,
    /// Tool definitions captured at registration.
    pub tools: Arc<[ToolDefinition]>,
    pub registered_at: DateTime<Utc>,
}

impl RegistryEntry {
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn is_dispatchable(&self) -> bool {
        self.state.is_dispatchable()
    }

    pub fn tool(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn info(&self) -> PluginInfo {
        PluginInfo {
            id: self.metadata.id.clone(),
            name: self.metadata.name.clone(),
            version: self.metadata.version.clone(),
            category: self.metadata.category,
            description: self.metadata.description.clone(),
            state: self.state,
            enabled: self.state == PluginState::Active,
            capabilities: self.capabilities,
            tools: self.tools.iter().map(|t| t.name.clone()).collect(),
            registered_at: Some(self.registered_at),
            error: None,
        }
    }
}

/// A plugin that entered the `Error` state.
#[derive(Debug, Clone)]
pub struct FaultRecord {
    pub metadata: PluginMetadata,
    pub reason: String,
    pub at: DateTime<Utc>,
}

impl FaultRecord {
    pub fn info(&self) -> PluginInfo {
        PluginInfo {
            id: self.metadata.id.clone(),
            name: self.metadata.name.clone(),
            version: self.metadata.version.clone(),
            category: self.metadata.category,
            description: self.metadata.description.clone(),
            state: PluginState::Error,
            enabled: false,
            capabilities: Capabilities::default(),
            tools: Vec::new(),
            registered_at: None,
            error: Some(self.reason.clone()),
        }
    }
}

/// Admin-facing view of a plugin.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub category: PluginCategory,
    pub description: String,
    pub state: PluginState,
    pub enabled: bool,
    pub capabilities: Capabilities,
    pub tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// An immutable view of the registry at one point in time.
#[derive(Clone, Default)]
pub struct RegistrySnapshot {
    entries: Vec<RegistryEntry>,
    faulted: Vec<FaultRecord>,
    tool_index: HashMap<String, String>,
}

impl RegistrySnapshot {
    /// Entries in registration order.
    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&RegistryEntry> {
        self.entries.iter().find(|e| e.id() == id)
    }

    pub fn faulted(&self) -> &[FaultRecord] {
        &self.faulted
    }

    pub fn fault(&self, id: &str) -> Option<&FaultRecord> {
        self.faulted.iter().find(|f| f.metadata.id == id)
    }

    pub fn state_of(&self, id: &str) -> PluginState {
        match self.get(id) {
            Some(entry) => entry.state,
            None if self.fault(id).is_some() => PluginState::Error,
            None => PluginState::Unregistered,
        }
    }

    /// Plugin id owning `tool`, across all registered entries.
    pub fn tool_owner(&self, tool: &str) -> Option<&str> {
        self.tool_index.get(tool).map(String::as_str)
    }

    /// Active entries in registration order.
    pub fn dispatchable(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.iter().filter(|e| e.is_dispatchable())
    }

    /// Active interceptors in registration order.
    pub fn interceptors(&self) -> impl Iterator<Item = (&RegistryEntry, &dyn MessageInterceptor)> {
        self.dispatchable()
            .filter_map(|e| e.plugin.as_interceptor().map(|i| (e, i)))
    }

    /// Active UI extensions in registration order.
    pub fn ui_extensions(&self) -> impl Iterator<Item = (&RegistryEntry, &dyn UiExtension)> {
        self.dispatchable()
            .filter_map(|e| e.plugin.as_ui_extension().map(|u| (e, u)))
    }

    fn entry_mut(&mut self, id: &str) -> PluginResult<&mut RegistryEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.metadata.id == id)
            .ok_or_else(|| PluginError::PluginNotFound(id.to_string()))
    }

    fn rebuild_tool_index(&mut self) {
        self.tool_index = self
            .entries
            .iter()
            .flat_map(|e| e.tools.iter().map(move |t| (t.name.clone(), e.metadata.id.clone())))
            .collect();
    }
}

fn transition(entry: &mut RegistryEntry, next: PluginState) -> PluginResult<()> {
    if !entry.state.can_transition_to(next) {
        return Err(PluginError::Other(anyhow::anyhow!(
            "plugin '{}' cannot move from {} to {}",
            entry.metadata.id,
            entry.state,
            next
        )));
    }
    debug!(plugin = %entry.metadata.id, from = %entry.state, to = %next, "Plugin state change");
    entry.state = next;
    Ok(())
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Copy-on-write plugin registry.
#[derive(Default)]
pub struct PluginRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot. Cheap; never blocks on in-flight passes.
    pub async fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.read().await.clone()
    }

    /// Claim `plugin`'s id and tool names and record it as `Initializing`.
    ///
    /// Fails with `DuplicateIdentifier` if the id is registered in any
    /// non-error state, or `ToolNameCollision` if another plugin already
    /// owns one of `tools`.
    pub async fn reserve(&self, plugin: Arc<dyn Plugin>, tools: Vec<ToolDefinition>) -> PluginResult<()> {
        let metadata = plugin.metadata().clone();
        let capabilities = Capabilities::of(plugin.as_ref());
        self.mutate(move |snap| {
            if snap.get(&metadata.id).is_some() {
                return Err(PluginError::DuplicateIdentifier(metadata.id));
            }
            let mut seen = Vec::with_capacity(tools.len());
            for tool in &tools {
                if let Some(owner) = snap.tool_owner(&tool.name) {
                    return Err(PluginError::ToolNameCollision {
                        tool: tool.name.clone(),
                        owner: owner.to_string(),
                    });
                }
                if seen.contains(&tool.name.as_str()) {
                    return Err(PluginError::ToolNameCollision {
                        tool: tool.name.clone(),
                        owner: metadata.id.clone(),
                    });
                }
                seen.push(tool.name.as_str());
            }

            snap.faulted.retain(|f| f.metadata.id != metadata.id);
            let mut entry = RegistryEntry {
                plugin,
                metadata,
                state: PluginState::Unregistered,
                capabilities,
                tools: tools.into(),
                registered_at: Utc::now(),
            };
            transition(&mut entry, PluginState::Initializing)?;
            snap.entries.push(entry);
            Ok(())
        })
        .await
    }

    /// `Initializing` -> `Active`.
    pub async fn activate(&self, id: &str) -> PluginResult<()> {
        self.mutate(|snap| transition(snap.entry_mut(id)?, PluginState::Active))
            .await
    }

    /// Toggle between `Active` and `Disabled`. Order is preserved.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> PluginResult<PluginState> {
        let target = if enabled {
            PluginState::Active
        } else {
            PluginState::Disabled
        };
        self.mutate(|snap| {
            let entry = snap.entry_mut(id)?;
            match entry.state {
                PluginState::Active | PluginState::Disabled => {
                    if entry.state != target {
                        transition(entry, target)?;
                    }
                    Ok(entry.state)
                }
                other => Err(PluginError::Other(anyhow::anyhow!(
                    "plugin '{id}' is {other} and cannot be toggled"
                ))),
            }
        })
        .await
    }

    /// Move a plugin to `Error`: its entry is replaced by a fault record and
    /// its tool names are released.
    ///
    /// Returns `false` when the plugin is gone or in a state that cannot
    /// fault (for example already unloading).
    pub async fn fail(&self, id: &str, reason: &str) -> bool {
        let result = self
            .mutate(|snap| {
                let Some(pos) = snap.entries.iter().position(|e| e.metadata.id == id) else {
                    return Ok(false);
                };
                if !snap.entries[pos].state.can_transition_to(PluginState::Error) {
                    return Ok(false);
                }
                let entry = snap.entries.remove(pos);
                snap.faulted.push(FaultRecord {
                    metadata: entry.metadata,
                    reason: reason.to_string(),
                    at: Utc::now(),
                });
                Ok(true)
            })
            .await;
        match result {
            Ok(moved) => moved,
            Err(e) => {
                warn!(plugin = %id, error = %e, "Could not record plugin fault");
                false
            }
        }
    }

    /// `Active`/`Disabled` -> `Unloading`; returns the entry to dispose.
    pub async fn begin_unload(&self, id: &str) -> PluginResult<RegistryEntry> {
        self.mutate(|snap| {
            let entry = snap.entry_mut(id)?;
            match entry.state {
                PluginState::Active | PluginState::Disabled => {
                    transition(entry, PluginState::Unloading)?;
                    Ok(entry.clone())
                }
                _ => Err(PluginError::PluginNotFound(id.to_string())),
            }
        })
        .await
    }

    /// `Unloading` -> `Unregistered`: drop the entry.
    pub async fn remove(&self, id: &str) -> PluginResult<()> {
        self.mutate(|snap| {
            let pos = snap
                .entries
                .iter()
                .position(|e| e.metadata.id == id)
                .ok_or_else(|| PluginError::PluginNotFound(id.to_string()))?;
            transition(&mut snap.entries[pos], PluginState::Unregistered)?;
            snap.entries.remove(pos);
            Ok(())
        })
        .await
    }

    /// Record a plugin that failed before it could be reserved.
    pub async fn record_fault(&self, metadata: PluginMetadata, reason: &str) {
        let _ = self
            .mutate(|snap| {
                snap.faulted.retain(|f| f.metadata.id != metadata.id);
                snap.faulted.push(FaultRecord {
                    metadata,
                    reason: reason.to_string(),
                    at: Utc::now(),
                });
                Ok(())
            })
            .await;
    }

    async fn mutate<R>(&self, f: impl FnOnce(&mut RegistrySnapshot) -> PluginResult<R>) -> PluginResult<R> {
        let mut current = self.current.write().await;
        let mut next = RegistrySnapshot::clone(&current);
        let out = f(&mut next)?;
        next.rebuild_tool_index();
        *current = Arc::new(next);
        Ok(out)
    }
}
