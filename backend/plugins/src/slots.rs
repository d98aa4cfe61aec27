//! Plugin slots: aggregate what active plugins contribute to the host.
//!
//! Tools come from the definitions captured at registration. UI elements are
//! queried live from each active UI extension, tagged with the contributing
//! plugin id, and any extension that errors or panics is skipped.

use parley_core::{ChatMessage, FaultStage, ToolDefinition};
use serde::Serialize;
use tracing::warn;

use crate::fault::{guarded_sync, PluginFault};
use crate::registry::RegistrySnapshot;
use crate::sdk::{InputExtension, MessageAction, SettingsSchema, UiExtension};

/// A tool entry from an active plugin, ready to show to the model or user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPluginTool {
    pub plugin_id: String,
    pub definition: ToolDefinition,
}

/// Items gathered from UI extensions plus the faults met on the way.
#[derive(Debug, Clone)]
pub struct Contributions<T> {
    pub items: Vec<T>,
    pub faults: Vec<PluginFault>,
}

/// Tools of every active plugin, in registration order.
pub fn collect_plugin_tools(snapshot: &RegistrySnapshot) -> Vec<ResolvedPluginTool> {
    snapshot
        .dispatchable()
        .flat_map(|entry| {
            entry.tools.iter().map(move |def| ResolvedPluginTool {
                plugin_id: entry.metadata.id.clone(),
                definition: def.clone(),
            })
        })
        .collect()
}

pub fn collect_message_actions(
    snapshot: &RegistrySnapshot,
    message: &ChatMessage,
) -> Contributions<MessageAction> {
    gather(
        snapshot,
        |ui| ui.message_actions(message),
        |action, id| action.plugin_id = id.to_string(),
    )
}

pub fn collect_input_extensions(snapshot: &RegistrySnapshot) -> Contributions<InputExtension> {
    gather(
        snapshot,
        |ui| ui.input_extensions(),
        |ext, id| ext.plugin_id = id.to_string(),
    )
}

pub fn collect_settings(snapshot: &RegistrySnapshot) -> Contributions<SettingsSchema> {
    gather(
        snapshot,
        |ui| Ok(ui.settings_schema()?.into_iter().collect()),
        |schema, id| schema.plugin_id = id.to_string(),
    )
}

fn gather<T>(
    snapshot: &RegistrySnapshot,
    query: impl Fn(&dyn UiExtension) -> anyhow::Result<Vec<T>>,
    tag: impl Fn(&mut T, &str),
) -> Contributions<T> {
    let mut items = Vec::new();
    let mut faults = Vec::new();
    for (entry, ui) in snapshot.ui_extensions() {
        match guarded_sync(|| query(ui)) {
            Ok(mut contributed) => {
                for item in &mut contributed {
                    tag(item, entry.id());
                }
                items.extend(contributed);
            }
            Err(cause) => {
                warn!(plugin = %entry.id(), error = %cause.message(), "UI extension failed; skipping");
                faults.push(PluginFault::new(entry.id(), FaultStage::UiExtension, cause));
            }
        }
    }
    Contributions { items, faults }
}
