//! Plugin lifecycle event logger.
//!
//! Drains the manager's broadcast bus and writes each event to the
//! `plugin_events` tracing target.

use parley_core::{PluginEvent, PluginEventKind};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::redact::redact_sensitive_data;

/// Write one lifecycle event to the tracing system.
pub fn log_plugin_event(event: &PluginEvent) {
    match &event.kind {
        PluginEventKind::Loaded => {
            info!(target: "plugin_events", plugin = %event.plugin_id, event_id = %event.id, "Plugin loaded");
        }
        PluginEventKind::Unloaded => {
            info!(target: "plugin_events", plugin = %event.plugin_id, event_id = %event.id, "Plugin unloaded");
        }
        PluginEventKind::Error { stage, message } => {
            warn!(
                target: "plugin_events",
                plugin = %event.plugin_id,
                event_id = %event.id,
                stage = %stage,
                error = %redact_sensitive_data(message),
                "Plugin fault"
            );
        }
    }
}

/// Spawn a task that logs events until the bus closes.
pub fn spawn_event_logger(mut rx: broadcast::Receiver<PluginEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_plugin_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(target: "plugin_events", skipped, "Event logger lagged behind the bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::FaultStage;

    #[tokio::test]
    async fn test_logger_stops_when_bus_closes() {
        let (tx, rx) = broadcast::channel(4);
        let handle = spawn_event_logger(rx);
        tx.send(PluginEvent::loaded("p1")).unwrap();
        tx.send(PluginEvent::error("p1", FaultStage::Tool, "token sk-abcdefghijklmnop1234"))
            .unwrap();
        drop(tx);
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
