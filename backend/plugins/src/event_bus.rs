//! Event Bus
//!
//! Broadcasts plugin lifecycle events to observers. Publishing never blocks;
//! a slow subscriber lags and skips events instead of stalling the runtime.

use parley_core::PluginEvent;
use tokio::sync::broadcast;
use tracing::trace;

pub struct EventBus {
    sender: broadcast::Sender<PluginEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { sender: tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: PluginEvent) {
        trace!(plugin = %event.plugin_id, kind = ?event.kind, "Publishing plugin event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PluginEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
