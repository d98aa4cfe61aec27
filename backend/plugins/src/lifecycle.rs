//! Plugin lifecycle: the state machine and the guarded init/dispose sequences.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::fault::{guarded, FaultCause};
use crate::sdk::{Plugin, PluginInitContext};

/// Current state of a plugin.
///
/// ```text
/// Unregistered -> Initializing -> Active <-> Disabled
///                      |            |           |
///                      v            v           v
///                    Error        Error     Unloading -> Unregistered
/// ```
///
/// `Active` also reaches `Unloading`. `Error` is terminal until the plugin is
/// registered again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Unregistered,
    Initializing,
    Active,
    Disabled,
    Unloading,
    Error,
}

impl PluginState {
    pub fn can_transition_to(self, next: PluginState) -> bool {
        use PluginState::*;
        matches!(
            (self, next),
            (Unregistered, Initializing)
                | (Initializing, Active)
                | (Initializing, Error)
                | (Active, Disabled)
                | (Disabled, Active)
                | (Active, Unloading)
                | (Disabled, Unloading)
                | (Active, Error)
                | (Unloading, Unregistered)
        )
    }

    /// Only active plugins are invoked.
    pub fn is_dispatchable(self) -> bool {
        self == PluginState::Active
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PluginState::Unregistered => "unregistered",
            PluginState::Initializing => "initializing",
            PluginState::Active => "active",
            PluginState::Disabled => "disabled",
            PluginState::Unloading => "unloading",
            PluginState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Run a plugin initializer under `limit`.
pub async fn run_initialize(
    plugin: &dyn Plugin,
    ctx: &PluginInitContext,
    limit: Duration,
) -> Result<(), FaultCause> {
    debug!(plugin = %ctx.plugin_id, "Running initializer");
    match guarded(limit, plugin.initialize(ctx)).await {
        Ok(()) => {
            info!(plugin = %ctx.plugin_id, version = %plugin.metadata().version, "Plugin initialized");
            Ok(())
        }
        Err(cause) => {
            warn!(plugin = %ctx.plugin_id, error = %cause.message(), "Plugin initializer failed");
            Err(cause)
        }
    }
}

/// Run a plugin disposer under `limit`. Failures are reported, never fatal.
pub async fn run_dispose(plugin: &dyn Plugin, limit: Duration) -> Result<(), FaultCause> {
    let plugin_id = &plugin.metadata().id;
    debug!(plugin = %plugin_id, "Running disposer");
    guarded(limit, plugin.dispose()).await.inspect_err(|cause| {
        warn!(plugin = %plugin_id, error = %cause.message(), "Plugin disposer failed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::{PluginCategory, PluginMetadata};
    use async_trait::async_trait;

    #[test]
    fn test_legal_transitions() {
        use PluginState::*;
        assert!(Unregistered.can_transition_to(Initializing));
        assert!(Initializing.can_transition_to(Error));
        assert!(Active.can_transition_to(Disabled));
        assert!(Disabled.can_transition_to(Active));
        assert!(Disabled.can_transition_to(Unloading));
        assert!(Unloading.can_transition_to(Unregistered));
    }

    #[test]
    fn test_illegal_transitions() {
        use PluginState::*;
        assert!(!Unregistered.can_transition_to(Active));
        assert!(!Error.can_transition_to(Active));
        assert!(!Disabled.can_transition_to(Error));
        assert!(!Unloading.can_transition_to(Active));
        assert!(!Initializing.can_transition_to(Disabled));
    }

    #[test]
    fn test_only_active_is_dispatchable() {
        assert!(PluginState::Active.is_dispatchable());
        assert!(!PluginState::Disabled.is_dispatchable());
        assert!(!PluginState::Initializing.is_dispatchable());
    }

    struct Slow {
        meta: PluginMetadata,
    }

    #[async_trait]
    impl Plugin for Slow {
        fn metadata(&self) -> &PluginMetadata {
            &self.meta
        }

        async fn initialize(&self, _ctx: &PluginInitContext) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        }

        async fn dispose(&self) -> anyhow::Result<()> {
            anyhow::bail!("socket already closed")
        }
    }

    #[tokio::test]
    async fn test_initialize_timeout_and_dispose_error() {
        let plugin = Slow {
            meta: PluginMetadata::new("slow", "Slow", "1.0.0", PluginCategory::Other),
        };
        let ctx = PluginInitContext {
            plugin_id: "slow".into(),
            settings: serde_json::Value::Null,
        };
        let init = run_initialize(&plugin, &ctx, Duration::from_millis(20)).await;
        assert_eq!(init, Err(FaultCause::Timeout(Duration::from_millis(20))));

        let dispose = run_dispose(&plugin, Duration::from_secs(1)).await;
        assert_eq!(dispose, Err(FaultCause::Error("socket already closed".into())));
    }
}
