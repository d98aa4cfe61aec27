//! Tool dispatcher.
//!
//! Routes a tool call to the plugin that owns it, validates the parameters
//! against the captured definition, and runs the tool under a time limit and
//! the caller's cancellation token. Lookup failures are errors; everything
//! that goes wrong after lookup is reported as a failed [`ToolResult`].

use std::time::{Duration, Instant};

use parley_core::{FaultStage, PluginError, PluginResult, ToolErrorKind, ToolParameters, ToolResult};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::fault::{guarded, PluginFault};
use crate::registry::RegistrySnapshot;

/// A normalized tool result plus the fault that produced it, if any.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub result: ToolResult,
    pub fault: Option<PluginFault>,
}

impl DispatchOutcome {
    fn clean(result: ToolResult) -> Self {
        Self { result, fault: None }
    }
}

pub struct ToolDispatcher {
    timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Dispatch a single tool call.
    pub async fn execute(
        &self,
        snapshot: &RegistrySnapshot,
        plugin_id: &str,
        tool_name: &str,
        params: &ToolParameters,
        cancel: &CancellationToken,
    ) -> PluginResult<DispatchOutcome> {
        let not_found = || PluginError::ToolNotFound {
            plugin: plugin_id.to_string(),
            tool: tool_name.to_string(),
        };

        let entry = snapshot
            .get(plugin_id)
            .ok_or_else(|| PluginError::PluginNotFound(plugin_id.to_string()))?;
        if !entry.is_dispatchable() {
            debug!(plugin = %plugin_id, state = %entry.state, "Tool call to inactive plugin");
            return Err(not_found());
        }
        let provider = entry.plugin.as_tool_provider().ok_or_else(not_found)?;
        let definition = entry.tool(tool_name).ok_or_else(not_found)?;

        let args = match definition.validate(params) {
            Ok(args) => args,
            Err(problems) => {
                debug!(plugin = %plugin_id, tool = %tool_name, problems = %problems, "Tool parameters rejected");
                return Ok(DispatchOutcome::clean(ToolResult::failure(ToolErrorKind::Validation, problems)));
            }
        };

        if cancel.is_cancelled() {
            return Ok(DispatchOutcome::clean(cancelled()));
        }

        let started = Instant::now();
        let run = guarded(self.timeout, provider.execute_tool(tool_name, &args, cancel));
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => DispatchOutcome::clean(cancelled()),
            result = run => match result {
                Ok(result) => DispatchOutcome::clean(result),
                Err(cause) => {
                    warn!(plugin = %plugin_id, tool = %tool_name, error = %cause.message(), "Tool failed");
                    DispatchOutcome {
                        result: ToolResult::failure(cause.tool_error_kind(), cause.message()),
                        fault: Some(PluginFault::new(plugin_id, FaultStage::Tool, cause)),
                    }
                }
            },
        };

        info!(
            plugin = %plugin_id,
            tool = %tool_name,
            success = outcome.result.success,
            latency_ms = started.elapsed().as_millis() as u64,
            "Tool call finished"
        );
        Ok(outcome)
    }
}

fn cancelled() -> ToolResult {
    ToolResult::failure(ToolErrorKind::Cancelled, "tool call cancelled")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PluginRegistry;
    use crate::sdk::Plugin;
    use crate::testing::SearchPlugin;
    use serde_json::json;
    use std::sync::Arc;

    async fn registry() -> PluginRegistry {
        let registry = PluginRegistry::new();
        let plugin: Arc<dyn Plugin> = Arc::new(SearchPlugin::new("finder"));
        let tools = plugin.as_tool_provider().map(|p| p.list_tools()).unwrap_or_default();
        registry.reserve(plugin, tools).await.unwrap();
        registry.activate("finder").await.unwrap();
        registry
    }

    fn params(value: serde_json::Value) -> ToolParameters {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_search_succeeds_with_defaults_applied() {
        let registry = registry().await;
        let dispatcher = ToolDispatcher::new(Duration::from_secs(1));
        let out = dispatcher
            .execute(
                &*registry.snapshot().await,
                "finder",
                "search",
                &params(json!({"query": "rust"})),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(out.result.success);
        assert_eq!(out.result.data["query"], "rust");
        assert_eq!(out.result.data["limit"], 5);
        assert_eq!(out.result.usage.unwrap().input_tokens, 3);
        assert!(out.fault.is_none());
    }

    #[tokio::test]
    async fn test_lookup_failures_are_errors() {
        let registry = registry().await;
        let snap = registry.snapshot().await;
        let dispatcher = ToolDispatcher::new(Duration::from_secs(1));
        let token = CancellationToken::new();

        let err = dispatcher
            .execute(&snap, "ghost", "search", &ToolParameters::new(), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::PluginNotFound(_)));

        let err = dispatcher
            .execute(&snap, "finder", "nope", &ToolParameters::new(), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::ToolNotFound { tool, .. } if tool == "nope"));

        registry.set_enabled("finder", false).await.unwrap();
        let err = dispatcher
            .execute(&*registry.snapshot().await, "finder", "search", &params(json!({"query": "x"})), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::ToolNotFound { .. }));
    }

    #[tokio::test]
    async fn test_validation_failure_is_a_result() {
        let registry = registry().await;
        let dispatcher = ToolDispatcher::new(Duration::from_secs(1));
        let out = dispatcher
            .execute(
                &*registry.snapshot().await,
                "finder",
                "search",
                &params(json!({"limit": "ten"})),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(!out.result.success);
        assert_eq!(out.result.error_kind, Some(ToolErrorKind::Validation));
        let error = out.result.error.unwrap();
        assert!(error.contains("query"));
        assert!(error.contains("limit"));
    }

    #[tokio::test]
    async fn test_error_and_panic_become_failures() {
        let registry = registry().await;
        let snap = registry.snapshot().await;
        let dispatcher = ToolDispatcher::new(Duration::from_secs(1));
        let token = CancellationToken::new();

        let out = dispatcher
            .execute(&snap, "finder", "explode", &ToolParameters::new(), &token)
            .await
            .unwrap();
        assert_eq!(out.result.error_kind, Some(ToolErrorKind::Execution));
        assert_eq!(out.result.error.as_deref(), Some("backend unavailable"));
        assert!(!out.fault.unwrap().cause.is_panic());

        let out = dispatcher
            .execute(&snap, "finder", "panic", &ToolParameters::new(), &token)
            .await
            .unwrap();
        assert!(!out.result.success);
        assert!(out.fault.unwrap().cause.is_panic());
    }

    #[tokio::test]
    async fn test_timeout_and_cancellation() {
        let registry = registry().await;
        let snap = registry.snapshot().await;

        let short = ToolDispatcher::new(Duration::from_millis(20));
        let out = short
            .execute(&snap, "finder", "wait", &ToolParameters::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.result.error_kind, Some(ToolErrorKind::Timeout));

        let dispatcher = ToolDispatcher::new(Duration::from_secs(5));
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let out = dispatcher
            .execute(&snap, "finder", "wait", &ToolParameters::new(), &token)
            .await
            .unwrap();
        assert_eq!(out.result.error_kind, Some(ToolErrorKind::Cancelled));
    }
}
