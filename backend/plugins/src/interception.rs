//! Interception chain.
//!
//! Runs the interceptors of every active plugin over one message, in
//! registration order. Each interceptor sees the message as left by the one
//! before it. The first result with `continue = false` stops the chain, and
//! so does any error, panic, or timeout: a failing interceptor cancels the
//! turn rather than letting an unfiltered message through.

use std::collections::HashMap;
use std::time::Duration;

use parley_core::{ChatMessage, ConversationContext, FaultStage, PluginError};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::fault::{guarded, PluginFault};
use crate::registry::RegistrySnapshot;
use crate::sdk::InterceptResult;

/// Which side of the model call a pass runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// User message on its way to the model.
    BeforeSend,
    /// Model reply on its way to the user.
    AfterReceive,
}

impl Direction {
    pub fn stage(self) -> FaultStage {
        match self {
            Direction::BeforeSend => FaultStage::BeforeSend,
            Direction::AfterReceive => FaultStage::AfterReceive,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::BeforeSend => "before_send",
            Direction::AfterReceive => "after_receive",
        }
    }
}

/// The outcome of one pass over the chain.
#[derive(Debug, Clone)]
pub struct ChainOutcome {
    /// The message after all replacements made before the chain stopped.
    pub message: ChatMessage,
    /// Final result: the cancelling result, or a merged `continue` result.
    pub result: InterceptResult,
    /// Plugin that stopped the chain. `None` if it ran to the end or the turn
    /// itself was cancelled.
    pub cancelled_by: Option<String>,
    /// Plugins invoked, in order.
    pub invoked: Vec<String>,
    pub faults: Vec<PluginFault>,
}

impl ChainOutcome {
    pub fn is_cancelled(&self) -> bool {
        !self.result.proceed
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.result.cancel_reason.as_deref()
    }

    /// `InterceptionCancelled` when a plugin stopped the chain.
    pub fn cancellation_error(&self) -> Option<PluginError> {
        if !self.is_cancelled() {
            return None;
        }
        Some(PluginError::InterceptionCancelled {
            plugin: self.cancelled_by.clone().unwrap_or_else(|| "runtime".to_string()),
            reason: self.cancel_reason().unwrap_or_default().to_string(),
        })
    }
}

/// Sequential interceptor runner with a per-call time budget.
pub struct InterceptionChain {
    timeout: Duration,
}

impl InterceptionChain {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run one pass. Clears the context's plugin data first.
    pub async fn run(
        &self,
        snapshot: &RegistrySnapshot,
        direction: Direction,
        message: ChatMessage,
        ctx: &mut ConversationContext,
    ) -> ChainOutcome {
        ctx.begin_pass();

        let mut current = message;
        let mut replaced = false;
        let mut metadata: HashMap<String, Value> = HashMap::new();
        let mut invoked = Vec::new();
        let mut faults = Vec::new();

        for (entry, interceptor) in snapshot.interceptors() {
            let plugin_id = entry.id().to_string();

            if ctx.is_cancelled() {
                debug!(direction = direction.as_str(), "Turn cancelled; stopping chain");
                return ChainOutcome {
                    message: current,
                    result: stop(metadata, "turn cancelled".to_string()),
                    cancelled_by: None,
                    invoked,
                    faults,
                };
            }

            invoked.push(plugin_id.clone());
            debug!(plugin = %plugin_id, direction = direction.as_str(), "Running interceptor");

            let call = async {
                match direction {
                    Direction::BeforeSend => interceptor.on_before_send(&current, ctx).await,
                    Direction::AfterReceive => interceptor.on_after_receive(&current, ctx).await,
                }
            };

            match guarded(self.timeout, call).await {
                Ok(result) => {
                    metadata.extend(result.metadata);
                    if !result.proceed {
                        let reason = result
                            .cancel_reason
                            .unwrap_or_else(|| format!("cancelled by plugin '{plugin_id}'"));
                        info!(plugin = %plugin_id, direction = direction.as_str(), reason = %reason, "Interceptor cancelled message");
                        return ChainOutcome {
                            message: current,
                            result: InterceptResult {
                                proceed: false,
                                modified_message: result.modified_message,
                                cancel_reason: Some(reason),
                                metadata,
                            },
                            cancelled_by: Some(plugin_id),
                            invoked,
                            faults,
                        };
                    }
                    if let Some(next) = result.modified_message {
                        current = next;
                        replaced = true;
                    }
                }
                Err(cause) => {
                    let reason = format!("interceptor '{plugin_id}' failed: {}", cause.message());
                    warn!(plugin = %plugin_id, direction = direction.as_str(), error = %cause.message(), "Interceptor failed; cancelling");
                    faults.push(PluginFault::new(plugin_id.clone(), direction.stage(), cause));
                    return ChainOutcome {
                        message: current,
                        result: stop(metadata, reason),
                        cancelled_by: Some(plugin_id),
                        invoked,
                        faults,
                    };
                }
            }
        }

        ChainOutcome {
            result: InterceptResult {
                proceed: true,
                modified_message: replaced.then(|| current.clone()),
                cancel_reason: None,
                metadata,
            },
            message: current,
            cancelled_by: None,
            invoked,
            faults,
        }
    }
}

fn stop(metadata: HashMap<String, Value>, reason: String) -> InterceptResult {
    InterceptResult {
        proceed: false,
        modified_message: None,
        cancel_reason: Some(reason),
        metadata,
    }
}
