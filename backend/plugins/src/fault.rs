//! Containment for plugin code.
//!
//! Every call into a plugin runs through [`guarded`] or [`guarded_sync`], so
//! an error, a panic, or a stall surfaces as a [`FaultCause`] instead of
//! escaping into the host.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use parley_core::{FaultStage, ToolErrorKind};

/// Why a plugin call did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultCause {
    /// The plugin returned an error.
    Error(String),
    /// The plugin panicked.
    Panic(String),
    /// The plugin did not finish within its budget.
    Timeout(Duration),
}

impl FaultCause {
    /// Panics move the plugin to the `Error` state; errors and timeouts don't.
    pub fn is_panic(&self) -> bool {
        matches!(self, FaultCause::Panic(_))
    }

    pub fn message(&self) -> String {
        match self {
            FaultCause::Error(msg) => msg.clone(),
            FaultCause::Panic(msg) => format!("panicked: {msg}"),
            FaultCause::Timeout(limit) => format!("timed out after {}ms", limit.as_millis()),
        }
    }

    pub fn tool_error_kind(&self) -> ToolErrorKind {
        match self {
            FaultCause::Timeout(_) => ToolErrorKind::Timeout,
            _ => ToolErrorKind::Execution,
        }
    }
}

/// A contained failure, attributed to a plugin and a call site.
#[derive(Debug, Clone)]
pub struct PluginFault {
    pub plugin_id: String,
    pub stage: FaultStage,
    pub cause: FaultCause,
}

impl PluginFault {
    pub fn new(plugin_id: impl Into<String>, stage: FaultStage, cause: FaultCause) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            stage,
            cause,
        }
    }
}

/// Await a plugin future under a time limit, catching panics.
pub async fn guarded<T, F>(limit: Duration, fut: F) -> Result<T, FaultCause>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, AssertUnwindSafe(fut).catch_unwind()).await {
        Err(_) => Err(FaultCause::Timeout(limit)),
        Ok(Err(payload)) => Err(FaultCause::Panic(panic_message(payload.as_ref()))),
        Ok(Ok(Err(e))) => Err(FaultCause::Error(format!("{e:#}"))),
        Ok(Ok(Ok(value))) => Ok(value),
    }
}

/// Synchronous counterpart of [`guarded`] for UI hooks and tool listing.
pub fn guarded_sync<T>(f: impl FnOnce() -> anyhow::Result<T>) -> Result<T, FaultCause> {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Err(payload) => Err(FaultCause::Panic(panic_message(payload.as_ref()))),
        Ok(Err(e)) => Err(FaultCause::Error(format!("{e:#}"))),
        Ok(Ok(value)) => Ok(value),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
