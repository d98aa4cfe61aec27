use thiserror::Error;

/// Typed failures surfaced by the plugin runtime.
///
/// Faults that originate inside a single plugin are isolated and reported as
/// events or neutral results; only the runtime's own failures reach callers
/// through this type.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin already registered: {0}")]
    DuplicateIdentifier(String),

    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    #[error("tool '{tool}' not found on plugin '{plugin}'")]
    ToolNotFound { plugin: String, tool: String },

    #[error("tool '{tool}' is already provided by plugin '{owner}'")]
    ToolNameCollision { tool: String, owner: String },

    #[error("invalid tool parameters: {0}")]
    ValidationError(String),

    #[error("plugin '{plugin}' failed to initialize: {reason}")]
    InitializationFailure { plugin: String, reason: String },

    #[error("message cancelled by plugin '{plugin}': {reason}")]
    InterceptionCancelled { plugin: String, reason: String },

    #[error("upstream stream failed: {0}")]
    UpstreamStreamFailure(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result alias used across the runtime.
pub type PluginResult<T> = Result<T, PluginError>;

impl PluginError {
    /// Short machine-readable tag for logs and wire payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateIdentifier(_) => "duplicate_identifier",
            Self::PluginNotFound(_) => "plugin_not_found",
            Self::ToolNotFound { .. } => "tool_not_found",
            Self::ToolNameCollision { .. } => "tool_name_collision",
            Self::ValidationError(_) => "validation_error",
            Self::InitializationFailure { .. } => "initialization_failure",
            Self::InterceptionCancelled { .. } => "interception_cancelled",
            Self::UpstreamStreamFailure(_) => "upstream_stream_failure",
            Self::Other(_) => "other",
        }
    }
}
