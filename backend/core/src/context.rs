//! Per-turn conversation context handed to interceptors.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::message::ChatMessage;

/// Scratch space shared by the interceptors of one pass.
pub type PluginData = HashMap<String, serde_json::Value>;

/// Everything an interceptor may know about the turn in progress.
///
/// History is an immutable snapshot loaded by the caller; only the plugin
/// data bag is writable, and it is cleared at the start of every pass.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    conversation_id: Uuid,
    user_id: Option<Uuid>,
    workspace_id: Option<Uuid>,
    history: Arc<[ChatMessage]>,
    plugin_data: PluginData,
    cancel: CancellationToken,
}

impl ConversationContext {
    pub fn new(conversation_id: Uuid) -> Self {
        Self {
            conversation_id,
            user_id: None,
            workspace_id: None,
            history: Arc::from(Vec::new()),
            plugin_data: PluginData::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_workspace(mut self, workspace_id: Uuid) -> Self {
        self.workspace_id = Some(workspace_id);
        self
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = Arc::from(history);
        self
    }

    /// Use an existing token so the caller can cancel the turn.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.user_id
    }

    pub fn workspace_id(&self) -> Option<Uuid> {
        self.workspace_id
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn plugin_data(&self) -> &PluginData {
        &self.plugin_data
    }

    pub fn plugin_data_mut(&mut self) -> &mut PluginData {
        &mut self.plugin_data
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drop scratch data left over from a previous pass.
    pub fn begin_pass(&mut self) {
        self.plugin_data.clear();
    }
}
