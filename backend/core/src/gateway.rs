//! Contract for the upstream language-model gateway.
//!
//! The HTTP transport lives outside this workspace; the runtime only sees a
//! producer of text deltas. `ScriptedGateway` is the in-tree producer used by
//! the CLI and tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::message::{ChatMessage, Role};

/// Lazy, finite, non-restartable sequence of text deltas for one turn.
pub type TextDeltaStream = BoxStream<'static, Result<String>>;

/// Sampling knobs forwarded to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1024,
        }
    }
}

/// Structured chat request sent to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub sampling: SamplingParams,
}

/// Non-streamed completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub content: String,
    pub model: String,
    pub tokens_used: u64,
}

/// Upstream model gateway.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Gateway name for logs.
    fn name(&self) -> &str;

    /// Return the whole reply at once.
    async fn complete(&self, request: &ChatRequest, cancel: &CancellationToken) -> Result<ChatCompletion>;

    /// Open a streamed reply. Cancelling `cancel` must stop the upstream call.
    async fn stream(&self, request: &ChatRequest, cancel: CancellationToken) -> Result<TextDeltaStream>;
}

/// Gateway that plays back canned chunks.
pub struct ScriptedGateway {
    name: String,
    chunks: Vec<String>,
    echo: bool,
    chunk_delay: Option<Duration>,
    fail_after: Option<usize>,
    calls: Arc<AtomicUsize>,
    cancel_observed: Arc<AtomicBool>,
}

impl ScriptedGateway {
    pub fn new(chunks: Vec<String>) -> Self {
        Self {
            name: "scripted".to_string(),
            chunks,
            echo: false,
            chunk_delay: None,
            fail_after: None,
            calls: Arc::new(AtomicUsize::new(0)),
            cancel_observed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Reply by echoing the last user message word by word.
    pub fn echo() -> Self {
        Self {
            name: "echo".to_string(),
            echo: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Emit `n` chunks and then fail.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Number of `complete`/`stream` calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Whether a stream saw its cancellation token fire.
    pub fn cancel_observed(&self) -> bool {
        self.cancel_observed.load(Ordering::SeqCst)
    }

    fn script_for(&self, request: &ChatRequest) -> Vec<String> {
        if !self.echo {
            return self.chunks.clone();
        }
        let last = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        format!("You said: {}", last)
            .split_inclusive(' ')
            .map(String::from)
            .collect()
    }
}

struct Playback {
    pending: VecDeque<String>,
    emitted: usize,
    fail_after: Option<usize>,
    delay: Option<Duration>,
    cancel: CancellationToken,
    // Dropping the stream drops this sender and stops the watcher task.
    _alive: oneshot::Sender<()>,
}

#[async_trait]
impl LlmGateway for ScriptedGateway {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &ChatRequest, cancel: &CancellationToken) -> Result<ChatCompletion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            self.cancel_observed.store(true, Ordering::SeqCst);
            bail!("request cancelled");
        }
        let script = self.script_for(request);
        if let Some(n) = self.fail_after {
            if n < script.len() {
                bail!("scripted failure after {} chunks", n);
            }
        }
        Ok(ChatCompletion {
            tokens_used: script.len() as u64,
            content: script.concat(),
            model: request.model.clone(),
        })
    }

    async fn stream(&self, request: &ChatRequest, cancel: CancellationToken) -> Result<TextDeltaStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let (alive_tx, alive_rx) = oneshot::channel::<()>();
        let observed = self.cancel_observed.clone();
        let watch = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = watch.cancelled() => observed.store(true, Ordering::SeqCst),
                _ = alive_rx => {}
            }
        });

        let playback = Playback {
            pending: self.script_for(request).into(),
            emitted: 0,
            fail_after: self.fail_after,
            delay: self.chunk_delay,
            cancel,
            _alive: alive_tx,
        };

        let stream = stream::unfold(playback, |mut state| async move {
            if let Some(delay) = state.delay {
                tokio::select! {
                    _ = state.cancel.cancelled() => return None,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if state.cancel.is_cancelled() {
                return None;
            }
            if state.fail_after == Some(state.emitted) && !state.pending.is_empty() {
                state.pending.clear();
                let err = anyhow::anyhow!("scripted failure after {} chunks", state.emitted);
                return Some((Err(err), state));
            }
            let chunk = state.pending.pop_front()?;
            state.emitted += 1;
            Some((Ok(chunk), state))
        });

        Ok(stream.boxed())
    }
}
