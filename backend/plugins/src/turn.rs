//! One chat turn through the plugin runtime.
//!
//! before-send chain -> gateway stream -> relay to the caller -> after-receive chain

use std::collections::HashMap;
use std::sync::Arc;

use parley_config::ParleyConfig;
use parley_core::{
    ChatMessage, ChatRequest, ConversationContext, LlmGateway, PluginError, PluginResult,
    SamplingParams, StreamChunk,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, Instrument};

use crate::manager::PluginManager;
use crate::relay::StreamingRelay;

/// How a turn ended when no plugin blocked it.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    /// The reply, after the after-receive chain, plus merged interceptor metadata.
    Completed {
        reply: ChatMessage,
        metadata: HashMap<String, Value>,
    },
    /// The caller cancelled the turn. `partial` holds text relayed so far.
    Cancelled { partial: String },
}

pub struct TurnRunner {
    manager: Arc<PluginManager>,
    gateway: Arc<dyn LlmGateway>,
    relay: StreamingRelay,
    model: String,
    sampling: SamplingParams,
}

impl TurnRunner {
    pub fn new(manager: Arc<PluginManager>, gateway: Arc<dyn LlmGateway>, config: &ParleyConfig) -> Self {
        Self {
            manager,
            gateway,
            relay: StreamingRelay::new(config.relay.buffer_chunks),
            model: config.gateway.model.clone(),
            sampling: SamplingParams {
                temperature: config.gateway.temperature,
                max_tokens: config.gateway.max_tokens,
            },
        }
    }

    /// Run a turn, forwarding every relayed chunk (end marker included) to `sink`.
    ///
    /// Returns `InterceptionCancelled` when a plugin blocks either side; the
    /// gateway is not called when the before-send chain blocks.
    pub async fn run(
        &self,
        message: ChatMessage,
        ctx: &mut ConversationContext,
        sink: &mpsc::Sender<StreamChunk>,
    ) -> PluginResult<TurnOutcome> {
        let span = info_span!("turn", conversation = %ctx.conversation_id(), message = %message.id);
        self.run_inner(message, ctx, sink).instrument(span).await
    }

    async fn run_inner(
        &self,
        message: ChatMessage,
        ctx: &mut ConversationContext,
        sink: &mpsc::Sender<StreamChunk>,
    ) -> PluginResult<TurnOutcome> {
        let before = self.manager.on_before_send(message, ctx).await;
        if before.is_cancelled() {
            if ctx.is_cancelled() {
                return Ok(TurnOutcome::Cancelled { partial: String::new() });
            }
            return Err(before.cancellation_error().unwrap_or_else(|| {
                PluginError::InterceptionCancelled {
                    plugin: "runtime".into(),
                    reason: "cancelled".into(),
                }
            }));
        }
        let mut metadata = before.result.metadata;

        let mut messages = ctx.history().to_vec();
        messages.push(before.message);
        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            sampling: self.sampling.clone(),
        };

        // Child token: the relay may cancel it without cancelling the caller's context.
        let upstream_cancel = ctx.cancellation().child_token();
        let upstream = self
            .gateway
            .stream(&request, upstream_cancel.clone())
            .await
            .map_err(|e| PluginError::UpstreamStreamFailure(format!("{e:#}")))?;
        debug!(gateway = self.gateway.name(), model = %request.model, "Streaming reply");

        let mut relay = self.relay.start(upstream, upstream_cancel);
        let mut reply = String::new();
        loop {
            let chunk = match relay.next_chunk().await {
                Some(chunk) => chunk?,
                None if ctx.is_cancelled() || relay.is_cancelled() => {
                    info!(chars = reply.len(), "Turn cancelled during streaming");
                    return Ok(TurnOutcome::Cancelled { partial: reply });
                }
                None => {
                    return Err(PluginError::UpstreamStreamFailure(
                        "relay closed before end of stream".into(),
                    ));
                }
            };
            let end = chunk.end_of_stream;
            let delta = chunk.delta.clone();

            let delivered = tokio::select! {
                biased;
                _ = ctx.cancellation().cancelled() => false,
                sent = sink.send(chunk) => sent.is_ok(),
            };
            if !delivered {
                relay.cancel();
                info!(chars = reply.len(), "Caller went away; turn cancelled");
                return Ok(TurnOutcome::Cancelled { partial: reply });
            }
            reply.push_str(&delta);
            if end {
                break;
            }
        }

        let after = self
            .manager
            .on_after_receive(ChatMessage::assistant(reply), ctx)
            .await;
        if after.is_cancelled() {
            if ctx.is_cancelled() {
                return Ok(TurnOutcome::Cancelled {
                    partial: after.message.content,
                });
            }
            return Err(after.cancellation_error().unwrap_or_else(|| {
                PluginError::InterceptionCancelled {
                    plugin: "runtime".into(),
                    reason: "cancelled".into(),
                }
            }));
        }
        metadata.extend(after.result.metadata);
        info!(chars = after.message.content.len(), "Turn completed");
        Ok(TurnOutcome::Completed {
            reply: after.message,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, Behavior};
    use parley_config::PluginsConfig;
    use parley_core::ScriptedGateway;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    async fn manager_with(plugins: Vec<testing::ScriptedInterceptor>) -> Arc<PluginManager> {
        let manager = Arc::new(PluginManager::new(PluginsConfig::default()));
        for plugin in plugins {
            manager.register_plugin(Arc::new(plugin)).await.unwrap();
        }
        manager
    }

    fn chunks(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[tokio::test]
    async fn test_after_receive_rewrites_reply() {
        let log = testing::call_log();
        let manager = manager_with(vec![testing::interceptor("upper", Behavior::Uppercase, &log)]).await;
        let gateway = Arc::new(ScriptedGateway::new(chunks(&["h", "i"])));
        let runner = TurnRunner::new(manager, gateway.clone(), &ParleyConfig::default());

        let (tx, mut rx) = mpsc::channel(16);
        let mut ctx = ConversationContext::new(Uuid::new_v4());
        let outcome = runner.run(ChatMessage::user("hello"), &mut ctx, &tx).await.unwrap();

        match outcome {
            TurnOutcome::Completed { reply, .. } => assert_eq!(reply.content, "HI"),
            other => panic!("unexpected outcome {other:?}"),
        }
        drop(tx);
        let mut relayed = Vec::new();
        while let Some(chunk) = rx.recv().await {
            relayed.push(chunk);
        }
        assert_eq!(relayed.len(), 3);
        assert!(relayed[2].end_of_stream);
        assert_eq!(gateway.calls(), 1);
    }

    #[tokio::test]
    async fn test_before_send_cancel_skips_gateway() {
        let log = testing::call_log();
        let manager = manager_with(vec![
            testing::interceptor("a", Behavior::Proceed, &log),
            testing::interceptor("guard", Behavior::Cancel("not allowed".into()), &log),
            testing::interceptor("c", Behavior::Proceed, &log),
        ])
        .await;
        let gateway = Arc::new(ScriptedGateway::echo());
        let runner = TurnRunner::new(manager, gateway.clone(), &ParleyConfig::default());

        let (tx, _rx) = mpsc::channel(16);
        let err = runner
            .run(ChatMessage::user("hello"), &mut ConversationContext::new(Uuid::new_v4()), &tx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PluginError::InterceptionCancelled { plugin, reason } if plugin == "guard" && reason == "not allowed"
        ));
        assert_eq!(gateway.calls(), 0);
        assert_eq!(*log.lock().unwrap(), vec!["a", "guard"]);
    }

    #[tokio::test]
    async fn test_replaced_message_reaches_gateway() {
        let log = testing::call_log();
        let manager = manager_with(vec![testing::interceptor("shout", Behavior::Uppercase, &log)]).await;
        let runner = TurnRunner::new(manager, Arc::new(ScriptedGateway::echo()), &ParleyConfig::default());

        let (tx, _rx) = mpsc::channel(64);
        let outcome = runner
            .run(ChatMessage::user("quiet"), &mut ConversationContext::new(Uuid::new_v4()), &tx)
            .await
            .unwrap();
        let TurnOutcome::Completed { reply, .. } = outcome else {
            panic!("turn did not complete");
        };
        assert_eq!(reply.content, "YOU SAID: QUIET");
    }

    #[tokio::test]
    async fn test_upstream_failure_surfaces() {
        let manager = manager_with(Vec::new()).await;
        let gateway = ScriptedGateway::new(chunks(&["a", "b"])).failing_after(1);
        let runner = TurnRunner::new(manager, Arc::new(gateway), &ParleyConfig::default());

        let (tx, _rx) = mpsc::channel(16);
        let err = runner
            .run(ChatMessage::user("x"), &mut ConversationContext::new(Uuid::new_v4()), &tx)
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::UpstreamStreamFailure(_)));
    }

    #[tokio::test]
    async fn test_caller_cancel_mid_stream() {
        let manager = manager_with(Vec::new()).await;
        let words: Vec<String> = (0..40).map(|i| format!("w{i} ")).collect();
        let gateway = Arc::new(ScriptedGateway::new(words).with_chunk_delay(Duration::from_millis(5)));
        let runner = TurnRunner::new(manager, gateway.clone(), &ParleyConfig::default());

        let token = CancellationToken::new();
        let mut ctx = ConversationContext::new(Uuid::new_v4()).with_cancellation(token.clone());
        let (tx, mut rx) = mpsc::channel::<StreamChunk>(1);
        let reader = tokio::spawn(async move {
            let mut seen = 0;
            let mut received = String::new();
            while let Some(chunk) = rx.recv().await {
                seen += 1;
                received.push_str(&chunk.delta);
                if seen == 3 {
                    token.cancel();
                }
            }
            (seen, received)
        });

        let outcome = runner.run(ChatMessage::user("go"), &mut ctx, &tx).await.unwrap();
        drop(tx);
        let (seen, received) = reader.await.unwrap();
        match outcome {
            TurnOutcome::Cancelled { partial } => {
                assert!(partial.starts_with("w0 w1 w2 "));
                assert_eq!(partial, received, "partial must hold only delivered text");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(seen <= 5, "caller saw {seen} chunks");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(gateway.cancel_observed());
    }

    struct CrashingGateway;

    #[async_trait::async_trait]
    impl LlmGateway for CrashingGateway {
        fn name(&self) -> &str {
            "crashing"
        }

        async fn complete(
            &self,
            _request: &ChatRequest,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<parley_core::ChatCompletion> {
            anyhow::bail!("not supported")
        }

        async fn stream(
            &self,
            _request: &ChatRequest,
            _cancel: CancellationToken,
        ) -> anyhow::Result<parley_core::TextDeltaStream> {
            use futures::StreamExt;
            let deltas: parley_core::TextDeltaStream =
                Box::pin(futures::stream::iter(vec!["a", "b", "boom"]).map(|delta| {
                    if delta == "boom" {
                        panic!("gateway stream crashed");
                    }
                    Ok::<_, anyhow::Error>(delta.to_string())
                }));
            Ok(deltas)
        }
    }

    #[tokio::test]
    async fn test_crashed_upstream_is_not_reported_as_cancel() {
        let manager = manager_with(Vec::new()).await;
        let runner = TurnRunner::new(manager, Arc::new(CrashingGateway), &ParleyConfig::default());

        let token = CancellationToken::new();
        let mut ctx = ConversationContext::new(Uuid::new_v4()).with_cancellation(token.clone());
        let (tx, mut rx) = mpsc::channel(16);
        let result = runner.run(ChatMessage::user("go"), &mut ctx, &tx).await;

        let Err(err) = result else {
            panic!("crashed stream must fail the turn");
        };
        assert!(matches!(err, PluginError::UpstreamStreamFailure(_)));
        assert!(!token.is_cancelled());
        drop(tx);
        let mut relayed = String::new();
        while let Some(chunk) = rx.recv().await {
            assert!(!chunk.end_of_stream);
            relayed.push_str(&chunk.delta);
        }
        assert_eq!(relayed, "ab");
    }
}
