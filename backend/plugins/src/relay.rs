//! Streaming relay.
//!
//! Pumps text deltas from the gateway to the caller one chunk at a time. The
//! hand-off channel is bounded (one chunk by default), so the upstream read
//! never runs ahead of the consumer. Cancelling the token, or dropping the
//! [`RelayStream`] before it finishes, stops the pump and drops the upstream
//! stream within one chunk.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use parley_core::{PluginError, PluginResult, StreamChunk, TextDeltaStream};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Spawns relay pumps with a fixed hand-off buffer.
#[derive(Debug, Clone, Copy)]
pub struct StreamingRelay {
    buffer: usize,
}

impl Default for StreamingRelay {
    fn default() -> Self {
        Self::new(1)
    }
}

impl StreamingRelay {
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
        }
    }

    /// Start relaying `upstream`. `cancel` should be the token the upstream
    /// was opened with, so cancelling the relay also reaches the gateway.
    pub fn start(&self, upstream: TextDeltaStream, cancel: CancellationToken) -> RelayStream {
        let (tx, rx) = mpsc::channel(self.buffer);
        tokio::spawn(pump(upstream, tx, cancel.clone()));
        RelayStream {
            inner: ReceiverStream::new(rx),
            cancel,
            finished: false,
        }
    }
}

async fn pump(
    mut upstream: TextDeltaStream,
    tx: mpsc::Sender<PluginResult<StreamChunk>>,
    cancel: CancellationToken,
) {
    let mut index = 0u64;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(chunks = index, "Relay cancelled");
                break;
            }
            next = upstream.next() => next,
        };

        let (item, terminal) = match next {
            Some(Ok(delta)) => (Ok(StreamChunk::delta(index, delta)), false),
            Some(Err(e)) => (Err(PluginError::UpstreamStreamFailure(format!("{e:#}"))), true),
            None => (Ok(StreamChunk::end(index)), true),
        };

        let delivered = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            sent = tx.send(item) => sent.is_ok(),
        };
        if !delivered {
            debug!(chunks = index, "Relay consumer gone; cancelling upstream");
            cancel.cancel();
            break;
        }
        if terminal {
            debug!(chunks = index, "Relay finished");
            break;
        }
        index += 1;
    }
}

/// Caller side of a relay.
///
/// Yields deltas in order and then either one end-of-stream chunk or one
/// `UpstreamStreamFailure`, also when the pump dies mid-stream. A cancelled
/// relay just stops yielding.
pub struct RelayStream {
    inner: ReceiverStream<PluginResult<StreamChunk>>,
    cancel: CancellationToken,
    finished: bool,
}

impl RelayStream {
    pub async fn next_chunk(&mut self) -> Option<PluginResult<StreamChunk>> {
        self.next().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Stream for RelayStream {
    type Item = PluginResult<StreamChunk>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_next(cx);
        match &polled {
            Poll::Ready(Some(Ok(chunk))) if chunk.end_of_stream => this.finished = true,
            Poll::Ready(Some(Err(_))) => this.finished = true,
            Poll::Ready(None) if !this.finished => {
                this.finished = true;
                // The pump only closes the channel early when cancelled; anything
                // else means it died with the upstream stream.
                if !this.cancel.is_cancelled() {
                    warn!("Relay pump stopped before end of stream");
                    return Poll::Ready(Some(Err(PluginError::UpstreamStreamFailure(
                        "stream ended without an end-of-stream marker".into(),
                    ))));
                }
            }
            _ => {}
        }
        polled
    }
}

impl Drop for RelayStream {
    fn drop(&mut self) {
        if !self.finished {
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{ChatMessage, ChatRequest, LlmGateway, SamplingParams, ScriptedGateway};
    use std::time::Duration;

    fn request() -> ChatRequest {
        ChatRequest {
            model: "test".into(),
            messages: vec![ChatMessage::user("hello there")],
            sampling: SamplingParams::default(),
        }
    }

    async fn open(gateway: &ScriptedGateway, token: &CancellationToken) -> RelayStream {
        let upstream = gateway.stream(&request(), token.clone()).await.unwrap();
        StreamingRelay::default().start(upstream, token.clone())
    }

    #[tokio::test]
    async fn test_relays_in_order_then_ends() {
        let gateway = ScriptedGateway::new(vec!["a".into(), "b".into(), "c".into()]);
        let token = CancellationToken::new();
        let relay = open(&gateway, &token).await;

        let chunks: Vec<StreamChunk> = relay.map(|c| c.unwrap()).collect().await;
        let deltas: Vec<&str> = chunks.iter().map(|c| c.delta.as_str()).collect();
        assert_eq!(deltas, vec!["a", "b", "c", ""]);
        assert_eq!(chunks.iter().map(|c| c.index).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert!(chunks[3].end_of_stream);
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_upstream_failure_is_last_item() {
        let gateway = ScriptedGateway::new(vec!["a".into(), "b".into(), "c".into()]).failing_after(1);
        let token = CancellationToken::new();
        let mut relay = open(&gateway, &token).await;

        assert_eq!(relay.next_chunk().await.unwrap().unwrap().delta, "a");
        let err = relay.next_chunk().await.unwrap().unwrap_err();
        assert!(matches!(err, PluginError::UpstreamStreamFailure(_)));
        assert!(relay.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn test_panicking_upstream_is_a_failure_not_a_cancel() {
        let upstream: TextDeltaStream = Box::pin(
            futures::stream::iter(vec!["a", "b", "boom"]).map(|delta| {
                if delta == "boom" {
                    panic!("upstream decoder crashed");
                }
                Ok::<_, anyhow::Error>(delta.to_string())
            }),
        );
        let token = CancellationToken::new();
        let mut relay = StreamingRelay::default().start(upstream, token.clone());

        assert_eq!(relay.next_chunk().await.unwrap().unwrap().delta, "a");
        assert_eq!(relay.next_chunk().await.unwrap().unwrap().delta, "b");
        let err = relay.next_chunk().await.unwrap().unwrap_err();
        assert!(matches!(err, PluginError::UpstreamStreamFailure(_)));
        assert!(relay.next_chunk().await.is_none());
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_stops_within_one_chunk_and_reaches_upstream() {
        let chunks = (0..50).map(|i| format!("w{i} ")).collect();
        let gateway = ScriptedGateway::new(chunks).with_chunk_delay(Duration::from_millis(5));
        let token = CancellationToken::new();
        let mut relay = open(&gateway, &token).await;

        for _ in 0..3 {
            assert!(!relay.next_chunk().await.unwrap().unwrap().end_of_stream);
        }
        relay.cancel();

        let mut after_cancel = 0;
        while let Some(chunk) = relay.next_chunk().await {
            assert!(!chunk.unwrap().end_of_stream);
            after_cancel += 1;
        }
        assert!(after_cancel <= 1, "relay kept going for {after_cancel} chunks");
        assert!(relay.is_cancelled());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(gateway.cancel_observed());
    }

    #[tokio::test]
    async fn test_dropping_consumer_cancels_upstream() {
        let chunks = (0..50).map(|i| format!("w{i} ")).collect();
        let gateway = ScriptedGateway::new(chunks).with_chunk_delay(Duration::from_millis(5));
        let token = CancellationToken::new();
        let mut relay = open(&gateway, &token).await;
        relay.next_chunk().await.unwrap().unwrap();
        drop(relay);

        assert!(token.is_cancelled());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(gateway.cancel_observed());
    }
}
