//! Streaming sessions: ordered chunk relay with exactly one terminal event.

use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::classifier::{ErrorClassification, ErrorClassifier};
use crate::error_code::ErrorKind;
use crate::provider::{ChunkStream, ProviderAdapter, ProviderRequest};
use crate::types::events::{StreamChunk, StreamEvent, StreamSummary};
use crate::types::request::{GenerationRequest, ParadigmContext};
use crate::{Error, Result};

pub(crate) const CHANNEL_CAPACITY: usize = 64;

/// Ordered, cancellable sequence of [`StreamEvent`]s.
///
/// Yields zero or more `Chunk`s followed by exactly one `Complete` or `Error`, then ends.
pub struct ResponseStream {
    rx: mpsc::Receiver<StreamEvent>,
    finished: bool,
}

impl ResponseStream {
    pub(crate) fn new(rx: mpsc::Receiver<StreamEvent>) -> Self {
        Self {
            rx,
            finished: false,
        }
    }

    /// Drive the stream through the three-callback contract.
    ///
    /// `on_chunk` sees every chunk in order; exactly one of `on_complete` / `on_error` is
    /// called afterwards, even if the producer vanished without a terminal event.
    pub async fn into_callbacks<C, D, E>(mut self, mut on_chunk: C, on_complete: D, on_error: E)
    where
        C: FnMut(StreamChunk),
        D: FnOnce(StreamSummary),
        E: FnOnce(ErrorClassification),
    {
        while let Some(event) = self.next().await {
            match event {
                StreamEvent::Chunk(chunk) => on_chunk(chunk),
                StreamEvent::Complete(summary) => return on_complete(summary),
                StreamEvent::Error(c) => return on_error(c),
            }
        }
        on_error(ErrorClassification::new(
            ErrorKind::Unknown,
            "stream ended without a terminal event",
        ));
    }

    /// Drain the stream into its summary.
    pub async fn collect_summary(mut self) -> std::result::Result<StreamSummary, ErrorClassification> {
        while let Some(event) = self.next().await {
            match event {
                StreamEvent::Chunk(_) => {}
                StreamEvent::Complete(summary) => return Ok(summary),
                StreamEvent::Error(c) => return Err(c),
            }
        }
        Err(ErrorClassification::new(
            ErrorKind::Unknown,
            "stream ended without a terminal event",
        ))
    }
}

impl Stream for ResponseStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.finished = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Open a provider stream and wait for its first chunk.
///
/// A stream that fails before yielding anything is reported as a failed attempt, so the
/// caller can still retry or fall back.
pub(crate) async fn open_first(
    adapter: &dyn ProviderAdapter,
    request: &ProviderRequest,
) -> Result<(Option<StreamChunk>, ChunkStream)> {
    let mut stream = adapter.generate_streaming(request).await?;
    match stream.next().await {
        Some(Ok(chunk)) => Ok((Some(chunk), stream)),
        Some(Err(e)) => Err(e),
        None => Ok((None, stream)),
    }
}

/// Single-provider streaming session. Holds no state across calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamingSession {
    classifier: ErrorClassifier,
    timeout: Option<Duration>,
}

impl StreamingSession {
    pub fn new(classifier: ErrorClassifier) -> Self {
        Self {
            classifier,
            timeout: None,
        }
    }

    /// Bound on opening the stream plus receiving the first chunk.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Stream one request from one adapter, without retry or fallback.
    pub fn open(
        &self,
        adapter: Arc<dyn ProviderAdapter>,
        request: &GenerationRequest,
        cancel: CancellationToken,
    ) -> ResponseStream {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let session = *self;
        let paradigm = request.paradigm().cloned();
        let provider_request = ProviderRequest::from_generation(request)
            .with_model(request.model().map(str::to_string));

        tokio::spawn(async move {
            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled),
                r = session.open_with_timeout(adapter.as_ref(), &provider_request) => r,
            };
            match opened {
                Ok((first, rest)) => {
                    session
                        .relay(first, rest, &tx, &cancel, paradigm, adapter.provider_id())
                        .await
                }
                Err(e) => {
                    let _ = tx.send(StreamEvent::Error(session.classifier.classify(&e))).await;
                }
            }
        });
        ResponseStream::new(rx)
    }

    async fn open_with_timeout(
        &self,
        adapter: &dyn ProviderAdapter,
        request: &ProviderRequest,
    ) -> Result<(Option<StreamChunk>, ChunkStream)> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, open_first(adapter, request))
                .await
                .unwrap_or(Err(Error::Timeout {
                    after_ms: limit.as_millis() as u64,
                })),
            None => open_first(adapter, request).await,
        }
    }

    /// Forward chunks in order, then exactly one terminal event. Stops early if the
    /// receiver is gone. A stream that ended before its first chunk is never polled again.
    pub(crate) async fn relay(
        &self,
        first: Option<StreamChunk>,
        mut rest: ChunkStream,
        tx: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
        paradigm: Option<ParadigmContext>,
        provider: &str,
    ) {
        let mut summary = StreamSummary::new(provider, paradigm);
        let Some(chunk) = first else {
            debug!(provider, "stream ended before any chunk");
            let _ = tx.send(StreamEvent::Complete(summary)).await;
            return;
        };
        summary.absorb(&chunk);
        match forward(tx, StreamEvent::Chunk(chunk), cancel).await {
            Forwarded::Sent => {}
            Forwarded::Closed => return,
            Forwarded::Cancelled => {
                return finish_cancelled(rest, tx, summary.chunk_count, provider).await
            }
        }

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                item = rest.next() => Some(item),
            };
            let Some(next) = next else {
                return finish_cancelled(rest, tx, summary.chunk_count, provider).await;
            };
            match next {
                Some(Ok(chunk)) => {
                    summary.absorb(&chunk);
                    match forward(tx, StreamEvent::Chunk(chunk), cancel).await {
                        Forwarded::Sent => {}
                        Forwarded::Closed => return,
                        Forwarded::Cancelled => {
                            return finish_cancelled(rest, tx, summary.chunk_count, provider).await
                        }
                    }
                }
                Some(Err(e)) => {
                    let c = self.classifier.classify(&e);
                    debug!(
                        provider,
                        error_kind = c.kind.name(),
                        chunks = summary.chunk_count,
                        "stream failed mid-flight"
                    );
                    let _ = tx.send(StreamEvent::Error(c)).await;
                    return;
                }
                None => {
                    debug!(provider, chunks = summary.chunk_count, "stream complete");
                    let _ = tx.send(StreamEvent::Complete(summary)).await;
                    return;
                }
            }
        }
    }
}

enum Forwarded {
    Sent,
    Closed,
    Cancelled,
}

/// Send one event, giving up as soon as the token fires. A full channel does not
/// delay cancellation.
async fn forward(
    tx: &mpsc::Sender<StreamEvent>,
    event: StreamEvent,
    cancel: &CancellationToken,
) -> Forwarded {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Forwarded::Cancelled,
        sent = tx.send(event) => match sent {
            Ok(()) => Forwarded::Sent,
            Err(_) => Forwarded::Closed,
        },
    }
}

/// Release the provider stream first, then queue the single cancellation event behind
/// whatever the consumer has not read yet.
async fn finish_cancelled(
    rest: ChunkStream,
    tx: &mpsc::Sender<StreamEvent>,
    chunks: usize,
    provider: &str,
) {
    drop(rest);
    debug!(provider, chunks, "stream cancelled");
    let _ = tx.send(StreamEvent::Error(ErrorClassification::cancelled())).await;
}
