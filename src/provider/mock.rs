//! Scripted in-process adapter.
//!
//! Replays a fixed sequence of [`ScriptStep`]s, one per call, which makes fallback,
//! retry, streaming and tool-loop behavior reproducible without a network. Also backs
//! the `mock` provider kind in configuration files.

use async_trait::async_trait;
use futures::stream;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::transport::HttpTransport;
use crate::types::events::{ChunkMetadata, StreamChunk};
use crate::types::tool::ToolCall;
use crate::{Error, Result};

use super::{ChunkStream, ProviderAdapter, ProviderRequest, ProviderResponse};

/// Shared log of provider ids in call order, for asserting fallback order across adapters.
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// What the adapter does on one call.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    Reply(ProviderResponse),
    /// Streamed as separate chunks; a non-streaming call gets the concatenation.
    Chunks(Vec<String>),
    /// HTTP-style failure with a status code and raw body.
    Fail { status: u16, body: String },
    /// Transport-level timeout.
    Timeout,
    /// Never completes.
    Hang,
    /// Emits the chunks, then never completes.
    StreamThenHang(Vec<String>),
    /// Emits the chunks, then fails mid-stream.
    StreamThenFail {
        chunks: Vec<String>,
        status: u16,
        body: String,
    },
    /// Replies with the last user message.
    Echo,
}

impl ScriptStep {
    pub fn text(text: impl Into<String>) -> Self {
        ScriptStep::Reply(ProviderResponse::text(text))
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        ScriptStep::Reply(
            ProviderResponse::default().with_tool_calls(vec![ToolCall::new(id, name, arguments)]),
        )
    }

    pub fn chunks(parts: &[&str]) -> Self {
        ScriptStep::Chunks(parts.iter().map(|p| p.to_string()).collect())
    }

    pub fn rate_limited() -> Self {
        ScriptStep::Fail {
            status: 429,
            body: r#"{"error":{"code":"rate_limit_exceeded","message":"Rate limit reached"}}"#
                .into(),
        }
    }

    pub fn quota_exceeded() -> Self {
        ScriptStep::Fail {
            status: 429,
            body: r#"{"error":{"code":"insufficient_quota","message":"You exceeded your current quota"}}"#
                .into(),
        }
    }

    pub fn server_error() -> Self {
        ScriptStep::Fail {
            status: 500,
            body: r#"{"error":{"message":"internal error"}}"#.into(),
        }
    }
}

fn remote(status: u16, body: &str) -> Error {
    Error::Remote {
        status,
        message: body.to_string(),
        provider_code: HttpTransport::error_code_from_body(body),
        retry_after_ms: None,
    }
}

#[derive(Debug)]
pub struct ScriptedAdapter {
    id: String,
    supports_tools: bool,
    steps: Mutex<VecDeque<ScriptStep>>,
    repeat: Option<ScriptStep>,
    calls: AtomicUsize,
    requests: Mutex<Vec<ProviderRequest>>,
    call_log: Option<CallLog>,
}

impl ScriptedAdapter {
    /// Adapter with an empty script; calls past the end fail.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            supports_tools: true,
            steps: Mutex::new(VecDeque::new()),
            repeat: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            call_log: None,
        }
    }

    /// Adapter that echoes every prompt.
    pub fn echo(id: impl Into<String>) -> Self {
        Self::new(id).repeat(ScriptStep::Echo)
    }

    /// Queue one step.
    pub fn then(self, step: ScriptStep) -> Self {
        self.steps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(step);
        self
    }

    /// Step used once the queued steps run out.
    pub fn repeat(mut self, step: ScriptStep) -> Self {
        self.repeat = Some(step);
        self
    }

    pub fn with_tools(mut self, supports_tools: bool) -> Self {
        self.supports_tools = supports_tools;
        self
    }

    pub fn with_call_log(mut self, log: CallLog) -> Self {
        self.call_log = Some(log);
        self
    }

    /// Number of calls received (both modes).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received, in call order.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn next_step(&self, request: &ProviderRequest) -> Result<ScriptStep> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        if let Some(log) = &self.call_log {
            log.lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(self.id.clone());
        }
        let queued = self
            .steps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        queued
            .or_else(|| self.repeat.clone())
            .ok_or_else(|| Error::runtime(format!("script for '{}' exhausted", self.id)))
    }

    fn echo_text(request: &ProviderRequest) -> String {
        request.last_user_text().unwrap_or_default().to_string()
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn supports_tools(&self) -> bool {
        self.supports_tools
    }

    async fn generate_once(&self, request: &ProviderRequest) -> Result<ProviderResponse> {
        match self.next_step(request)? {
            ScriptStep::Reply(resp) => Ok(resp),
            ScriptStep::Chunks(parts) => Ok(ProviderResponse::text(parts.concat())),
            ScriptStep::Fail { status, body } | ScriptStep::StreamThenFail { status, body, .. } => {
                Err(remote(status, &body))
            }
            ScriptStep::Timeout => Err(Error::Timeout { after_ms: 0 }),
            ScriptStep::Hang | ScriptStep::StreamThenHang(_) => futures::future::pending().await,
            ScriptStep::Echo => Ok(ProviderResponse::text(Self::echo_text(request))),
        }
    }

    async fn generate_streaming(&self, request: &ProviderRequest) -> Result<ChunkStream> {
        let texts = |parts: Vec<String>| {
            parts
                .into_iter()
                .map(|p| Ok::<_, Error>(StreamChunk::text(p)))
        };
        match self.next_step(request)? {
            ScriptStep::Reply(resp) => {
                let mut chunk = StreamChunk::text(resp.text);
                if !resp.sources.is_empty() || resp.finish_reason.is_some() {
                    chunk = chunk.with_metadata(ChunkMetadata {
                        sources: resp.sources,
                        reasoning: resp.reasoning,
                        finish_reason: resp.finish_reason,
                        ..Default::default()
                    });
                }
                Ok(Box::pin(stream::iter(vec![Ok::<_, Error>(chunk)])))
            }
            ScriptStep::Chunks(parts) => Ok(Box::pin(stream::iter(texts(parts)))),
            ScriptStep::Fail { status, body } => Err(remote(status, &body)),
            ScriptStep::Timeout => Err(Error::Timeout { after_ms: 0 }),
            ScriptStep::Hang => futures::future::pending().await,
            ScriptStep::StreamThenHang(parts) => {
                let head = stream::iter(texts(parts));
                Ok(Box::pin(futures::StreamExt::chain(head, stream::pending())))
            }
            ScriptStep::StreamThenFail {
                chunks,
                status,
                body,
            } => {
                let head = stream::iter(texts(chunks));
                let tail = stream::once(async move { Err(remote(status, &body)) });
                Ok(Box::pin(futures::StreamExt::chain(head, tail)))
            }
            ScriptStep::Echo => {
                let text = Self::echo_text(request);
                let parts: Vec<String> = text.split_inclusive(' ').map(str::to_string).collect();
                Ok(Box::pin(stream::iter(texts(parts))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::request::GenerationRequest;
    use futures::StreamExt;

    fn request(prompt: &str) -> ProviderRequest {
        ProviderRequest::from_generation(&GenerationRequest::new(prompt))
    }

    #[tokio::test]
    async fn replays_steps_in_order() {
        let adapter = ScriptedAdapter::new("m")
            .then(ScriptStep::rate_limited())
            .then(ScriptStep::text("ok"));
        assert!(matches!(
            adapter.generate_once(&request("q")).await,
            Err(Error::Remote { status: 429, .. })
        ));
        assert_eq!(adapter.generate_once(&request("q")).await.unwrap().text, "ok");
        assert!(adapter.generate_once(&request("q")).await.is_err());
        assert_eq!(adapter.calls(), 3);
    }

    #[tokio::test]
    async fn echo_streams_words() {
        let adapter = ScriptedAdapter::echo("m");
        let chunks: Vec<String> = adapter
            .generate_streaming(&request("hello big world"))
            .await
            .unwrap()
            .map(|c| c.unwrap().text)
            .collect()
            .await;
        assert_eq!(chunks, vec!["hello ", "big ", "world"]);
    }

    #[tokio::test]
    async fn stream_then_fail_yields_error_last() {
        let adapter = ScriptedAdapter::new("m").then(ScriptStep::StreamThenFail {
            chunks: vec!["a".into()],
            status: 500,
            body: "boom".into(),
        });
        let items: Vec<_> = adapter
            .generate_streaming(&request("q"))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }
}
