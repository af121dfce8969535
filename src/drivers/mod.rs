//! Provider 驱动层：负责各厂商 API 的请求构造与响应解析
//!
//! Wire drivers for the HTTP provider variants.
//!
//! A driver is a pure, synchronous translation layer: it turns a
//! [`ProviderRequest`] into a [`WireRequest`], and a provider JSON body (or one SSE
//! frame) back into the unified [`ProviderResponse`] / [`StreamChunk`]. Networking,
//! retries and timeouts live elsewhere, so every driver is testable without I/O.

pub mod anthropic;
pub mod gemini;
pub mod openai;

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::error::ErrorContext;
use crate::provider::{ProviderKind, ProviderRequest, ProviderResponse};
use crate::transport::{SseFrame, WireRequest};
use crate::types::events::StreamChunk;
use crate::types::result::Usage;
use crate::{Error, Result};

pub use anthropic::AnthropicDriver;
pub use gemini::GeminiDriver;
pub use openai::OpenAiDriver;

/// Request/response translation for one provider API style.
pub trait Driver: Send + Sync + fmt::Debug {
    fn kind(&self) -> ProviderKind;

    /// Base URL used when the provider config does not set one.
    fn default_base_url(&self) -> &'static str;

    fn build_request(
        &self,
        request: &ProviderRequest,
        model: &str,
        stream: bool,
    ) -> Result<WireRequest>;

    fn parse_response(&self, body: &Value) -> Result<ProviderResponse>;

    /// Translate one SSE frame. `Ok(None)` means the frame carries nothing for the caller
    /// (pings, block starts, usage-only frames).
    fn parse_stream_event(&self, frame: &SseFrame) -> Result<Option<StreamChunk>>;
}

/// Factory for the HTTP driver of a provider kind.
pub fn create_driver(kind: ProviderKind) -> Result<Arc<dyn Driver>> {
    match kind {
        ProviderKind::OpenAi => Ok(Arc::new(OpenAiDriver)),
        ProviderKind::Anthropic => Ok(Arc::new(AnthropicDriver)),
        ProviderKind::Gemini => Ok(Arc::new(GeminiDriver)),
        ProviderKind::Mock => Err(Error::configuration_with_context(
            "mock providers have no wire driver",
            ErrorContext::new().with_field_path("kind"),
        )),
    }
}

/// Parse an SSE frame payload as JSON.
pub(crate) fn frame_json(kind: ProviderKind, frame: &SseFrame) -> Result<Value> {
    serde_json::from_str(&frame.data).map_err(|e| {
        Error::runtime_with_context(
            format!("malformed stream frame: {}", e),
            ErrorContext::new().with_source(kind.to_string()),
        )
    })
}

/// Error for a response body that lacks the fields a driver needs.
pub(crate) fn malformed(kind: ProviderKind, what: &str) -> Error {
    Error::runtime_with_context(
        format!("malformed response: {}", what),
        ErrorContext::new().with_source(kind.to_string()),
    )
}

/// An error object delivered inside a stream, surfaced like an HTTP failure so the
/// classifier sees the same signals.
pub(crate) fn stream_error(status: u16, error: &Value) -> Error {
    let provider_code = ["code", "type", "status"]
        .iter()
        .find_map(|k| error.get(*k).and_then(|v| v.as_str()))
        .map(str::to_string);
    Error::Remote {
        status,
        message: serde_json::json!({ "error": error }).to_string(),
        provider_code,
        retry_after_ms: None,
    }
}

pub(crate) fn usage_from(prompt: Option<u64>, completion: Option<u64>) -> Option<Usage> {
    if prompt.is_none() && completion.is_none() {
        return None;
    }
    let prompt_tokens = prompt.unwrap_or(0);
    let completion_tokens = completion.unwrap_or(0);
    Some(Usage {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens + completion_tokens,
    })
}
