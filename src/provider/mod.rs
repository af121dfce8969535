//! Provider 适配层：通过 trait 统一多个 LLM 后端的调用方式
//!
//! Provider adapter abstraction.
//!
//! Every backend is reached through [`ProviderAdapter`], a capability trait with three
//! operations: [`generate_once`](ProviderAdapter::generate_once),
//! [`generate_streaming`](ProviderAdapter::generate_streaming) and
//! [`supports_tools`](ProviderAdapter::supports_tools). The concrete variants form a
//! closed set selected by [`ProviderKind`]:
//!
//! | Kind | Adapter | Wire driver |
//! |------|---------|-------------|
//! | `openai` | [`HttpAdapter`] | [`OpenAiDriver`](crate::drivers::OpenAiDriver) |
//! | `anthropic` | [`HttpAdapter`] | [`AnthropicDriver`](crate::drivers::AnthropicDriver) |
//! | `gemini` | [`HttpAdapter`] | [`GeminiDriver`](crate::drivers::GeminiDriver) |
//! | `mock` | [`ScriptedAdapter`] | none |

pub mod http;
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::ProviderConfig;
use crate::types::events::StreamChunk;
use crate::types::message::Message;
use crate::types::request::{EffortLevel, GenerationRequest, ParadigmContext};
use crate::types::result::{Source, Usage};
use crate::types::tool::{ToolCall, ToolDefinition};
use crate::{BoxStream, Result};

pub use http::HttpAdapter;
pub use mock::{CallLog, ScriptStep, ScriptedAdapter};

/// Ordered, single-pass stream of text fragments from one provider.
pub type ChunkStream = BoxStream<'static, StreamChunk>;

/// Closed set of backend variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    /// OpenAI-compatible chat completions (OpenAI, OpenRouter, DeepSeek, local servers).
    #[serde(rename = "openai", alias = "openai_compatible")]
    OpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "gemini")]
    Gemini,
    /// Deterministic in-process adapter.
    #[serde(rename = "mock")]
    Mock,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Mock => "mock",
        })
    }
}

/// Provider-agnostic request for a single model call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    /// Model override; `None` means the adapter's configured default.
    pub model: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub effort: EffortLevel,
    /// Opaque annotation; adapters may log it, never interpret it.
    pub paradigm: Option<ParadigmContext>,
}

impl ProviderRequest {
    /// Initial conversation for a generation request (system prompt + user prompt).
    pub fn from_generation(request: &GenerationRequest) -> Self {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system_prompt() {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(request.prompt()));
        Self {
            model: None,
            messages,
            tools: Vec::new(),
            effort: request.effort(),
            paradigm: request.paradigm().cloned(),
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    /// Text of the most recent user message.
    pub fn last_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::types::message::MessageRole::User)
            .map(|m| m.content.as_str())
    }
}

/// Unified response of a single non-streaming call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub sources: Vec<Source>,
    pub reasoning: Option<String>,
    pub usage: Option<Usage>,
    pub finish_reason: Option<String>,
}

impl ProviderResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish_reason: Some("stop".into()),
            ..Default::default()
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.finish_reason = Some("tool_calls".into());
        self.tool_calls = calls;
        self
    }

    pub fn with_sources(mut self, sources: Vec<Source>) -> Self {
        self.sources = sources;
        self
    }
}

/// Capability trait implemented by every backend variant.
#[async_trait]
pub trait ProviderAdapter: Send + Sync + fmt::Debug {
    /// Identifier used in the priority list, logs and attempt ledgers.
    fn provider_id(&self) -> &str;

    /// Whether the backend accepts a tool catalog and returns tool calls.
    fn supports_tools(&self) -> bool;

    /// One complete, non-streaming generation.
    async fn generate_once(&self, request: &ProviderRequest) -> Result<ProviderResponse>;

    /// Open an incremental stream. Errors before the stream is established are returned
    /// directly; errors afterwards arrive as stream items.
    async fn generate_streaming(&self, request: &ProviderRequest) -> Result<ChunkStream>;
}

/// Build the adapter variant named by `config.kind`.
pub fn create_adapter(config: &ProviderConfig) -> Result<Arc<dyn ProviderAdapter>> {
    match config.kind {
        ProviderKind::Mock => Ok(Arc::new(
            ScriptedAdapter::echo(&config.id).with_tools(config.supports_tools.unwrap_or(true)),
        )),
        kind => {
            let driver = crate::drivers::create_driver(kind)?;
            Ok(Arc::new(HttpAdapter::from_config(config, driver)?))
        }
    }
}
