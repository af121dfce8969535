//! # ai-research-runtime
//!
//! 研究助手的生成编排核心：多厂商降级链、流式分片投递、有界工具调用循环与错误分类。
//!
//! Generation orchestration core for a research assistant. It drives text and tool-call
//! generation against several interchangeable LLM backends, classifies failures, and
//! recovers by bounded retry or by falling back along an ordered provider list.
//!
//! ## Core Ideas
//!
//! - **Typed failures**: every raw failure becomes an [`ErrorClassification`] whose kind
//!   decides retry, fallback or surfacing
//! - **Ordered fallback**: providers are tried strictly in configured order
//! - **Bounded tool loop**: model ↔ tool rounds stop at a configurable maximum
//! - **Ordered streaming**: chunks arrive in order, followed by exactly one terminal event
//! - **No singletons**: orchestrator, registry and history are constructed and passed in
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_research_runtime::{EffortLevel, ResearchClient};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> ai_research_runtime::Result<()> {
//!     let client = ResearchClient::from_config_path("research.yaml")?;
//!     let out = client
//!         .generate_text(
//!             "Summarize recent fusion research",
//!             None,
//!             EffortLevel::Medium,
//!             None::<fn(&ai_research_runtime::progress::ProgressUpdate)>,
//!             &CancellationToken::new(),
//!         )
//!         .await?;
//!     println!("{}", out.text);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | Caller-facing facade and builder |
//! | [`orchestrator`] | Fallback chain, retry, tool loop, streaming sessions |
//! | [`classifier`] | Raw failure → typed classification, backoff suggestions |
//! | [`provider`] | Adapter trait, HTTP adapter, scripted mock adapter |
//! | [`drivers`] | Wire formats for OpenAI-compatible, Anthropic and Gemini APIs |
//! | [`transport`] | HTTP transport and SSE decoding |
//! | [`tools`] | Tool registry, execution service and execution history |
//! | [`progress`] | Progress sinks |
//! | [`config`] | YAML / JSON configuration |
//! | [`types`] | Requests, results, messages, stream events |

pub mod classifier;
pub mod client;
pub mod config;
pub mod drivers;
pub mod error_code;
pub mod orchestrator;
pub mod progress;
pub mod provider;
pub mod tools;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use classifier::{BackoffConfig, ErrorClassification, ErrorClassifier};
pub use client::{ResearchClient, ResearchClientBuilder, TextGeneration, ToolGeneration};
pub use config::{OrchestratorConfig, ProviderConfig};
pub use error_code::ErrorKind;
pub use orchestrator::{
    GenerationMode, GenerationOrchestrator, ProviderSlot, ResponseStream, StreamingSession,
    ToolCallLoop,
};
pub use provider::{ProviderAdapter, ProviderKind};
pub use tools::{ExecutionHistory, ExecutionHistoryEntry, FnTool, ToolExecutor, ToolRegistry};
pub use types::{
    EffortLevel, GenerationRequest, GenerationResult, Message, MessageRole, ParadigmContext,
    Source, StreamChunk, StreamEvent, StreamSummary, ToolCall, ToolDefinition, ToolResult,
};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A pinned, boxed stream of fallible items.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
