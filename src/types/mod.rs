//! 类型系统模块：定义请求、结果、工具调用与流式事件的核心数据类型。
//!
//! # Types Module
//!
//! Strongly-typed values that flow through the orchestrator.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`GenerationRequest`] | Immutable request: prompt, effort, tools, paradigm context |
//! | [`GenerationResult`] | Final result of a successful invocation |
//! | [`Message`] | Conversation message fed to providers |
//! | [`ToolCall`] / [`ToolResult`] | Model-requested tool invocation and its outcome |
//! | [`StreamChunk`] / [`StreamEvent`] | Incremental streaming delivery |
//! | [`ProviderAttempt`] | One try against one provider (diagnostics only) |
//!
//! ## Example
//!
//! ```rust
//! use ai_research_runtime::types::{EffortLevel, GenerationRequest, ParadigmContext};
//!
//! let request = GenerationRequest::new("Summarize recent fusion research")
//!     .with_effort(EffortLevel::High)
//!     .with_paradigm(ParadigmContext::new("bernard").with_probability("bernard", 0.7))
//!     .with_max_iterations(3);
//!
//! assert_eq!(request.effort().max_output_tokens(), 8192);
//! assert_eq!(request.max_iterations(), Some(3));
//! ```

pub mod attempt;
pub mod events;
pub mod message;
pub mod request;
pub mod result;
pub mod tool;

pub use attempt::{AttemptLedger, AttemptOutcome, ProviderAttempt};
pub use events::{ChunkMetadata, StreamChunk, StreamEvent, StreamSummary};
pub use message::{Message, MessageRole};
pub use request::{EffortLevel, GenerationRequest, ParadigmContext};
pub use result::{GenerationResult, Source, Usage};
pub use tool::{ToolCall, ToolDefinition, ToolResult};
