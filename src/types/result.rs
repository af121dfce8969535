use serde::{Deserialize, Serialize};

use crate::types::request::ParadigmContext;
use crate::types::tool::ToolCall;

/// A cited source (web citation, grounding chunk, annotation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl Source {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            snippet: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Appends `incoming` to `into`, skipping URLs already present.
pub(crate) fn merge_sources(into: &mut Vec<Source>, incoming: &[Source]) {
    for s in incoming {
        if !into.iter().any(|existing| existing.url == s.url) {
            into.push(s.clone());
        }
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Final result of a successful invocation. Produced once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub text: String,
    pub sources: Vec<Source>,
    /// Model rounds consumed by the tool loop (0 for single-shot and streaming).
    pub iteration_count: u32,
    pub reasoning: Option<String>,
    pub paradigm: Option<ParadigmContext>,
    /// Tool calls actually executed, in execution order.
    pub tool_calls: Vec<ToolCall>,
    /// Provider that produced the result.
    pub provider: String,
    /// The tool loop hit its iteration bound before the model produced a final answer.
    pub bound_exhausted: bool,
}
