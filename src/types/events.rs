//! Streaming chunk and event types

use serde::{Deserialize, Serialize};

use crate::classifier::ErrorClassification;
use crate::types::request::ParadigmContext;
use crate::types::result::{merge_sources, Source};

/// Optional metadata attached to a chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paradigm: Option<ParadigmContext>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Source>,
    /// Reasoning ("thinking") delta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// One text fragment from a provider stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ChunkMetadata>,
}

impl StreamChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: ChunkMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn reasoning(delta: impl Into<String>) -> Self {
        Self::text(String::new()).with_metadata(ChunkMetadata {
            reasoning: Some(delta.into()),
            ..Default::default()
        })
    }

    pub fn finish(reason: impl Into<String>) -> Self {
        Self::text(String::new()).with_metadata(ChunkMetadata {
            finish_reason: Some(reason.into()),
            ..Default::default()
        })
    }
}

/// Terminal summary: the full concatenation plus aggregate metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamSummary {
    pub text: String,
    pub sources: Vec<Source>,
    pub reasoning: Option<String>,
    pub finish_reason: Option<String>,
    pub paradigm: Option<ParadigmContext>,
    pub provider: String,
    pub chunk_count: usize,
}

impl StreamSummary {
    pub(crate) fn new(provider: impl Into<String>, paradigm: Option<ParadigmContext>) -> Self {
        Self {
            provider: provider.into(),
            paradigm,
            ..Default::default()
        }
    }

    /// Folds one chunk into the aggregate. Order of calls is the emission order.
    pub(crate) fn absorb(&mut self, chunk: &StreamChunk) {
        self.chunk_count += 1;
        self.text.push_str(&chunk.text);
        if let Some(meta) = &chunk.metadata {
            merge_sources(&mut self.sources, &meta.sources);
            if let Some(r) = &meta.reasoning {
                self.reasoning.get_or_insert_with(String::new).push_str(r);
            }
            if meta.finish_reason.is_some() {
                self.finish_reason = meta.finish_reason.clone();
            }
            if meta.paradigm.is_some() {
                self.paradigm = meta.paradigm.clone();
            }
        }
    }
}

/// Event delivered by a [`ResponseStream`](crate::orchestrator::streaming::ResponseStream).
///
/// Zero or more `Chunk`s are followed by exactly one of `Complete` or `Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Chunk(StreamChunk),
    Complete(StreamSummary),
    Error(ErrorClassification),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Chunk(_))
    }
}
