//! Anthropic Messages API 驱动
//!
//! Anthropic Messages API driver. Differences from the OpenAI shape:
//! - system prompts are a top-level `system` field;
//! - content is a list of typed blocks (`text`, `tool_use`, `tool_result`, `thinking`);
//! - tool results travel as `user` messages, and consecutive results share one message;
//! - `max_tokens` is mandatory;
//! - streams are typed events (`content_block_delta`, `message_delta`, `error`).

use serde_json::{json, Value};

use crate::provider::{ProviderKind, ProviderRequest, ProviderResponse};
use crate::transport::{AuthStyle, SseFrame, WireRequest};
use crate::types::events::{ChunkMetadata, StreamChunk};
use crate::types::message::{Message, MessageRole};
use crate::types::result::{merge_sources, Source};
use crate::types::tool::ToolCall;
use crate::Result;

use super::{frame_json, malformed, stream_error, usage_from, Driver};

const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Default, Clone, Copy)]
pub struct AnthropicDriver;

impl AnthropicDriver {
    /// Splits out the system prompt and converts the rest to Anthropic turns.
    fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<Value>) {
        let mut system: Vec<&str> = Vec::new();
        let mut turns: Vec<Value> = Vec::new();

        for m in messages {
            match m.role {
                MessageRole::System => system.push(&m.content),
                MessageRole::User => turns.push(json!({
                    "role": "user",
                    "content": [{ "type": "text", "text": m.content }],
                })),
                MessageRole::Assistant => {
                    let mut blocks = Vec::new();
                    if !m.content.is_empty() {
                        blocks.push(json!({ "type": "text", "text": m.content }));
                    }
                    for c in &m.tool_calls {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": c.id,
                            "name": c.name,
                            "input": c.arguments,
                        }));
                    }
                    turns.push(json!({ "role": "assistant", "content": blocks }));
                }
                MessageRole::Tool => {
                    let block = json!({
                        "type": "tool_result",
                        "tool_use_id": m.tool_call_id.clone().unwrap_or_default(),
                        "content": m.content,
                        "is_error": m.is_error,
                    });
                    let merge = turns.last().map_or(false, |last| {
                        last["role"] == "user"
                            && last["content"][0]["type"] == "tool_result"
                    });
                    match turns.last_mut().and_then(|t| t["content"].as_array_mut()) {
                        Some(blocks) if merge => blocks.push(block),
                        _ => turns.push(json!({ "role": "user", "content": [block] })),
                    }
                }
            }
        }

        let system = if system.is_empty() {
            None
        } else {
            Some(system.join("\n\n"))
        };
        (system, turns)
    }

    fn citations(block: &Value) -> Vec<Source> {
        block
            .get("citations")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Self::citation)
            .collect()
    }

    fn citation(c: &Value) -> Option<Source> {
        let url = c.get("url")?.as_str()?;
        let mut source = Source::new(url);
        if let Some(title) = c.get("title").and_then(Value::as_str) {
            source = source.with_title(title);
        }
        source.snippet = c.get("cited_text").and_then(Value::as_str).map(str::to_string);
        Some(source)
    }

    fn normalize_stop(reason: &str) -> String {
        match reason {
            "end_turn" | "stop_sequence" => "stop".to_string(),
            "max_tokens" => "length".to_string(),
            "tool_use" => "tool_calls".to_string(),
            other => other.to_string(),
        }
    }
}

impl Driver for AnthropicDriver {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn default_base_url(&self) -> &'static str {
        "https://api.anthropic.com"
    }

    fn build_request(
        &self,
        request: &ProviderRequest,
        model: &str,
        stream: bool,
    ) -> Result<WireRequest> {
        let (system, messages) = Self::convert_messages(&request.messages);

        let mut body = json!({
            "model": model,
            "messages": messages,
            "max_tokens": request.effort.max_output_tokens(),
            "stream": stream,
        });
        if let Some(sys) = system {
            body["system"] = Value::String(sys);
        }
        // budget_tokens must stay below max_tokens.
        if let Some(budget) = request.effort.reasoning_budget() {
            body["thinking"] = json!({ "type": "enabled", "budget_tokens": budget });
        }
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description.clone().unwrap_or_default(),
                        "input_schema": t.parameters_or_default(),
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }

        Ok(WireRequest {
            path: "/v1/messages".into(),
            query: Vec::new(),
            headers: vec![("anthropic-version".into(), API_VERSION.into())],
            body,
            stream,
            auth: AuthStyle::Header("x-api-key"),
        })
    }

    fn parse_response(&self, body: &Value) -> Result<ProviderResponse> {
        let blocks = body
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| malformed(self.kind(), "no content blocks"))?;

        let mut resp = ProviderResponse::default();
        for block in blocks {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    resp.text
                        .push_str(block.get("text").and_then(Value::as_str).unwrap_or_default());
                    merge_sources(&mut resp.sources, &Self::citations(block));
                }
                Some("thinking") => {
                    if let Some(t) = block.get("thinking").and_then(Value::as_str) {
                        resp.reasoning.get_or_insert_with(String::new).push_str(t);
                    }
                }
                Some("tool_use") => {
                    let id = block.get("id").and_then(Value::as_str).unwrap_or_default();
                    let name = block.get("name").and_then(Value::as_str).unwrap_or_default();
                    let input = block.get("input").cloned().unwrap_or_else(|| json!({}));
                    resp.tool_calls.push(ToolCall::new(id, name, input));
                }
                _ => {}
            }
        }

        resp.finish_reason = body
            .get("stop_reason")
            .and_then(Value::as_str)
            .map(Self::normalize_stop);
        resp.usage = body.get("usage").and_then(|u| {
            usage_from(
                u.get("input_tokens").and_then(Value::as_u64),
                u.get("output_tokens").and_then(Value::as_u64),
            )
        });
        Ok(resp)
    }

    fn parse_stream_event(&self, frame: &SseFrame) -> Result<Option<StreamChunk>> {
        if frame.data.trim().is_empty() {
            return Ok(None);
        }
        let v = frame_json(self.kind(), frame)?;
        let event_type = v
            .get("type")
            .and_then(Value::as_str)
            .or(frame.event.as_deref())
            .unwrap_or("");

        match event_type {
            "content_block_delta" => {
                let delta = v.get("delta").unwrap_or(&Value::Null);
                match delta.get("type").and_then(Value::as_str) {
                    Some("text_delta") => Ok(delta
                        .get("text")
                        .and_then(Value::as_str)
                        .filter(|t| !t.is_empty())
                        .map(StreamChunk::text)),
                    Some("thinking_delta") => Ok(delta
                        .get("thinking")
                        .and_then(Value::as_str)
                        .map(StreamChunk::reasoning)),
                    Some("citations_delta") => Ok(delta
                        .get("citation")
                        .and_then(Self::citation)
                        .map(|s| {
                            StreamChunk::text(String::new()).with_metadata(ChunkMetadata {
                                sources: vec![s],
                                ..Default::default()
                            })
                        })),
                    _ => Ok(None),
                }
            }
            "message_delta" => Ok(v
                .pointer("/delta/stop_reason")
                .and_then(Value::as_str)
                .map(|r| StreamChunk::finish(Self::normalize_stop(r)))),
            "error" => {
                let error = v.get("error").cloned().unwrap_or(Value::Null);
                let status = match error.get("type").and_then(Value::as_str) {
                    Some("overloaded_error") => 529,
                    Some("rate_limit_error") => 429,
                    _ => 500,
                };
                Err(stream_error(status, &error))
            }
            _ => Ok(None),
        }
    }
}
