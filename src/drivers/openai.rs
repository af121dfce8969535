//! OpenAI-compatible chat completions driver.
//!
//! Also covers OpenRouter, DeepSeek and local OpenAI-compatible servers. Tool call
//! arguments travel as JSON-encoded strings in both directions.

use serde_json::{json, Value};

use crate::provider::{ProviderKind, ProviderRequest, ProviderResponse};
use crate::transport::{AuthStyle, SseFrame, WireRequest};
use crate::types::events::{ChunkMetadata, StreamChunk};
use crate::types::message::{Message, MessageRole};
use crate::types::result::Source;
use crate::types::tool::ToolCall;
use crate::Result;

use super::{frame_json, malformed, stream_error, usage_from, Driver};

#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAiDriver;

impl OpenAiDriver {
    /// Reasoning models take `reasoning_effort` and `max_completion_tokens`.
    fn is_reasoning_model(model: &str) -> bool {
        let bare = model.rsplit('/').next().unwrap_or(model);
        bare.starts_with("gpt-5")
            || (bare.starts_with('o') && bare[1..].starts_with(|c: char| c.is_ascii_digit()))
    }

    fn wire_message(m: &Message) -> Value {
        match m.role {
            MessageRole::Tool => json!({
                "role": "tool",
                "tool_call_id": m.tool_call_id.clone().unwrap_or_default(),
                "content": m.content,
            }),
            MessageRole::Assistant if !m.tool_calls.is_empty() => {
                let calls: Vec<Value> = m
                    .tool_calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": { "name": c.name, "arguments": c.arguments.to_string() },
                        })
                    })
                    .collect();
                let content = if m.content.is_empty() {
                    Value::Null
                } else {
                    Value::String(m.content.clone())
                };
                json!({ "role": "assistant", "content": content, "tool_calls": calls })
            }
            role => json!({ "role": role, "content": m.content }),
        }
    }

    fn parse_tool_call(v: &Value) -> Option<ToolCall> {
        let id = v.get("id")?.as_str()?;
        let function = v.get("function")?;
        let name = function.get("name")?.as_str()?;
        let arguments = match function.get("arguments") {
            Some(Value::String(raw)) if raw.trim().is_empty() => json!({}),
            Some(Value::String(raw)) => {
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
            }
            Some(other) => other.clone(),
            None => json!({}),
        };
        Some(ToolCall::new(id, name, arguments))
    }

    fn annotations(v: Option<&Value>) -> Vec<Source> {
        v.and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|a| {
                let cite = a.get("url_citation")?;
                let url = cite.get("url")?.as_str()?;
                let mut source = Source::new(url);
                if let Some(title) = cite.get("title").and_then(Value::as_str) {
                    source = source.with_title(title);
                }
                Some(source)
            })
            .collect()
    }

    fn reasoning_of(v: &Value) -> Option<String> {
        v.get("reasoning_content")
            .or_else(|| v.get("reasoning"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

impl Driver for OpenAiDriver {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn default_base_url(&self) -> &'static str {
        "https://api.openai.com/v1"
    }

    fn build_request(
        &self,
        request: &ProviderRequest,
        model: &str,
        stream: bool,
    ) -> Result<WireRequest> {
        let messages: Vec<Value> = request.messages.iter().map(Self::wire_message).collect();
        let mut body = json!({
            "model": model,
            "messages": messages,
            "stream": stream,
        });

        let max_tokens = request.effort.max_output_tokens();
        if Self::is_reasoning_model(model) {
            body["max_completion_tokens"] = json!(max_tokens);
            body["reasoning_effort"] = json!(request.effort.as_str());
        } else {
            body["max_tokens"] = json!(max_tokens);
        }

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description.clone().unwrap_or_default(),
                            "parameters": t.parameters_or_default(),
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
            body["tool_choice"] = json!("auto");
        }

        Ok(WireRequest {
            path: "/chat/completions".into(),
            query: Vec::new(),
            headers: Vec::new(),
            body,
            stream,
            auth: AuthStyle::Bearer,
        })
    }

    fn parse_response(&self, body: &Value) -> Result<ProviderResponse> {
        let choice = body
            .pointer("/choices/0")
            .ok_or_else(|| malformed(self.kind(), "no choices"))?;
        let message = choice
            .get("message")
            .ok_or_else(|| malformed(self.kind(), "choice without message"))?;

        let tool_calls = message
            .get("tool_calls")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Self::parse_tool_call)
            .collect();

        let usage = body.get("usage").and_then(|u| {
            usage_from(
                u.get("prompt_tokens").and_then(Value::as_u64),
                u.get("completion_tokens").and_then(Value::as_u64),
            )
        });

        Ok(ProviderResponse {
            text: message
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            tool_calls,
            sources: Self::annotations(message.get("annotations")),
            reasoning: Self::reasoning_of(message),
            usage,
            finish_reason: choice
                .get("finish_reason")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    fn parse_stream_event(&self, frame: &SseFrame) -> Result<Option<StreamChunk>> {
        if frame.data.trim().is_empty() {
            return Ok(None);
        }
        let v = frame_json(self.kind(), frame)?;
        if let Some(error) = v.get("error") {
            let status = error
                .get("code")
                .and_then(Value::as_u64)
                .and_then(|c| u16::try_from(c).ok())
                .unwrap_or(500);
            return Err(stream_error(status, error));
        }

        let Some(choice) = v.pointer("/choices/0") else {
            return Ok(None);
        };
        let delta = choice.get("delta").unwrap_or(&Value::Null);
        let text = delta
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let meta = ChunkMetadata {
            sources: Self::annotations(delta.get("annotations")),
            reasoning: Self::reasoning_of(delta),
            finish_reason: choice
                .get("finish_reason")
                .and_then(Value::as_str)
                .map(str::to_string),
            ..Default::default()
        };

        let has_meta =
            !meta.sources.is_empty() || meta.reasoning.is_some() || meta.finish_reason.is_some();
        match (text.is_empty(), has_meta) {
            (true, false) => Ok(None),
            (_, true) => Ok(Some(StreamChunk::text(text).with_metadata(meta))),
            (false, false) => Ok(Some(StreamChunk::text(text))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::request::{EffortLevel, GenerationRequest};
    use crate::types::tool::{ToolDefinition, ToolResult};

    fn request(prompt: &str) -> ProviderRequest {
        ProviderRequest::from_generation(&GenerationRequest::new(prompt))
    }

    #[test]
    fn builds_chat_completion_body() {
        let req = request("Hello").with_tools(vec![ToolDefinition::new("search")
            .with_description("web search")]);
        let wire = OpenAiDriver.build_request(&req, "gpt-4o", true).unwrap();
        assert_eq!(wire.path, "/chat/completions");
        assert_eq!(wire.auth, AuthStyle::Bearer);
        assert_eq!(wire.body["model"], "gpt-4o");
        assert_eq!(wire.body["stream"], true);
        assert_eq!(wire.body["max_tokens"], 4096);
        assert_eq!(wire.body["messages"][0]["role"], "user");
        assert_eq!(wire.body["tools"][0]["function"]["name"], "search");
        assert_eq!(wire.body["tools"][0]["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn reasoning_models_get_effort() {
        let mut req = request("think");
        req.effort = EffortLevel::High;
        let wire = OpenAiDriver.build_request(&req, "o3-mini", false).unwrap();
        assert_eq!(wire.body["reasoning_effort"], "high");
        assert_eq!(wire.body["max_completion_tokens"], 8192);
        assert!(wire.body.get("max_tokens").is_none());

        assert!(OpenAiDriver::is_reasoning_model("openai/gpt-5-mini"));
        assert!(!OpenAiDriver::is_reasoning_model("gpt-4o"));
        assert!(!OpenAiDriver::is_reasoning_model("openchat"));
    }

    #[test]
    fn tool_turns_are_encoded() {
        let call = ToolCall::new("call_1", "search", json!({"q": "rust"}));
        let result = ToolResult::success("call_1", json!({"hits": 3}));
        let req = request("find").with_messages(vec![
            Message::user("find"),
            Message::assistant_with_tool_calls("", vec![call.clone()]),
            Message::tool_result(&call, &result),
        ]);
        let wire = OpenAiDriver.build_request(&req, "gpt-4o", false).unwrap();
        let msgs = &wire.body["messages"];
        assert!(msgs[1]["content"].is_null());
        assert_eq!(msgs[1]["tool_calls"][0]["function"]["arguments"], r#"{"q":"rust"}"#);
        assert_eq!(msgs[2]["role"], "tool");
        assert_eq!(msgs[2]["tool_call_id"], "call_1");
    }

    #[test]
    fn parses_tool_calls_and_citations() {
        let body = json!({
            "choices": [{
                "message": {
                    "content": "See sources",
                    "reasoning_content": "thought",
                    "annotations": [{"type": "url_citation", "url_citation": {"url": "https://a.example", "title": "A"}}],
                    "tool_calls": [{"id": "c1", "type": "function", "function": {"name": "search", "arguments": "{\"q\":\"x\"}"}}]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5}
        });
        let resp = OpenAiDriver.parse_response(&body).unwrap();
        assert_eq!(resp.text, "See sources");
        assert_eq!(resp.reasoning.as_deref(), Some("thought"));
        assert_eq!(resp.sources[0].url, "https://a.example");
        assert_eq!(resp.tool_calls[0].arguments, json!({"q": "x"}));
        assert_eq!(resp.usage.unwrap().total_tokens, 15);
        assert_eq!(resp.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn missing_choices_is_an_error() {
        assert!(OpenAiDriver.parse_response(&json!({"id": "x"})).is_err());
    }

    #[test]
    fn stream_frames() {
        let frame = |data: &str| SseFrame {
            event: None,
            data: data.to_string(),
        };
        let chunk = OpenAiDriver
            .parse_stream_event(&frame(r#"{"choices":[{"delta":{"content":"Hel"},"index":0}]}"#))
            .unwrap()
            .unwrap();
        assert_eq!(chunk.text, "Hel");
        assert!(chunk.metadata.is_none());

        let role_only = OpenAiDriver
            .parse_stream_event(&frame(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#))
            .unwrap();
        assert!(role_only.is_none());

        let end = OpenAiDriver
            .parse_stream_event(&frame(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#))
            .unwrap()
            .unwrap();
        assert_eq!(end.metadata.unwrap().finish_reason.as_deref(), Some("stop"));

        let err = OpenAiDriver
            .parse_stream_event(&frame(r#"{"error":{"message":"slow down","code":429}}"#))
            .unwrap_err();
        assert!(matches!(err, crate::Error::Remote { status: 429, .. }));
    }
}
