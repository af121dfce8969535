//! Google Gemini generateContent driver.
//!
//! Gemini uses `contents` with role `user`/`model`, `parts` instead of content strings,
//! `systemInstruction` for the system prompt and `generationConfig` for token limits.
//! The model is part of the URL path and the key travels as the `key` query parameter.
//! Function calls carry no id, so one is generated per call; results are keyed by name.
//! Streaming (`alt=sse`) sends a full response object per frame.

use serde_json::{json, Value};
use uuid::Uuid;

use crate::provider::{ProviderKind, ProviderRequest, ProviderResponse};
use crate::transport::{AuthStyle, SseFrame, WireRequest};
use crate::types::events::{ChunkMetadata, StreamChunk};
use crate::types::message::{Message, MessageRole};
use crate::types::result::Source;
use crate::types::tool::ToolCall;
use crate::{Error, Result};

use super::{frame_json, malformed, stream_error, usage_from, Driver};

#[derive(Debug, Default, Clone, Copy)]
pub struct GeminiDriver;

/// Text, thought text and function calls pulled out of one candidate.
#[derive(Default)]
struct CandidateParts {
    text: String,
    thoughts: String,
    calls: Vec<ToolCall>,
}

impl GeminiDriver {
    fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<Value>) {
        let mut system: Vec<&str> = Vec::new();
        let mut contents: Vec<Value> = Vec::new();

        for m in messages {
            match m.role {
                MessageRole::System => system.push(&m.content),
                MessageRole::User => contents.push(json!({
                    "role": "user",
                    "parts": [{ "text": m.content }],
                })),
                MessageRole::Assistant => {
                    let mut parts = Vec::new();
                    if !m.content.is_empty() {
                        parts.push(json!({ "text": m.content }));
                    }
                    for c in &m.tool_calls {
                        parts.push(json!({ "functionCall": { "name": c.name, "args": c.arguments } }));
                    }
                    contents.push(json!({ "role": "model", "parts": parts }));
                }
                MessageRole::Tool => {
                    let response: Value = serde_json::from_str(&m.content)
                        .unwrap_or_else(|_| Value::String(m.content.clone()));
                    let part = json!({
                        "functionResponse": {
                            "name": m.tool_name.clone().unwrap_or_default(),
                            "response": { "content": response },
                        }
                    });
                    let merge = contents.last().map_or(false, |last| {
                        last["role"] == "user" && last["parts"][0].get("functionResponse").is_some()
                    });
                    match contents.last_mut().and_then(|c| c["parts"].as_array_mut()) {
                        Some(parts) if merge => parts.push(part),
                        _ => contents.push(json!({ "role": "user", "parts": [part] })),
                    }
                }
            }
        }

        let system = if system.is_empty() {
            None
        } else {
            Some(system.join("\n\n"))
        };
        (system, contents)
    }

    fn candidate_parts(candidate: &Value) -> CandidateParts {
        let mut out = CandidateParts::default();
        let parts = candidate
            .pointer("/content/parts")
            .and_then(Value::as_array)
            .into_iter()
            .flatten();
        for part in parts {
            if let Some(call) = part.get("functionCall") {
                let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
                let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
                let id = format!("call_{}", Uuid::new_v4().simple());
                out.calls.push(ToolCall::new(id, name, args));
            } else if let Some(text) = part.get("text").and_then(Value::as_str) {
                if part.get("thought").and_then(Value::as_bool).unwrap_or(false) {
                    out.thoughts.push_str(text);
                } else {
                    out.text.push_str(text);
                }
            }
        }
        out
    }

    fn grounding(candidate: &Value) -> Vec<Source> {
        candidate
            .pointer("/groundingMetadata/groundingChunks")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|chunk| {
                let web = chunk.get("web")?;
                let uri = web.get("uri")?.as_str()?;
                let mut source = Source::new(uri);
                if let Some(title) = web.get("title").and_then(Value::as_str) {
                    source = source.with_title(title);
                }
                Some(source)
            })
            .collect()
    }

    fn normalize_finish(reason: &str) -> String {
        match reason {
            "STOP" => "stop".to_string(),
            "MAX_TOKENS" => "length".to_string(),
            "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" => {
                "content_filter".to_string()
            }
            other => other.to_ascii_lowercase(),
        }
    }
}

impl Driver for GeminiDriver {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn default_base_url(&self) -> &'static str {
        "https://generativelanguage.googleapis.com"
    }

    fn build_request(
        &self,
        request: &ProviderRequest,
        model: &str,
        stream: bool,
    ) -> Result<WireRequest> {
        let (system, contents) = Self::convert_messages(&request.messages);

        let mut generation_config = json!({ "maxOutputTokens": request.effort.max_output_tokens() });
        if let Some(budget) = request.effort.reasoning_budget() {
            generation_config["thinkingConfig"] =
                json!({ "thinkingBudget": budget, "includeThoughts": true });
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": generation_config,
        });
        if let Some(sys) = system {
            body["systemInstruction"] = json!({ "parts": [{ "text": sys }] });
        }
        if !request.tools.is_empty() {
            let declarations: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description.clone().unwrap_or_default(),
                        "parameters": t.parameters_or_default(),
                    })
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }

        let (method, query) = if stream {
            ("streamGenerateContent", vec![("alt".to_string(), "sse".to_string())])
        } else {
            ("generateContent", Vec::new())
        };

        Ok(WireRequest {
            path: format!("/v1beta/models/{}:{}", model, method),
            query,
            headers: Vec::new(),
            body,
            stream,
            auth: AuthStyle::Query("key"),
        })
    }

    fn parse_response(&self, body: &Value) -> Result<ProviderResponse> {
        let Some(candidate) = body.pointer("/candidates/0") else {
            if let Some(reason) = body
                .pointer("/promptFeedback/blockReason")
                .and_then(Value::as_str)
            {
                return Err(Error::runtime(format!("prompt blocked: {}", reason)));
            }
            return Err(malformed(self.kind(), "no candidates"));
        };

        let parts = Self::candidate_parts(candidate);
        let usage = body.get("usageMetadata").and_then(|u| {
            usage_from(
                u.get("promptTokenCount").and_then(Value::as_u64),
                u.get("candidatesTokenCount").and_then(Value::as_u64),
            )
        });

        Ok(ProviderResponse {
            text: parts.text,
            tool_calls: parts.calls,
            sources: Self::grounding(candidate),
            reasoning: Some(parts.thoughts).filter(|t| !t.is_empty()),
            usage,
            finish_reason: candidate
                .get("finishReason")
                .and_then(Value::as_str)
                .map(Self::normalize_finish),
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
        let Some(candidate) = v.pointer("/candidates/0") else {
            return Ok(None);
        };

        let parts = Self::candidate_parts(candidate);
        let meta = ChunkMetadata {
            sources: Self::grounding(candidate),
            reasoning: Some(parts.thoughts).filter(|t| !t.is_empty()),
            finish_reason: candidate
                .get("finishReason")
                .and_then(Value::as_str)
                .map(Self::normalize_finish),
            ..Default::default()
        };
        let has_meta =
            !meta.sources.is_empty() || meta.reasoning.is_some() || meta.finish_reason.is_some();

        match (parts.text.is_empty(), has_meta) {
            (true, false) => Ok(None),
            (_, true) => Ok(Some(StreamChunk::text(parts.text).with_metadata(meta))),
            (false, false) => Ok(Some(StreamChunk::text(parts.text))),
        }
    }
}
