use serde_json::Value;
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::history::{ExecutionHistory, ExecutionHistoryEntry};
use super::registry::{RegisteredTool, ToolRegistry};
use crate::classifier::ErrorClassification;
use crate::types::tool::{ToolCall, ToolResult};

/// Runs tool calls against a registry and records each one in the history.
///
/// Failures never escape as errors: unknown tools, schema violations, executor errors
/// and cancellation all come back as a failure [`ToolResult`]. Every call appends
/// exactly one history entry.
#[derive(Clone)]
pub struct FunctionExecutionService {
    registry: Arc<ToolRegistry>,
    history: ExecutionHistory,
}

impl FunctionExecutionService {
    pub fn new(registry: Arc<ToolRegistry>, history: ExecutionHistory) -> Self {
        Self { registry, history }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn history(&self) -> &ExecutionHistory {
        &self.history
    }

    pub async fn execute(
        &self,
        call: &ToolCall,
        invocation_id: &str,
        cancel: &CancellationToken,
    ) -> ToolResult {
        let started_at = SystemTime::now();
        let start = Instant::now();

        let failed = |msg: String| {
            let c = ErrorClassification::tool_failure(&call.name, msg);
            ToolResult::from_classification(&call.id, &c)
        };
        let result = match self.registry.get(&call.name) {
            None => failed(format!("unknown tool '{}'", call.name)),
            Some(tool) => match validate_arguments(tool, &call.arguments) {
                Err(msg) => failed(msg),
                Ok(()) => {
                    tokio::select! {
                        biased;
                        outcome = tool.executor.execute(call.arguments.clone()) => match outcome {
                            Ok(value) => ToolResult::success(&call.id, value),
                            Err(e) => failed(e.to_string()),
                        },
                        _ = cancel.cancelled() => ToolResult::from_classification(
                            &call.id,
                            &ErrorClassification::cancelled(),
                        ),
                    }
                }
            },
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        if result.is_error {
            warn!(
                tool = call.name.as_str(),
                tool_call_id = call.id.as_str(),
                invocation_id,
                elapsed_ms,
                error_kind = result.error_kind.map(|k| k.name()),
                "tool execution failed"
            );
        } else {
            info!(
                tool = call.name.as_str(),
                tool_call_id = call.id.as_str(),
                invocation_id,
                elapsed_ms,
                "tool executed"
            );
        }

        self.history.append(ExecutionHistoryEntry {
            invocation_id: invocation_id.to_string(),
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            arguments: call.arguments.clone(),
            result: result.clone(),
            started_at,
            finished_at: SystemTime::now(),
            success: !result.is_error,
            error_kind: result.error_kind,
        });
        result
    }
}

fn validate_arguments(tool: &RegisteredTool, arguments: &Value) -> Result<(), String> {
    if let Value::String(raw) = arguments {
        return Err(format!("arguments are not valid JSON: {}", raw));
    }
    let Some(schema) = &tool.schema else {
        return Ok(());
    };
    if let Err(errors) = schema.validate(arguments) {
        let msgs: Vec<String> = errors
            .take(3)
            .map(|err| format!("{} at {}", err, err.instance_path))
            .collect();
        return Err(format!(
            "arguments failed schema validation: {}",
            msgs.join("; ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_code::ErrorKind;
    use crate::tools::FnTool;
    use crate::types::tool::ToolDefinition;
    use serde_json::json;

    fn service() -> FunctionExecutionService {
        let mut registry = ToolRegistry::new();
        registry
            .register(
                ToolDefinition::new("add").with_parameters(json!({
                    "type": "object",
                    "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                    "required": ["a", "b"]
                })),
                Arc::new(FnTool::new(|args: Value| async move {
                    let a = args["a"].as_f64().unwrap_or_default();
                    let b = args["b"].as_f64().unwrap_or_default();
                    Ok::<_, crate::Error>(json!(a + b))
                })),
            )
            .unwrap();
        registry
            .register(
                ToolDefinition::new("broken"),
                Arc::new(FnTool::new(|_: Value| async {
                    Err::<Value, _>(crate::Error::runtime("disk on fire"))
                })),
            )
            .unwrap();
        FunctionExecutionService::new(Arc::new(registry), ExecutionHistory::unbounded())
    }

    #[tokio::test]
    async fn executes_and_records() {
        let svc = service();
        let cancel = CancellationToken::new();
        let result = svc
            .execute(&ToolCall::new("c1", "add", json!({"a": 1, "b": 2})), "inv", &cancel)
            .await;
        assert!(!result.is_error);
        assert_eq!(result.content, json!(3.0));
        let history = svc.history().snapshot();
        assert_eq!(history.len(), 1);
        assert!(history[0].success);
        assert_eq!(history[0].tool_name, "add");
    }

    #[tokio::test]
    async fn failures_become_results() {
        let svc = service();
        let cancel = CancellationToken::new();
        let calls = [
            ToolCall::new("c1", "missing", json!({})),
            ToolCall::new("c2", "add", json!({"a": "one"})),
            ToolCall::new("c3", "broken", json!({})),
            ToolCall::new("c4", "add", json!("{not json")),
        ];
        for call in &calls {
            let result = svc.execute(call, "inv", &cancel).await;
            assert!(result.is_error, "{} should fail", call.id);
            assert!(result.content["error"].is_string());
        }
        let history = svc.history().snapshot();
        assert_eq!(history.len(), 4);
        assert!(history.iter().all(|e| !e.success));
        assert!(history
            .iter()
            .all(|e| e.error_kind == Some(ErrorKind::ToolExecutionError)));
        assert!(history[0].result.content_text().contains("unknown tool 'missing'"));
        assert!(history[2].result.content_text().contains("disk on fire"));
    }
}
