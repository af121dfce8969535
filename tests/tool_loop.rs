//! Bounded tool-calling loop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ai_research_runtime::provider::{ProviderResponse, ScriptStep, ScriptedAdapter};
use ai_research_runtime::types::Source;
use ai_research_runtime::{
    BackoffConfig, Error, ErrorKind, ExecutionHistory, FnTool, GenerationMode,
    GenerationOrchestrator, GenerationRequest, GenerationResult, MessageRole, ProviderSlot, ToolCall,
    ToolDefinition, ToolExecutor, ToolRegistry,
};
use ai_research_runtime::tools::FunctionExecutionService;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

fn search_tool() -> (ToolDefinition, Arc<dyn ToolExecutor>) {
    (
        ToolDefinition::new("search")
            .with_description("Web search")
            .with_parameters(json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            })),
        Arc::new(FnTool::new(|args: Value| async move {
            let query = args["query"].as_str().unwrap_or_default();
            Ok::<_, Error>(json!({ "results": [format!("hit for {query}")] }))
        })),
    )
}

fn orchestrator(
    adapters: Vec<Arc<ScriptedAdapter>>,
    registry: ToolRegistry,
    history: ExecutionHistory,
) -> GenerationOrchestrator {
    let slots = adapters.into_iter().map(|a| ProviderSlot::new(a)).collect();
    GenerationOrchestrator::new(
        slots,
        FunctionExecutionService::new(Arc::new(registry), history),
    )
    .with_backoff(BackoffConfig::immediate())
}

fn registry_with_search() -> ToolRegistry {
    let (def, exec) = search_tool();
    ToolRegistry::new().with_tool(def, exec).unwrap()
}

fn search_call(id: &str) -> ScriptStep {
    ScriptStep::tool_call(id, "search", json!({ "query": "fusion" }))
}

async fn run(orch: &GenerationOrchestrator, request: GenerationRequest) -> Result<GenerationResult, Error> {
    orch.run(&request, GenerationMode::ToolAgentic, &CancellationToken::new())
        .await
}

#[tokio::test]
async fn always_tool_model_exhausts_bound() {
    let model = Arc::new(ScriptedAdapter::new("m").repeat(search_call("c")));
    let history = ExecutionHistory::unbounded();
    let orch = orchestrator(vec![model.clone()], registry_with_search(), history.clone());

    let result = run(&orch, GenerationRequest::new("q").with_max_iterations(3))
        .await
        .unwrap();

    assert!(result.bound_exhausted);
    assert_eq!(result.iteration_count, 3);
    assert_eq!(model.calls(), 3);
    assert_eq!(result.tool_calls.len(), 3);
    assert_eq!(history.len(), 3);
}

#[tokio::test]
async fn default_bound_is_five_rounds() {
    let model = Arc::new(ScriptedAdapter::new("m").repeat(search_call("c")));
    let orch = orchestrator(
        vec![model.clone()],
        registry_with_search(),
        ExecutionHistory::unbounded(),
    );

    let result = run(&orch, GenerationRequest::new("q")).await.unwrap();
    assert_eq!(result.iteration_count, 5);
    assert!(result.bound_exhausted);
}

#[tokio::test]
async fn final_answer_after_tool_round() {
    let model = Arc::new(
        ScriptedAdapter::new("m")
            .then(search_call("call_1"))
            .then(ScriptStep::text("Fusion is close.")),
    );
    let history = ExecutionHistory::unbounded();
    let orch = orchestrator(vec![model.clone()], registry_with_search(), history.clone());

    let result = run(&orch, GenerationRequest::new("q")).await.unwrap();

    assert_eq!(result.text, "Fusion is close.");
    assert_eq!(result.iteration_count, 2);
    assert!(!result.bound_exhausted);

    // Second round saw the assistant tool call and the tool result, in order.
    let second = &model.requests()[1];
    let roles: Vec<MessageRole> = second.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![MessageRole::User, MessageRole::Assistant, MessageRole::Tool]
    );
    assert_eq!(second.tools.len(), 1);
    assert_eq!(second.tools[0].name, "search");

    let entries = history.snapshot();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].success);
    assert_eq!(entries[0].tool_call_id, "call_1");
}

#[tokio::test]
async fn tool_failure_is_fed_back_not_raised() {
    let model = Arc::new(
        ScriptedAdapter::new("m")
            .then(ScriptStep::tool_call("c1", "flaky", json!({})))
            .then(ScriptStep::text("recovered")),
    );
    let registry = ToolRegistry::new()
        .with_tool(
            ToolDefinition::new("flaky"),
            Arc::new(FnTool::new(|_: Value| async {
                Err::<Value, _>(Error::runtime("upstream search index unavailable"))
            })),
        )
        .unwrap();
    let history = ExecutionHistory::unbounded();
    let orch = orchestrator(vec![model.clone()], registry, history.clone());

    let result = run(&orch, GenerationRequest::new("q")).await.unwrap();
    assert_eq!(result.text, "recovered");

    let tool_msg = model.requests()[1].messages.last().cloned().unwrap();
    assert_eq!(tool_msg.role, MessageRole::Tool);
    assert!(tool_msg.content.contains("unavailable"));
    let entry = &history.snapshot()[0];
    assert!(!entry.success);
    assert_eq!(entry.error_kind, Some(ErrorKind::ToolExecutionError));
    assert_eq!(entry.result.error_kind, Some(ErrorKind::ToolExecutionError));
}

#[tokio::test]
async fn unknown_tool_and_bad_arguments_become_error_results() {
    let model = Arc::new(
        ScriptedAdapter::new("m")
            .then(ScriptStep::Reply(ProviderResponse::default().with_tool_calls(vec![
                ToolCall::new("c1", "does_not_exist", json!({})),
                ToolCall::new("c2", "search", json!({ "query": 42 })),
            ])))
            .then(ScriptStep::text("done")),
    );
    let history = ExecutionHistory::unbounded();
    let orch = orchestrator(vec![model], registry_with_search(), history.clone());

    let result = run(&orch, GenerationRequest::new("q")).await.unwrap();
    assert_eq!(result.text, "done");
    let entries = history.snapshot();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| !e.success));
    assert!(entries
        .iter()
        .all(|e| e.error_kind == Some(ErrorKind::ToolExecutionError)));
    assert_eq!(entries[0].tool_name, "does_not_exist");
    assert!(entries[0].result.content_text().contains("unknown tool"));
}

#[tokio::test]
async fn bound_exhausted_keeps_last_non_empty_text() {
    let model = Arc::new(
        ScriptedAdapter::new("m")
            .then(ScriptStep::Reply(
                ProviderResponse::text("Looking that up.").with_tool_calls(vec![ToolCall::new(
                    "c1",
                    "search",
                    json!({ "query": "a" }),
                )]),
            ))
            .then(search_call("c2")),
    );
    let orch = orchestrator(
        vec![model],
        registry_with_search(),
        ExecutionHistory::unbounded(),
    );

    let result = run(&orch, GenerationRequest::new("q").with_max_iterations(2))
        .await
        .unwrap();
    assert!(result.bound_exhausted);
    assert_eq!(result.text, "Looking that up.");
}

#[tokio::test]
async fn sources_aggregate_across_rounds() {
    let model = Arc::new(
        ScriptedAdapter::new("m")
            .then(ScriptStep::Reply(
                ProviderResponse::default()
                    .with_tool_calls(vec![ToolCall::new("c1", "search", json!({ "query": "a" }))])
                    .with_sources(vec![Source::new("https://a.example")]),
            ))
            .then(ScriptStep::Reply(
                ProviderResponse::text("answer").with_sources(vec![
                    Source::new("https://a.example"),
                    Source::new("https://b.example"),
                ]),
            )),
    );
    let orch = orchestrator(
        vec![model],
        registry_with_search(),
        ExecutionHistory::unbounded(),
    );

    let result = run(&orch, GenerationRequest::new("q")).await.unwrap();
    let urls: Vec<&str> = result.sources.iter().map(|s| s.url.as_str()).collect();
    assert_eq!(urls, vec!["https://a.example", "https://b.example"]);
}

#[tokio::test]
async fn cancel_mid_round_stops_further_tools() {
    let executed = Arc::new(AtomicUsize::new(0));
    let cancel = CancellationToken::new();

    let counter = executed.clone();
    let trigger = cancel.clone();
    let registry = ToolRegistry::new()
        .with_tool(
            ToolDefinition::new("slow"),
            Arc::new(FnTool::new(move |_: Value| {
                let counter = counter.clone();
                let trigger = trigger.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    trigger.cancel();
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok::<_, Error>(json!("done"))
                }
            })),
        )
        .unwrap();
    let model = Arc::new(ScriptedAdapter::new("m").then(ScriptStep::Reply(
        ProviderResponse::default().with_tool_calls(vec![
            ToolCall::new("c1", "slow", json!({})),
            ToolCall::new("c2", "slow", json!({})),
            ToolCall::new("c3", "slow", json!({})),
        ]),
    )));
    let history = ExecutionHistory::unbounded();
    let orch = orchestrator(vec![model.clone()], registry, history.clone());

    let err = orch
        .run(&GenerationRequest::new("q"), GenerationMode::ToolAgentic, &cancel)
        .await
        .unwrap_err();

    assert_eq!(err.classification().map(|c| c.kind), Some(ErrorKind::Cancelled));
    assert_eq!(executed.load(Ordering::SeqCst), 1);
    assert_eq!(history.len(), 1);
    assert_eq!(history.snapshot()[0].error_kind, Some(ErrorKind::Cancelled));
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn falls_back_before_any_tool_runs() {
    let primary = Arc::new(ScriptedAdapter::new("primary").then(ScriptStep::quota_exceeded()));
    let backup = Arc::new(
        ScriptedAdapter::new("backup")
            .then(search_call("c1"))
            .then(ScriptStep::text("ok")),
    );
    let orch = orchestrator(
        vec![primary, backup],
        registry_with_search(),
        ExecutionHistory::unbounded(),
    );

    let result = run(&orch, GenerationRequest::new("q")).await.unwrap();
    assert_eq!(result.provider, "backup");
}

#[tokio::test]
async fn no_fallback_after_a_tool_has_run() {
    let primary = Arc::new(
        ScriptedAdapter::new("primary")
            .then(search_call("c1"))
            .then(ScriptStep::server_error()),
    );
    let backup = Arc::new(ScriptedAdapter::echo("backup"));
    let history = ExecutionHistory::unbounded();
    let orch = orchestrator(
        vec![primary, backup.clone()],
        registry_with_search(),
        history.clone(),
    );

    let err = run(&orch, GenerationRequest::new("q")).await.unwrap_err();
    assert_eq!(err.classification().map(|c| c.kind), Some(ErrorKind::Unknown));
    assert_eq!(backup.calls(), 0);
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn tool_less_providers_are_skipped() {
    let plain = Arc::new(ScriptedAdapter::echo("plain").with_tools(false));
    let capable = Arc::new(ScriptedAdapter::new("capable").then(ScriptStep::text("ok")));
    let orch = orchestrator(
        vec![plain.clone(), capable],
        registry_with_search(),
        ExecutionHistory::unbounded(),
    );

    let result = run(&orch, GenerationRequest::new("q")).await.unwrap();
    assert_eq!(result.provider, "capable");
    assert_eq!(plain.calls(), 0);
}

#[tokio::test]
async fn zero_max_iterations_is_rejected() {
    let orch = orchestrator(
        vec![Arc::new(ScriptedAdapter::echo("m"))],
        registry_with_search(),
        ExecutionHistory::unbounded(),
    );
    let err = run(&orch, GenerationRequest::new("q").with_max_iterations(0))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
}

#[tokio::test]
async fn single_adapter_loop_runs_without_orchestrator_chain() {
    let model = Arc::new(
        ScriptedAdapter::new("solo")
            .then(search_call("c1"))
            .then(ScriptStep::text("solo answer")),
    );
    let orch = orchestrator(
        Vec::new(),
        registry_with_search(),
        ExecutionHistory::unbounded(),
    );

    let result = orch
        .tool_loop()
        .run_agentic(model, &GenerationRequest::new("q"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.text, "solo answer");
    assert_eq!(result.iteration_count, 2);
    assert_eq!(orch.history().len(), 1);
}

#[tokio::test]
async fn standalone_loop_uses_primary_retry_budget() {
    let script = || {
        Arc::new(
            ScriptedAdapter::new("solo")
                .then(ScriptStep::rate_limited())
                .then(ScriptStep::text("after retry")),
        )
    };
    let primary = Arc::new(ScriptedAdapter::echo("primary"));
    let orch = GenerationOrchestrator::new(
        vec![ProviderSlot::new(primary).with_retry_budget(0)],
        FunctionExecutionService::new(Arc::new(registry_with_search()), ExecutionHistory::unbounded()),
    )
    .with_backoff(BackoffConfig::immediate());

    let model = script();
    let err = orch
        .tool_loop()
        .run_agentic(model.clone(), &GenerationRequest::new("q"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.classification().map(|c| c.kind), Some(ErrorKind::RateLimit));
    assert_eq!(model.calls(), 1);

    let model = script();
    let result = orch
        .tool_loop()
        .with_retry_budget(1)
        .run_agentic(model.clone(), &GenerationRequest::new("q"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.text, "after retry");
    assert_eq!(model.calls(), 2);
}
