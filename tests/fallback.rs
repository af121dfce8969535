//! Fallback chain and retry behavior of the orchestrator.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use ai_research_runtime::provider::{CallLog, ScriptStep, ScriptedAdapter};
use ai_research_runtime::{
    BackoffConfig, Error, ErrorKind, GenerationMode, GenerationOrchestrator, GenerationRequest,
    ProviderSlot,
};
use tokio_util::sync::CancellationToken;

fn orchestrator(adapters: Vec<Arc<ScriptedAdapter>>) -> GenerationOrchestrator {
    let slots = adapters
        .into_iter()
        .map(|a| ProviderSlot::new(a))
        .collect();
    GenerationOrchestrator::without_tools(slots).with_backoff(BackoffConfig::immediate())
}

fn generation_error(err: Error) -> (ErrorKind, Vec<String>) {
    match &err {
        Error::Generation { .. } => {
            let kind = err.classification().map(|c| c.kind).unwrap();
            let providers = err.attempts().iter().map(|a| a.provider.clone()).collect();
            (kind, providers)
        }
        other => panic!("expected generation error, got {other:?}"),
    }
}

#[tokio::test]
async fn quota_failures_advance_in_priority_order() {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let a = Arc::new(
        ScriptedAdapter::new("a")
            .then(ScriptStep::quota_exceeded())
            .with_call_log(log.clone()),
    );
    let b = Arc::new(
        ScriptedAdapter::new("b")
            .then(ScriptStep::quota_exceeded())
            .with_call_log(log.clone()),
    );
    let c = Arc::new(
        ScriptedAdapter::new("c")
            .then(ScriptStep::text("from c"))
            .with_call_log(log.clone()),
    );

    let result = orchestrator(vec![a.clone(), b.clone(), c])
        .run(
            &GenerationRequest::new("q"),
            GenerationMode::SingleShot,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.text, "from c");
    assert_eq!(result.provider, "c");
    assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    // Quota exhaustion is never retried on the same provider.
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 1);
}

#[tokio::test]
async fn rate_limit_retries_budget_then_falls_back() {
    let limited = Arc::new(ScriptedAdapter::new("limited").repeat(ScriptStep::rate_limited()));
    let backup = Arc::new(ScriptedAdapter::new("backup").then(ScriptStep::text("ok")));

    let result = orchestrator(vec![limited.clone(), backup])
        .run(
            &GenerationRequest::new("q"),
            GenerationMode::SingleShot,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.provider, "backup");
    assert_eq!(limited.calls(), 3);
}

#[tokio::test]
async fn rate_limited_last_provider_exhausts_chain() {
    let limited = Arc::new(ScriptedAdapter::new("only").repeat(ScriptStep::rate_limited()));

    let err = orchestrator(vec![limited.clone()])
        .run(
            &GenerationRequest::new("q"),
            GenerationMode::SingleShot,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    let (kind, providers) = generation_error(err);
    assert_eq!(kind, ErrorKind::MaxFallbacksExceeded);
    assert_eq!(providers, vec!["only", "only", "only"]);
    assert_eq!(limited.calls(), 3);
}

#[tokio::test]
async fn custom_retry_budget_is_honored() {
    let limited = Arc::new(ScriptedAdapter::new("limited").repeat(ScriptStep::rate_limited()));
    let orch = GenerationOrchestrator::without_tools(vec![
        ProviderSlot::new(limited.clone()).with_retry_budget(0)
    ])
    .with_backoff(BackoffConfig::immediate());

    let _ = orch
        .run(
            &GenerationRequest::new("q"),
            GenerationMode::SingleShot,
            &CancellationToken::new(),
        )
        .await;
    assert_eq!(limited.calls(), 1);
}

#[tokio::test]
async fn empty_provider_list_is_no_available_models() {
    let err = GenerationOrchestrator::without_tools(Vec::new())
        .run(
            &GenerationRequest::new("q"),
            GenerationMode::SingleShot,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    let (kind, providers) = generation_error(err);
    assert_eq!(kind, ErrorKind::NoAvailableModels);
    assert!(providers.is_empty());
}

#[tokio::test]
async fn all_disabled_is_no_available_models() {
    let a = Arc::new(ScriptedAdapter::echo("a"));
    let orch = GenerationOrchestrator::without_tools(vec![
        ProviderSlot::new(a.clone()).with_enabled(false)
    ]);

    let err = orch
        .run(
            &GenerationRequest::new("q"),
            GenerationMode::SingleShot,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(generation_error(err).0, ErrorKind::NoAvailableModels);
    assert_eq!(a.calls(), 0);
}

#[tokio::test]
async fn disabled_providers_are_skipped() {
    let off = Arc::new(ScriptedAdapter::echo("off"));
    let on = Arc::new(ScriptedAdapter::new("on").then(ScriptStep::text("hi")));
    let orch = GenerationOrchestrator::without_tools(vec![
        ProviderSlot::new(off.clone()).with_enabled(false),
        ProviderSlot::new(on),
    ]);

    let result = orch
        .run(
            &GenerationRequest::new("q"),
            GenerationMode::SingleShot,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(result.provider, "on");
    assert_eq!(off.calls(), 0);
}

#[tokio::test]
async fn cancelled_before_start_makes_no_attempt() {
    let a = Arc::new(ScriptedAdapter::echo("a"));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = orchestrator(vec![a.clone()])
        .run(&GenerationRequest::new("q"), GenerationMode::SingleShot, &cancel)
        .await
        .unwrap_err();

    let (kind, providers) = generation_error(err);
    assert_eq!(kind, ErrorKind::Cancelled);
    assert!(providers.is_empty());
    assert_eq!(a.calls(), 0);
}

#[tokio::test]
async fn cancel_during_attempt_stops_the_chain() {
    let hang = Arc::new(ScriptedAdapter::new("hang").then(ScriptStep::Hang));
    let backup = Arc::new(ScriptedAdapter::echo("backup"));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = orchestrator(vec![hang, backup.clone()])
        .with_attempt_timeout(None)
        .run(&GenerationRequest::new("q"), GenerationMode::SingleShot, &cancel)
        .await
        .unwrap_err();

    assert_eq!(generation_error(err).0, ErrorKind::Cancelled);
    assert_eq!(backup.calls(), 0);
}

#[tokio::test]
async fn attempt_timeout_is_retried_like_rate_limit() {
    let slow = Arc::new(
        ScriptedAdapter::new("slow")
            .then(ScriptStep::Hang)
            .then(ScriptStep::text("second time lucky")),
    );

    let result = orchestrator(vec![slow.clone()])
        .with_attempt_timeout(Some(Duration::from_millis(20)))
        .run(
            &GenerationRequest::new("q"),
            GenerationMode::SingleShot,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.text, "second time lucky");
    assert_eq!(slow.calls(), 2);
}

#[tokio::test]
async fn server_error_falls_back_without_retry() {
    let broken = Arc::new(ScriptedAdapter::new("broken").repeat(ScriptStep::server_error()));
    let backup = Arc::new(ScriptedAdapter::new("backup").then(ScriptStep::text("fine")));

    let result = orchestrator(vec![broken.clone(), backup])
        .run(
            &GenerationRequest::new("q"),
            GenerationMode::SingleShot,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(result.text, "fine");
    assert_eq!(broken.calls(), 1);
}

#[tokio::test]
async fn pinned_model_reaches_only_its_provider() {
    let openai = Arc::new(ScriptedAdapter::new("openai").then(ScriptStep::quota_exceeded()));
    let claude = Arc::new(ScriptedAdapter::new("claude").then(ScriptStep::text("ok")));

    orchestrator(vec![openai.clone(), claude.clone()])
        .run(
            &GenerationRequest::new("q").with_model("claude/claude-sonnet-4"),
            GenerationMode::SingleShot,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(openai.requests()[0].model, None);
    assert_eq!(claude.requests()[0].model.as_deref(), Some("claude-sonnet-4"));
}

#[tokio::test]
async fn bare_model_applies_to_primary_only() {
    let primary = Arc::new(ScriptedAdapter::new("primary").then(ScriptStep::quota_exceeded()));
    let backup = Arc::new(ScriptedAdapter::new("backup").then(ScriptStep::text("ok")));

    orchestrator(vec![primary.clone(), backup.clone()])
        .run(
            &GenerationRequest::new("q").with_model("gpt-4o"),
            GenerationMode::SingleShot,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(primary.requests()[0].model.as_deref(), Some("gpt-4o"));
    assert_eq!(backup.requests()[0].model, None);
}

#[tokio::test]
async fn attempt_ledger_reports_every_try() {
    let flaky = Arc::new(
        ScriptedAdapter::new("flaky")
            .then(ScriptStep::rate_limited())
            .then(ScriptStep::quota_exceeded()),
    );
    let dead = Arc::new(ScriptedAdapter::new("dead").then(ScriptStep::server_error()));

    let err = orchestrator(vec![flaky, dead])
        .run(
            &GenerationRequest::new("q"),
            GenerationMode::SingleShot,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    let kinds: Vec<ErrorKind> = err
        .attempts()
        .iter()
        .filter_map(|a| a.classification().map(|c| c.kind))
        .collect();
    assert_eq!(
        kinds,
        vec![ErrorKind::RateLimit, ErrorKind::QuotaExceeded, ErrorKind::Unknown]
    );
    let numbers: Vec<u32> = err.attempts().iter().map(|a| a.attempt).collect();
    assert_eq!(numbers, vec![1, 2, 1]);
    let c = err.classification().unwrap();
    assert_eq!(c.kind, ErrorKind::MaxFallbacksExceeded);
    assert!(c.remediation.is_some());
}
