//! 生成编排器：优先级列表、重试退避、降级回退与模式分发
//!
//! Generation orchestration.
//!
//! [`GenerationOrchestrator`] walks an ordered provider priority list. Each provider gets
//! its call under a per-attempt timeout; a retryable failure (rate limit, timeout) is
//! retried on the same provider up to its retry budget, anything else that is
//! fallbackable moves on to the next provider. Provider order never changes within an
//! invocation.
//!
//! | Mode | Commitment point |
//! |------|------------------|
//! | [`GenerationMode::SingleShot`] | first successful response |
//! | [`GenerationMode::Streaming`] | first chunk received |
//! | [`GenerationMode::ToolAgentic`] | first tool executed |
//!
//! Before the commitment point a failure may fall back to the next provider; after it,
//! failures are final for the invocation.

pub mod agentic;
mod attempt;
mod policy;
pub mod streaming;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::classifier::{BackoffConfig, ErrorClassification, ErrorClassifier};
use crate::config::{DEFAULT_ATTEMPT_TIMEOUT_MS, DEFAULT_MAX_TOOL_ITERATIONS, DEFAULT_RETRY_BUDGET};
use crate::error_code::ErrorKind;
use crate::progress::{noop_sink, ProgressKind, ProgressSink, ProgressUpdate};
use crate::provider::{ProviderAdapter, ProviderRequest};
use crate::tools::{ExecutionHistory, FunctionExecutionService, ToolRegistry};
use crate::types::attempt::{AttemptLedger, AttemptOutcome, ProviderAttempt};
use crate::types::events::StreamEvent;
use crate::types::request::GenerationRequest;
use crate::types::result::GenerationResult;
use crate::{Error, Result};

pub use agentic::ToolCallLoop;
pub use streaming::{ResponseStream, StreamingSession};

use attempt::{report, AttemptRunner, ProviderFailure};
use streaming::{open_first, CHANNEL_CAPACITY};

/// How a request is fulfilled once a provider is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    SingleShot,
    /// Drained internally; use [`GenerationOrchestrator::stream`] for incremental delivery.
    Streaming,
    ToolAgentic,
}

/// One entry of the priority list.
#[derive(Clone)]
pub struct ProviderSlot {
    adapter: Arc<dyn ProviderAdapter>,
    retry_budget: u32,
    enabled: bool,
}

impl ProviderSlot {
    pub fn new(adapter: Arc<dyn ProviderAdapter>) -> Self {
        Self {
            adapter,
            retry_budget: DEFAULT_RETRY_BUDGET,
            enabled: true,
        }
    }

    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn id(&self) -> &str {
        self.adapter.provider_id()
    }

    pub fn adapter(&self) -> &Arc<dyn ProviderAdapter> {
        &self.adapter
    }

    pub fn retry_budget(&self) -> u32 {
        self.retry_budget
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl std::fmt::Debug for ProviderSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSlot")
            .field("id", &self.id())
            .field("retry_budget", &self.retry_budget)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Resolve the model a provider should use for a request.
///
/// `provider/model` pins the model to the provider with that id; a bare model goes to
/// the primary provider only; when the prefix is not a known provider id the whole
/// string is a bare model (OpenRouter-style `vendor/model`). `None` means the
/// provider's configured default.
pub(crate) fn resolve_model(
    requested: Option<&str>,
    provider_id: &str,
    is_primary: bool,
    known_ids: &[&str],
) -> Option<String> {
    let requested = requested.map(str::trim).filter(|m| !m.is_empty())?;
    if let Some((prefix, model)) = requested.split_once('/') {
        if known_ids.contains(&prefix) {
            return (prefix == provider_id && !model.is_empty()).then(|| model.to_string());
        }
    }
    is_primary.then(|| requested.to_string())
}

/// Fallback-chain driver. Cheap to clone; clones share the execution history.
#[derive(Clone)]
pub struct GenerationOrchestrator {
    providers: Vec<ProviderSlot>,
    runner: AttemptRunner,
    executor: FunctionExecutionService,
    max_tool_iterations: u32,
}

impl GenerationOrchestrator {
    pub fn new(providers: Vec<ProviderSlot>, executor: FunctionExecutionService) -> Self {
        Self {
            providers,
            runner: AttemptRunner::new(
                ErrorClassifier::default(),
                Some(Duration::from_millis(DEFAULT_ATTEMPT_TIMEOUT_MS)),
                noop_sink(),
            ),
            executor,
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
        }
    }

    /// Orchestrator with an empty tool registry and an unbounded history.
    pub fn without_tools(providers: Vec<ProviderSlot>) -> Self {
        Self::new(
            providers,
            FunctionExecutionService::new(
                Arc::new(ToolRegistry::new()),
                ExecutionHistory::unbounded(),
            ),
        )
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.runner = AttemptRunner::new(
            ErrorClassifier::new(backoff),
            self.runner.timeout(),
            self.runner.progress().clone(),
        );
        self
    }

    /// `None` disables the per-attempt timeout.
    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.runner = AttemptRunner::new(
            *self.runner.classifier(),
            timeout,
            self.runner.progress().clone(),
        );
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.runner = AttemptRunner::new(*self.runner.classifier(), self.runner.timeout(), progress);
        self
    }

    pub fn with_max_tool_iterations(mut self, max: u32) -> Self {
        self.max_tool_iterations = max;
        self
    }

    pub fn providers(&self) -> &[ProviderSlot] {
        &self.providers
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        self.runner.classifier()
    }

    pub fn execution_service(&self) -> &FunctionExecutionService {
        &self.executor
    }

    pub fn history(&self) -> &ExecutionHistory {
        self.executor.history()
    }

    /// Tool loop sharing this orchestrator's runner and execution service. Rounds get the
    /// primary provider's retry budget.
    pub fn tool_loop(&self) -> ToolCallLoop {
        let mut tool_loop = ToolCallLoop::new(self.runner.clone(), self.executor.clone())
            .with_max_iterations(self.max_tool_iterations);
        if let Some(primary) = self.providers.iter().find(|s| s.is_enabled()) {
            tool_loop = tool_loop.with_retry_budget(primary.retry_budget());
        }
        tool_loop
    }

    /// Single-provider streaming session with this orchestrator's classifier and timeout.
    pub fn streaming_session(&self) -> StreamingSession {
        StreamingSession::new(*self.runner.classifier()).with_timeout(self.runner.timeout())
    }

    /// Run one invocation to completion.
    pub async fn run(
        &self,
        request: &GenerationRequest,
        mode: GenerationMode,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult> {
        request.validate()?;
        let result = match mode {
            GenerationMode::SingleShot => self.run_single(request, cancel).await,
            GenerationMode::Streaming => self.run_streaming(request, cancel).await,
            GenerationMode::ToolAgentic => self.run_agentic(request, cancel).await,
        };
        if let Ok(r) = &result {
            report(
                self.runner.progress().as_ref(),
                ProgressUpdate::new(
                    ProgressKind::Completed,
                    format!("Generation completed by {}", r.provider),
                )
                .with_metadata(serde_json::json!({
                    "provider": r.provider,
                    "iteration_count": r.iteration_count,
                    "sources": r.sources.len(),
                })),
            )
            .await;
        }
        result
    }

    /// Stream one invocation. Fallback and retry happen until the first chunk arrives.
    pub fn stream(&self, request: GenerationRequest, cancel: CancellationToken) -> ResponseStream {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = request.validate() {
                let c = this.runner.classifier().classify(&e);
                let _ = tx.send(StreamEvent::Error(c)).await;
                return;
            }
            this.drive_stream(&request, &cancel, &tx).await;
        });
        ResponseStream::new(rx)
    }

    async fn run_single(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult> {
        let ledger = AttemptLedger::new();
        let runner = &self.runner;
        let ledger_ref = &ledger;
        self.with_fallback(request, ledger_ref, cancel, false, move |slot, preq| async move {
            let adapter = slot.adapter().as_ref();
            let preq = &preq;
            let response = runner
                .attempt(slot.id(), slot.retry_budget(), ledger_ref, cancel, move || {
                    adapter.generate_once(preq)
                })
                .await?;
            Ok::<_, ProviderFailure>(GenerationResult {
                text: response.text,
                sources: response.sources,
                iteration_count: 0,
                reasoning: response.reasoning,
                paradigm: request.paradigm().cloned(),
                tool_calls: Vec::new(),
                provider: slot.id().to_string(),
                bound_exhausted: false,
            })
        })
        .await
    }

    async fn run_streaming(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let drive = async {
            let attempts = self.drive_stream(request, cancel, &tx).await;
            drop(tx);
            attempts
        };
        let (attempts, outcome) = tokio::join!(drive, ResponseStream::new(rx).collect_summary());
        match outcome {
            Ok(summary) => Ok(GenerationResult {
                text: summary.text,
                sources: summary.sources,
                iteration_count: 0,
                reasoning: summary.reasoning,
                paradigm: summary.paradigm,
                tool_calls: Vec::new(),
                provider: summary.provider,
                bound_exhausted: false,
            }),
            Err(c) => Err(Error::generation(c, attempts)),
        }
    }

    /// Produce the stream events for one invocation into `tx`; returns the ledger.
    async fn drive_stream(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Vec<ProviderAttempt> {
        let ledger = AttemptLedger::new();
        let runner = &self.runner;
        let ledger_ref = &ledger;
        let opened = self
            .with_fallback(request, ledger_ref, cancel, false, move |slot, preq| async move {
                let adapter = slot.adapter().as_ref();
                let preq = &preq;
                let (first, rest) = runner
                    .attempt(slot.id(), slot.retry_budget(), ledger_ref, cancel, move || {
                        open_first(adapter, preq)
                    })
                    .await?;
                Ok::<_, ProviderFailure>((first, rest, slot.id().to_string()))
            })
            .await;

        match opened {
            Ok((first, rest, provider)) => {
                self.streaming_session()
                    .relay(first, rest, tx, cancel, request.paradigm().cloned(), &provider)
                    .await;
            }
            Err(e) => {
                let c = self.runner.classifier().classify(&e);
                let _ = tx.send(StreamEvent::Error(c)).await;
            }
        }
        ledger.into_attempts()
    }

    async fn run_agentic(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult> {
        let ledger = AttemptLedger::new();
        let ledger_ref = &ledger;
        let invocation_id = Uuid::new_v4().to_string();
        let invocation_ref = invocation_id.as_str();
        let tool_loop = self.tool_loop();
        let tool_loop = &tool_loop;
        let tools = tool_loop.catalog(request);
        let tools = &tools;
        let max_iterations = request.max_iterations().unwrap_or(self.max_tool_iterations);

        self.with_fallback(request, ledger_ref, cancel, true, move |slot, preq| async move {
            tool_loop
                .drive(
                    slot.adapter().as_ref(),
                    slot.retry_budget(),
                    preq.with_tools(tools.clone()),
                    max_iterations,
                    invocation_ref,
                    ledger_ref,
                    cancel,
                )
                .await
        })
        .await
    }

    /// Walk the priority list, handing each eligible provider to `per_provider` until one
    /// succeeds or a failure forbids moving on.
    async fn with_fallback<'a, T, F, Fut>(
        &'a self,
        request: &GenerationRequest,
        ledger: &AttemptLedger,
        cancel: &CancellationToken,
        needs_tools: bool,
        mut per_provider: F,
    ) -> Result<T>
    where
        F: FnMut(&'a ProviderSlot, ProviderRequest) -> Fut,
        Fut: Future<Output = std::result::Result<T, ProviderFailure>>,
    {
        let enabled: Vec<&'a ProviderSlot> = self.providers.iter().filter(|s| s.enabled).collect();
        let Some(primary) = enabled.first() else {
            warn!(configured = self.providers.len(), "no enabled providers");
            return Err(Error::generation(
                ErrorClassification::no_available_models(),
                ledger.attempts(),
            ));
        };
        let primary_id = primary.id().to_string();
        let known_ids: Vec<&str> = self.providers.iter().map(|s| s.id()).collect();

        let mut last: Option<ErrorClassification> = None;
        for (idx, slot) in enabled.iter().copied().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::generation(
                    ErrorClassification::cancelled(),
                    ledger.attempts(),
                ));
            }
            if needs_tools && !slot.adapter.supports_tools() {
                let c = ErrorClassification::new(
                    ErrorKind::Unknown,
                    format!("provider '{}' does not support tool calling", slot.id()),
                );
                ledger.record(ProviderAttempt {
                    provider: slot.id().to_string(),
                    attempt: 1,
                    started_at: SystemTime::now(),
                    outcome: AttemptOutcome::Failed(c.clone()),
                    latency: Duration::ZERO,
                });
                info!(provider = slot.id(), "skipping provider without tool support");
                last = Some(c);
                continue;
            }

            let model = resolve_model(request.model(), slot.id(), slot.id() == primary_id, &known_ids);
            let provider_request = ProviderRequest::from_generation(request).with_model(model);

            match per_provider(slot, provider_request).await {
                Ok(value) => return Ok(value),
                Err(failure) if !failure.fallback => {
                    return Err(Error::generation(failure.classification, ledger.attempts()));
                }
                Err(failure) => {
                    if let Some(next) = enabled.get(idx + 1) {
                        info!(
                            from = slot.id(),
                            to = next.id(),
                            error_kind = failure.classification.kind.name(),
                            "falling back to next provider"
                        );
                        report(
                            self.runner.progress().as_ref(),
                            ProgressUpdate::new(
                                ProgressKind::Fallback,
                                format!(
                                    "{} unavailable ({}); switching to {}",
                                    slot.id(),
                                    failure.classification.kind,
                                    next.id()
                                ),
                            ),
                        )
                        .await;
                    }
                    last = Some(failure.classification);
                }
            }
        }

        warn!(tried = enabled.len(), "all providers failed");
        Err(Error::generation(
            ErrorClassification::max_fallbacks_exceeded(enabled.len(), last.as_ref()),
            ledger.attempts(),
        ))
    }
}

impl std::fmt::Debug for GenerationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationOrchestrator")
            .field("providers", &self.providers)
            .field("max_tool_iterations", &self.max_tool_iterations)
            .field("attempt_timeout", &self.runner.timeout())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_resolution() {
        let ids = ["openai", "claude"];
        assert_eq!(
            resolve_model(Some("claude/claude-opus-4"), "claude", false, &ids).as_deref(),
            Some("claude-opus-4")
        );
        assert_eq!(resolve_model(Some("claude/claude-opus-4"), "openai", true, &ids), None);
        assert_eq!(
            resolve_model(Some("gpt-4o"), "openai", true, &ids).as_deref(),
            Some("gpt-4o")
        );
        assert_eq!(resolve_model(Some("gpt-4o"), "claude", false, &ids), None);
        assert_eq!(
            resolve_model(Some("meta-llama/llama-3-70b"), "openai", true, &ids).as_deref(),
            Some("meta-llama/llama-3-70b")
        );
        assert_eq!(resolve_model(None, "openai", true, &ids), None);
        assert_eq!(resolve_model(Some("  "), "openai", true, &ids), None);
    }
}
