//! 研究助手客户端：面向调用方的精简接口
//!
//! Caller-facing facade over [`GenerationOrchestrator`].
//!
//! Keep the surface small and predictable: build once with [`ResearchClientBuilder`],
//! then call one of the three generation entry points.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::classifier::{BackoffConfig, ErrorClassification};
use crate::config::{
    OrchestratorConfig, DEFAULT_ATTEMPT_TIMEOUT_MS, DEFAULT_HISTORY_CAPACITY,
    DEFAULT_MAX_TOOL_ITERATIONS, DEFAULT_RETRY_BUDGET,
};
use crate::orchestrator::{GenerationMode, GenerationOrchestrator, ProviderSlot, ResponseStream};
use crate::progress::{
    noop_sink, CompositeProgressSink, FnProgressSink, ProgressSink, ProgressUpdate,
};
use crate::provider::{create_adapter, ProviderAdapter};
use crate::tools::{
    ExecutionHistory, ExecutionHistoryEntry, FunctionExecutionService, ToolExecutor, ToolRegistry,
};
use crate::types::events::{StreamChunk, StreamSummary};
use crate::types::request::{EffortLevel, GenerationRequest, ParadigmContext};
use crate::types::result::{GenerationResult, Source};
use crate::types::tool::{ToolCall, ToolDefinition};
use crate::{Error, ErrorContext, Result};

/// Result of [`ResearchClient::generate_text`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextGeneration {
    pub text: String,
    pub sources: Vec<Source>,
    pub iteration_count: u32,
}

/// Result of [`ResearchClient::generate_response_with_tools`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolGeneration {
    pub text: String,
    pub iteration_count: u32,
    pub tool_calls: Vec<ToolCall>,
    pub reasoning_content: Option<String>,
    pub paradigm_context: Option<ParadigmContext>,
    pub bound_exhausted: bool,
}

impl From<GenerationResult> for ToolGeneration {
    fn from(r: GenerationResult) -> Self {
        Self {
            text: r.text,
            iteration_count: r.iteration_count,
            tool_calls: r.tool_calls,
            reasoning_content: r.reasoning,
            paradigm_context: r.paradigm,
            bound_exhausted: r.bound_exhausted,
        }
    }
}

fn paradigm_context(
    paradigm: Option<&str>,
    probabilities: Option<BTreeMap<String, f64>>,
) -> Option<ParadigmContext> {
    paradigm.map(|p| ParadigmContext::new(p).with_probabilities(probabilities.unwrap_or_default()))
}

/// Builder for [`ResearchClient`].
pub struct ResearchClientBuilder {
    providers: Vec<ProviderSlot>,
    registry: ToolRegistry,
    history: Option<ExecutionHistory>,
    progress: Arc<dyn ProgressSink>,
    backoff: BackoffConfig,
    attempt_timeout: Option<Duration>,
    max_tool_iterations: u32,
    default_retry_budget: u32,
}

impl Default for ResearchClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResearchClientBuilder {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            registry: ToolRegistry::new(),
            history: None,
            progress: noop_sink(),
            backoff: BackoffConfig::default(),
            attempt_timeout: Some(Duration::from_millis(DEFAULT_ATTEMPT_TIMEOUT_MS)),
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
            default_retry_budget: DEFAULT_RETRY_BUDGET,
        }
    }

    /// Start from a validated configuration; adapters are created in priority order.
    pub fn from_config(config: &OrchestratorConfig) -> Result<Self> {
        config.validate()?;
        let mut builder = Self::new();
        builder.backoff = config.backoff();
        builder.attempt_timeout = config.attempt_timeout();
        builder.max_tool_iterations = config.max_tool_iterations;
        builder.default_retry_budget = config.default_retry_budget;
        builder.history = Some(ExecutionHistory::new(config.history_capacity));

        for provider in &config.providers {
            let adapter = create_adapter(provider)?;
            let budget = provider.retry_budget.unwrap_or(config.default_retry_budget);
            builder.providers.push(
                ProviderSlot::new(adapter)
                    .with_retry_budget(budget)
                    .with_enabled(provider.enabled),
            );
        }
        Ok(builder)
    }

    /// Append an adapter to the priority list with the default retry budget.
    pub fn with_adapter(self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        let budget = self.default_retry_budget;
        self.with_adapter_budget(adapter, budget)
    }

    pub fn with_adapter_budget(mut self, adapter: Arc<dyn ProviderAdapter>, budget: u32) -> Self {
        self.providers
            .push(ProviderSlot::new(adapter).with_retry_budget(budget));
        self
    }

    /// Append a pre-built slot (use this for disabled entries).
    pub fn with_slot(mut self, slot: ProviderSlot) -> Self {
        self.providers.push(slot);
        self
    }

    pub fn with_tool(
        mut self,
        definition: ToolDefinition,
        executor: Arc<dyn ToolExecutor>,
    ) -> Result<Self> {
        self.registry.register(definition, executor)?;
        Ok(self)
    }

    /// Replace the tool registry.
    pub fn with_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Share an existing history store (e.g. across clients).
    pub fn with_history(mut self, history: ExecutionHistory) -> Self {
        self.history = Some(history);
        self
    }

    /// Inject a progress sink. Default is a no-op sink.
    pub fn progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// `None` disables the per-attempt timeout.
    pub fn attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn max_tool_iterations(mut self, max: u32) -> Self {
        self.max_tool_iterations = max;
        self
    }

    pub fn build(self) -> Result<ResearchClient> {
        if self.max_tool_iterations == 0 {
            return Err(Error::validation_with_context(
                "max_tool_iterations must be at least 1",
                ErrorContext::new().with_field_path("max_tool_iterations"),
            ));
        }
        let history = self
            .history
            .unwrap_or_else(|| ExecutionHistory::with_capacity(DEFAULT_HISTORY_CAPACITY));
        let executor = FunctionExecutionService::new(Arc::new(self.registry), history);

        info!(
            providers = self.providers.len(),
            tools = executor.registry().len(),
            max_tool_iterations = self.max_tool_iterations,
            "research client ready"
        );

        let orchestrator = GenerationOrchestrator::new(self.providers, executor)
            .with_backoff(self.backoff)
            .with_attempt_timeout(self.attempt_timeout)
            .with_max_tool_iterations(self.max_tool_iterations)
            .with_progress(self.progress.clone());

        Ok(ResearchClient {
            orchestrator,
            progress: self.progress,
        })
    }
}

/// Research-assistant generation client. Cheap to clone.
#[derive(Clone)]
pub struct ResearchClient {
    orchestrator: GenerationOrchestrator,
    progress: Arc<dyn ProgressSink>,
}

impl ResearchClient {
    pub fn builder() -> ResearchClientBuilder {
        ResearchClientBuilder::new()
    }

    /// Build directly from a configuration file (YAML, or JSON by extension).
    pub fn from_config_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let config = OrchestratorConfig::from_path(path)?;
        ResearchClientBuilder::from_config(&config)?.build()
    }

    /// Single-shot generation. `on_progress` receives status updates for this call only,
    /// in addition to the client's own sink.
    pub async fn generate_text<P>(
        &self,
        prompt: &str,
        model: Option<&str>,
        effort: EffortLevel,
        on_progress: Option<P>,
        cancel: &CancellationToken,
    ) -> Result<TextGeneration>
    where
        P: Fn(&ProgressUpdate) + Send + Sync + 'static,
    {
        let mut request = GenerationRequest::new(prompt).with_effort(effort);
        if let Some(model) = model {
            request = request.with_model(model);
        }
        let result = self
            .orchestrator_with(on_progress)
            .run(&request, GenerationMode::SingleShot, cancel)
            .await?;
        Ok(TextGeneration {
            text: result.text,
            sources: result.sources,
            iteration_count: result.iteration_count,
        })
    }

    /// Tool-agentic generation. An empty `tools` list offers the registry's catalog.
    #[allow(clippy::too_many_arguments)]
    pub async fn generate_response_with_tools(
        &self,
        prompt: &str,
        tools: Vec<ToolDefinition>,
        effort: EffortLevel,
        paradigm: Option<&str>,
        probabilities: Option<BTreeMap<String, f64>>,
        max_iterations: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<ToolGeneration> {
        let mut request = GenerationRequest::new(prompt)
            .with_effort(effort)
            .with_tools(tools);
        if let Some(ctx) = paradigm_context(paradigm, probabilities) {
            request = request.with_paradigm(ctx);
        }
        if let Some(max) = max_iterations {
            request = request.with_max_iterations(max);
        }
        let result = self
            .orchestrator
            .run(&request, GenerationMode::ToolAgentic, cancel)
            .await?;
        Ok(result.into())
    }

    /// Callback-style streaming. Exactly one of `on_complete` / `on_error` fires.
    #[allow(clippy::too_many_arguments)]
    pub async fn stream_response<C, D, E>(
        &self,
        prompt: &str,
        effort: EffortLevel,
        on_chunk: C,
        on_complete: D,
        on_error: E,
        paradigm: Option<&str>,
        probabilities: Option<BTreeMap<String, f64>>,
        cancel: CancellationToken,
    ) where
        C: FnMut(StreamChunk),
        D: FnOnce(StreamSummary),
        E: FnOnce(ErrorClassification),
    {
        let mut request = GenerationRequest::new(prompt).with_effort(effort);
        if let Some(ctx) = paradigm_context(paradigm, probabilities) {
            request = request.with_paradigm(ctx);
        }
        self.stream(request, cancel)
            .into_callbacks(on_chunk, on_complete, on_error)
            .await
    }

    /// Streaming as an ordered event sequence.
    pub fn stream(&self, request: GenerationRequest, cancel: CancellationToken) -> ResponseStream {
        self.orchestrator.stream(request, cancel)
    }

    /// Run an arbitrary request in the given mode.
    pub async fn run(
        &self,
        request: &GenerationRequest,
        mode: GenerationMode,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult> {
        self.orchestrator.run(request, mode, cancel).await
    }

    /// Snapshot of every tool execution recorded so far, oldest first.
    pub fn execution_history(&self) -> Vec<ExecutionHistoryEntry> {
        self.orchestrator.history().snapshot()
    }

    pub fn history(&self) -> &ExecutionHistory {
        self.orchestrator.history()
    }

    pub fn orchestrator(&self) -> &GenerationOrchestrator {
        &self.orchestrator
    }

    fn orchestrator_with<P>(&self, on_progress: Option<P>) -> GenerationOrchestrator
    where
        P: Fn(&ProgressUpdate) + Send + Sync + 'static,
    {
        match on_progress {
            Some(callback) => self.orchestrator.clone().with_progress(Arc::new(
                CompositeProgressSink::new(vec![
                    self.progress.clone(),
                    Arc::new(FnProgressSink::new(callback)),
                ]),
            )),
            None => self.orchestrator.clone(),
        }
    }
}

impl std::fmt::Debug for ResearchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResearchClient")
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}
