//! Bounded model ↔ tool loop.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::attempt::{report, AttemptRunner, ProviderFailure};
use crate::config::{DEFAULT_MAX_TOOL_ITERATIONS, DEFAULT_RETRY_BUDGET};
use crate::progress::{ProgressKind, ProgressUpdate};
use crate::provider::{ProviderAdapter, ProviderRequest};
use crate::tools::FunctionExecutionService;
use crate::types::attempt::AttemptLedger;
use crate::types::message::Message;
use crate::types::request::GenerationRequest;
use crate::types::result::{merge_sources, GenerationResult};
use crate::types::tool::ToolCall;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    AwaitingModel,
    ExecutingTools,
    Done,
}

/// Drives the tool-calling protocol against a single adapter.
///
/// One iteration is one model round. The loop ends when the model answers without
/// tool calls, or after `max_iterations` rounds with `bound_exhausted` set.
#[derive(Clone)]
pub struct ToolCallLoop {
    runner: AttemptRunner,
    executor: FunctionExecutionService,
    max_iterations: u32,
    retry_budget: u32,
}

impl ToolCallLoop {
    pub(crate) fn new(runner: AttemptRunner, executor: FunctionExecutionService) -> Self {
        Self {
            runner,
            executor,
            max_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
            retry_budget: DEFAULT_RETRY_BUDGET,
        }
    }

    /// Round bound used when the request carries none.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Extra attempts per round after a retryable failure.
    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }

    /// Run the loop against one adapter, with no fallback.
    pub async fn run_agentic(
        &self,
        adapter: Arc<dyn ProviderAdapter>,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult> {
        request.validate()?;
        let ledger = AttemptLedger::new();
        let provider_request = ProviderRequest::from_generation(request)
            .with_model(request.model().map(str::to_string))
            .with_tools(self.catalog(request));
        let invocation_id = Uuid::new_v4().to_string();

        self.drive(
            adapter.as_ref(),
            self.retry_budget,
            provider_request,
            request.max_iterations().unwrap_or(self.max_iterations),
            &invocation_id,
            &ledger,
            cancel,
        )
        .await
        .map_err(|f| Error::generation(f.classification, ledger.attempts()))
    }

    /// Tools offered to the model: the request's own catalog, else the registry's.
    pub(crate) fn catalog(&self, request: &GenerationRequest) -> Vec<crate::types::ToolDefinition> {
        if request.tools().is_empty() {
            self.executor.registry().definitions()
        } else {
            request.tools().to_vec()
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn drive(
        &self,
        adapter: &dyn ProviderAdapter,
        retry_budget: u32,
        request: ProviderRequest,
        max_iterations: u32,
        invocation_id: &str,
        ledger: &AttemptLedger,
        cancel: &CancellationToken,
    ) -> std::result::Result<GenerationResult, ProviderFailure> {
        let provider = adapter.provider_id();
        let progress = self.runner.progress().clone();

        let mut state = LoopState::AwaitingModel;
        let mut messages = request.messages.clone();
        let mut iteration_count = 0u32;
        let mut pending: Vec<ToolCall> = Vec::new();
        let mut executed: Vec<ToolCall> = Vec::new();
        let mut sources = Vec::new();
        let mut reasoning: Option<String> = None;
        let mut last_text = String::new();
        let mut final_text: Option<String> = None;
        let mut bound_exhausted = false;

        while state != LoopState::Done {
            match state {
                LoopState::AwaitingModel => {
                    let round = request.clone().with_messages(messages.clone());
                    let round = &round;
                    let response = self
                        .runner
                        .attempt(provider, retry_budget, ledger, cancel, move || {
                            adapter.generate_once(round)
                        })
                        .await
                        .map_err(|mut f| {
                            // Tools already ran on this provider; never replay them elsewhere.
                            if !executed.is_empty() {
                                f.fallback = false;
                            }
                            f
                        })?;
                    iteration_count += 1;

                    merge_sources(&mut sources, &response.sources);
                    if let Some(r) = &response.reasoning {
                        let acc = reasoning.get_or_insert_with(String::new);
                        if !acc.is_empty() {
                            acc.push('\n');
                        }
                        acc.push_str(r);
                    }
                    if !response.text.trim().is_empty() {
                        last_text = response.text.clone();
                    }

                    if response.tool_calls.is_empty() {
                        debug!(provider, iteration = iteration_count, "model produced final answer");
                        final_text = Some(response.text);
                        state = LoopState::Done;
                    } else {
                        pending = response.tool_calls.clone();
                        messages.push(Message::assistant_with_tool_calls(
                            response.text,
                            response.tool_calls,
                        ));
                        state = LoopState::ExecutingTools;
                    }
                }
                LoopState::ExecutingTools => {
                    report(
                        progress.as_ref(),
                        ProgressUpdate::new(
                            ProgressKind::ToolRound,
                            format!(
                                "Round {}: executing {} tool call(s)",
                                iteration_count,
                                pending.len()
                            ),
                        ),
                    )
                    .await;

                    for call in std::mem::take(&mut pending) {
                        if cancel.is_cancelled() {
                            return Err(ProviderFailure::cancelled());
                        }
                        let result = self.executor.execute(&call, invocation_id, cancel).await;
                        info!(
                            provider,
                            iteration = iteration_count,
                            tool = call.name.as_str(),
                            success = !result.is_error,
                            "tool call finished"
                        );
                        report(
                            progress.as_ref(),
                            ProgressUpdate::new(
                                ProgressKind::ToolExecution,
                                if result.is_error {
                                    format!("Tool {} failed", call.name)
                                } else {
                                    format!("Tool {} completed", call.name)
                                },
                            )
                            .with_metadata(serde_json::json!({
                                "tool": call.name,
                                "tool_call_id": call.id,
                                "success": !result.is_error,
                                "error_kind": result.error_kind,
                            })),
                        )
                        .await;
                        messages.push(Message::tool_result(&call, &result));
                        executed.push(call);
                    }
                    if cancel.is_cancelled() {
                        return Err(ProviderFailure::cancelled());
                    }

                    if iteration_count >= max_iterations {
                        info!(provider, iteration = iteration_count, "tool loop bound reached");
                        bound_exhausted = true;
                        state = LoopState::Done;
                    } else {
                        state = LoopState::AwaitingModel;
                    }
                }
                LoopState::Done => {}
            }
        }

        let text = match final_text {
            Some(t) if !t.trim().is_empty() => t,
            _ => last_text,
        };
        Ok(GenerationResult {
            text,
            sources,
            iteration_count,
            reasoning,
            paradigm: request.paradigm.clone(),
            tool_calls: executed,
            provider: provider.to_string(),
            bound_exhausted,
        })
    }
}
