use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::policy::{Decision, PolicyEngine};
use crate::classifier::{ErrorClassification, ErrorClassifier};
use crate::progress::{ProgressKind, ProgressSink, ProgressUpdate};
use crate::types::attempt::{AttemptLedger, AttemptOutcome, ProviderAttempt};
use crate::{Error, Result};

/// Why a provider gave up, and whether the invocation may move on to the next one.
#[derive(Debug, Clone)]
pub(crate) struct ProviderFailure {
    pub classification: ErrorClassification,
    pub fallback: bool,
}

impl ProviderFailure {
    pub fn cancelled() -> Self {
        Self {
            classification: ErrorClassification::cancelled(),
            fallback: false,
        }
    }
}

/// Runs one call against one provider with timeout, cancellation and bounded retry.
/// Every try lands in the ledger.
#[derive(Clone)]
pub(crate) struct AttemptRunner {
    classifier: ErrorClassifier,
    policy: PolicyEngine,
    timeout: Option<Duration>,
    progress: Arc<dyn ProgressSink>,
}

impl AttemptRunner {
    pub fn new(
        classifier: ErrorClassifier,
        timeout: Option<Duration>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            classifier,
            policy: PolicyEngine::new(classifier),
            timeout,
            progress,
        }
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn progress(&self) -> &Arc<dyn ProgressSink> {
        &self.progress
    }

    pub async fn attempt<T, F, Fut>(
        &self,
        provider: &str,
        budget: u32,
        ledger: &AttemptLedger,
        cancel: &CancellationToken,
        mut call: F,
    ) -> std::result::Result<T, ProviderFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries_used = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(ProviderFailure::cancelled());
            }
            let attempt = retries_used + 1;
            report(
                self.progress.as_ref(),
                ProgressUpdate::new(
                    ProgressKind::ProviderAttempt,
                    format!("Trying {} (attempt {})", provider, attempt),
                )
                .with_metadata(serde_json::json!({ "provider": provider, "attempt": attempt })),
            )
            .await;

            let started_at = SystemTime::now();
            let start = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled),
                r = self.with_timeout(call()) => r,
            };
            let latency = start.elapsed();

            let err = match outcome {
                Ok(value) => {
                    ledger.record(ProviderAttempt {
                        provider: provider.to_string(),
                        attempt,
                        started_at,
                        outcome: AttemptOutcome::Success,
                        latency,
                    });
                    debug!(
                        provider,
                        attempt,
                        duration_ms = latency.as_millis() as u64,
                        "provider attempt succeeded"
                    );
                    return Ok(value);
                }
                Err(e) => e,
            };

            let classification = self.classifier.classify(&err);
            ledger.record(ProviderAttempt {
                provider: provider.to_string(),
                attempt,
                started_at,
                outcome: AttemptOutcome::Failed(classification.clone()),
                latency,
            });

            match self.policy.decide(&classification, retries_used, budget) {
                Decision::Retry { delay } => {
                    warn!(
                        provider,
                        attempt,
                        error_kind = classification.kind.name(),
                        delay_ms = delay.as_millis() as u64,
                        "retrying provider"
                    );
                    report(
                        self.progress.as_ref(),
                        ProgressUpdate::new(
                            ProgressKind::Retry,
                            format!(
                                "{} failed with {}; retrying in {}ms",
                                provider,
                                classification.kind,
                                delay.as_millis()
                            ),
                        ),
                    )
                    .await;
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(ProviderFailure::cancelled()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    retries_used += 1;
                }
                Decision::Fallback => {
                    info!(
                        provider,
                        attempt,
                        error_kind = classification.kind.name(),
                        "provider gave up"
                    );
                    return Err(ProviderFailure {
                        classification,
                        fallback: true,
                    });
                }
                Decision::Fail => {
                    info!(
                        provider,
                        attempt,
                        error_kind = classification.kind.name(),
                        "provider failed terminally"
                    );
                    return Err(ProviderFailure {
                        classification,
                        fallback: false,
                    });
                }
            }
        }
    }

    async fn with_timeout<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(r) => r,
                Err(_) => Err(Error::Timeout {
                    after_ms: limit.as_millis() as u64,
                }),
            },
            None => fut.await,
        }
    }
}

/// Deliver a progress update; sink failures are logged and dropped.
pub(crate) async fn report(sink: &dyn ProgressSink, update: ProgressUpdate) {
    if let Err(e) = sink.report(update).await {
        debug!(error = %e, "progress sink rejected update");
    }
}
