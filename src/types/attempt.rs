//! Per-invocation attempt ledger.

use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use crate::classifier::ErrorClassification;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AttemptOutcome {
    Success,
    Failed(ErrorClassification),
}

/// One try against one provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderAttempt {
    pub provider: String,
    /// 1-based attempt number on this provider.
    pub attempt: u32,
    pub started_at: SystemTime,
    pub outcome: AttemptOutcome,
    pub latency: Duration,
}

impl ProviderAttempt {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Success)
    }

    pub fn classification(&self) -> Option<&ErrorClassification> {
        match &self.outcome {
            AttemptOutcome::Failed(c) => Some(c),
            AttemptOutcome::Success => None,
        }
    }
}

/// Append-only list of attempts for a single invocation. Never persisted.
///
/// Recording takes `&self` so the fallback loop, the retry runner and the tool loop
/// can share one ledger while attempts run strictly one after another.
#[derive(Debug, Default)]
pub struct AttemptLedger {
    attempts: Mutex<Vec<ProviderAttempt>>,
}

impl AttemptLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, attempt: ProviderAttempt) {
        self.attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(attempt);
    }

    /// Copy of the attempts so far, in order.
    pub fn attempts(&self) -> Vec<ProviderAttempt> {
        self.attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distinct providers in first-tried order.
    pub fn providers_tried(&self) -> Vec<String> {
        let attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<String> = Vec::new();
        for a in attempts.iter() {
            if !out.contains(&a.provider) {
                out.push(a.provider.clone());
            }
        }
        out
    }

    pub fn into_attempts(self) -> Vec<ProviderAttempt> {
        self.attempts.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}
