use std::time::Duration;

use crate::classifier::{ErrorClassification, ErrorClassifier};

/// How to proceed after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    Retry { delay: Duration },
    Fallback,
    Fail,
}

/// Retry / fallback policy. Deterministic: depends only on the classification and the
/// retries already spent on the current provider.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PolicyEngine {
    classifier: ErrorClassifier,
}

impl PolicyEngine {
    pub fn new(classifier: ErrorClassifier) -> Self {
        Self { classifier }
    }

    /// `retries_used` counts retries already made on this provider (0 after the first
    /// failure); `budget` is the number of extra attempts allowed.
    pub fn decide(&self, c: &ErrorClassification, retries_used: u32, budget: u32) -> Decision {
        if c.is_terminal() {
            return Decision::Fail;
        }
        if c.retryable && retries_used < budget {
            return Decision::Retry {
                delay: self.classifier.delay(c, retries_used),
            };
        }
        if c.kind.fallbackable() {
            Decision::Fallback
        } else {
            Decision::Fail
        }
    }
}
