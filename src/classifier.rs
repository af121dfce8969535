//! 错误分类器：将原始失败（HTTP 状态、厂商错误负载、超时）映射为类型化的错误分类。
//!
//! Error classification.
//!
//! [`ErrorClassifier::classify`] is a pure function from a raw [`Error`] to an
//! [`ErrorClassification`]. The classification carries everything the retry / fallback
//! policy needs: the kind, whether the same provider may be retried, and a suggested
//! backoff.
//!
//! Provider payloads are inspected conservatively: a 429 is treated as quota exhaustion
//! only when the body carries an explicit quota marker, otherwise it is a rate limit.

use serde::Serialize;
use std::time::Duration;

use crate::error_code::ErrorKind;
use crate::Error;

/// Body markers that turn a throttling response into quota exhaustion.
const QUOTA_MARKERS: &[&str] = &[
    "insufficient_quota",
    "quota_exceeded",
    "quota exceeded",
    "exceeded your current quota",
    "billing",
    "credit balance",
    "out of credits",
];

/// Provider error codes that mean throttling regardless of status.
const RATE_LIMIT_CODES: &[&str] = &["rate_limit_exceeded", "rate_limit_error", "overloaded_error"];

/// Backoff knobs used to compute suggested delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl BackoffConfig {
    /// No waiting between retries.
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }
}

/// Typed classification of a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorClassification {
    pub kind: ErrorKind,
    pub retryable: bool,
    /// Delay before the first retry (provider `retry-after` when given).
    pub suggested_backoff: Duration,
    pub message: String,
    pub remediation: Option<String>,
    /// HTTP status of the underlying response, when there was one.
    pub status: Option<u16>,
    /// The provider told us exactly how long to wait.
    pub retry_after: Option<Duration>,
}

impl ErrorClassification {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            retryable: kind.retryable(),
            suggested_backoff: Duration::ZERO,
            message: message.into(),
            remediation: kind.remediation().map(str::to_string),
            status: None,
            retry_after: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled by caller")
    }

    pub fn no_available_models() -> Self {
        Self::new(
            ErrorKind::NoAvailableModels,
            "no providers are configured or all configured providers are disabled",
        )
    }

    /// Every provider failed; `last` is the final provider's classification.
    pub fn max_fallbacks_exceeded(tried: usize, last: Option<&ErrorClassification>) -> Self {
        let message = match last {
            Some(l) => format!(
                "all {} providers failed; last error: {} ({})",
                tried, l.kind, l.message
            ),
            None => format!("all {} providers failed", tried),
        };
        Self::new(ErrorKind::MaxFallbacksExceeded, message)
    }

    pub fn tool_failure(tool: &str, message: impl AsRef<str>) -> Self {
        Self::new(
            ErrorKind::ToolExecutionError,
            format!("tool '{}' failed: {}", tool, message.as_ref()),
        )
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.terminal()
    }
}

/// Maps raw failures to [`ErrorClassification`]s. Cheap to clone, holds no state
/// beyond its backoff configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier {
    backoff: BackoffConfig,
}

impl ErrorClassifier {
    pub fn new(backoff: BackoffConfig) -> Self {
        Self { backoff }
    }

    pub fn backoff_config(&self) -> BackoffConfig {
        self.backoff
    }

    /// Classify a raw failure. Pure: no side effects, same input gives same output.
    pub fn classify(&self, err: &Error) -> ErrorClassification {
        let mut c = match err {
            Error::Remote {
                status,
                message,
                provider_code,
                retry_after_ms,
            } => {
                let mut c = ErrorClassification::new(
                    Self::kind_for_remote(*status, provider_code.as_deref(), message),
                    format!("HTTP {}: {}", status, truncate(message, 300)),
                )
                .with_status(*status);
                c.retry_after = retry_after_ms.map(Duration::from_millis);
                c
            }
            Error::Timeout { after_ms } => ErrorClassification::new(
                ErrorKind::Timeout,
                format!("provider attempt timed out after {}ms", after_ms),
            ),
            Error::Cancelled => ErrorClassification::cancelled(),
            Error::Generation { classification, .. } => classification.clone(),
            other => ErrorClassification::new(ErrorKind::Unknown, other.to_string()),
        };
        if c.retryable {
            c.suggested_backoff = self.delay(&c, 0);
        }
        c
    }

    /// Delay before retry number `attempt` (0-based). A provider `retry-after` wins over
    /// the exponential schedule; both are capped at `max_delay`.
    pub fn delay(&self, c: &ErrorClassification, attempt: u32) -> Duration {
        let chosen = match c.retry_after {
            Some(d) => d,
            None => {
                let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
                self.backoff.base_delay.saturating_mul(factor)
            }
        };
        chosen.min(self.backoff.max_delay)
    }

    fn kind_for_remote(status: u16, provider_code: Option<&str>, body: &str) -> ErrorKind {
        let lowered = body.to_lowercase();
        let code = provider_code.map(str::to_lowercase);
        let has_quota_marker = QUOTA_MARKERS.iter().any(|m| lowered.contains(m))
            || matches!(code.as_deref(), Some("insufficient_quota") | Some("quota_exceeded"));

        if status == 402 {
            return ErrorKind::QuotaExceeded;
        }
        if status == 429 || lowered.contains("resource_exhausted") {
            return if has_quota_marker {
                ErrorKind::QuotaExceeded
            } else {
                ErrorKind::RateLimit
            };
        }
        if status == 529 {
            return ErrorKind::RateLimit;
        }
        if let Some(code) = code.as_deref() {
            if RATE_LIMIT_CODES.contains(&code) {
                return ErrorKind::RateLimit;
            }
        }
        if has_quota_marker && (status == 400 || status == 403) {
            return ErrorKind::QuotaExceeded;
        }
        ErrorKind::Unknown
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(status: u16, body: &str, code: Option<&str>) -> Error {
        Error::Remote {
            status,
            message: body.to_string(),
            provider_code: code.map(str::to_string),
            retry_after_ms: None,
        }
    }

    #[test]
    fn plain_429_is_rate_limit() {
        let c = ErrorClassifier::default().classify(&remote(429, "slow down", None));
        assert_eq!(c.kind, ErrorKind::RateLimit);
        assert!(c.retryable);
        assert_eq!(c.suggested_backoff, Duration::from_millis(500));
    }

    #[test]
    fn openai_insufficient_quota_is_quota() {
        let body = r#"{"error":{"code":"insufficient_quota","message":"You exceeded your current quota"}}"#;
        let c = ErrorClassifier::default().classify(&remote(429, body, Some("insufficient_quota")));
        assert_eq!(c.kind, ErrorKind::QuotaExceeded);
        assert!(!c.retryable);
        assert_eq!(c.suggested_backoff, Duration::ZERO);
    }

    #[test]
    fn exponential_delay_is_capped() {
        let cls = ErrorClassifier::new(BackoffConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        });
        let c = cls.classify(&remote(429, "", None));
        assert_eq!(cls.delay(&c, 0), Duration::from_millis(100));
        assert_eq!(cls.delay(&c, 1), Duration::from_millis(200));
        assert_eq!(cls.delay(&c, 2), Duration::from_millis(350));
        assert_eq!(cls.delay(&c, 40), Duration::from_millis(350));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
    }
}
