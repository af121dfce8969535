//! 错误类别：定义编排层的错误种类及其重试/回退语义。
//!
//! Orchestration error kinds.
//!
//! Every failure observed by the orchestrator is reduced to one of these kinds. The kind
//! alone fixes the recovery policy:
//!
//! | Kind | Code | Retry same provider | Fall back | Terminal |
//! |------|------|---------------------|-----------|----------|
//! | `RATE_LIMIT` | E2001 | yes (bounded) | after budget | no |
//! | `QUOTA_EXCEEDED` | E2002 | no | yes | no |
//! | `TIMEOUT` | E3003 | yes (bounded) | after budget | no |
//! | `TOOL_EXECUTION_ERROR` | E4101 | n/a (loop-local) | no | no |
//! | `CANCELLED` | E4002 | no | no | yes |
//! | `NO_AVAILABLE_MODELS` | E5001 | no | no | yes |
//! | `MAX_FALLBACKS_EXCEEDED` | E5002 | no | no | yes |
//! | `UNKNOWN` | E9999 | no | yes | no |
//!
//! ## Example
//!
//! ```rust
//! use ai_research_runtime::error_code::ErrorKind;
//!
//! assert_eq!(ErrorKind::RateLimit.code(), "E2001");
//! assert!(ErrorKind::RateLimit.retryable());
//! assert!(ErrorKind::QuotaExceeded.fallbackable());
//! assert!(ErrorKind::Cancelled.terminal());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed error kind used by the classifier and the retry / fallback policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Provider signalled throttling (HTTP 429, overloaded).
    RateLimit,
    /// Account or plan quota exhausted on the provider.
    QuotaExceeded,
    /// Provider list empty or every provider disabled.
    NoAvailableModels,
    /// Every provider in the priority list was tried and failed.
    MaxFallbacksExceeded,
    /// A tool executor failed; recovered inside the tool loop.
    ToolExecutionError,
    /// The invocation was cancelled by the caller.
    Cancelled,
    /// A single provider attempt exceeded its timeout.
    Timeout,
    /// Unrecognized failure shape.
    Unknown,
}

impl ErrorKind {
    /// Returns the canonical code string (e.g., `"E2001"`).
    #[inline]
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimit => "E2001",
            Self::QuotaExceeded => "E2002",
            Self::Timeout => "E3003",
            Self::Cancelled => "E4002",
            Self::ToolExecutionError => "E4101",
            Self::NoAvailableModels => "E5001",
            Self::MaxFallbacksExceeded => "E5002",
            Self::Unknown => "E9999",
        }
    }

    /// Returns the upper-case name used in logs and serialized payloads.
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::RateLimit => "RATE_LIMIT",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::NoAvailableModels => "NO_AVAILABLE_MODELS",
            Self::MaxFallbacksExceeded => "MAX_FALLBACKS_EXCEEDED",
            Self::ToolExecutionError => "TOOL_EXECUTION_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::Timeout => "TIMEOUT",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Whether the same provider may be retried after a backoff.
    #[inline]
    pub fn retryable(&self) -> bool {
        matches!(self, Self::RateLimit | Self::Timeout)
    }

    /// Whether the failure should advance the fallback chain (once retries are spent).
    #[inline]
    pub fn fallbackable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::QuotaExceeded | Self::Timeout | Self::Unknown
        )
    }

    /// Whether the failure ends the whole invocation.
    #[inline]
    pub fn terminal(&self) -> bool {
        matches!(
            self,
            Self::NoAvailableModels | Self::MaxFallbacksExceeded | Self::Cancelled
        )
    }

    /// Suggested remediation shown to end users, where one applies.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Self::RateLimit | Self::Timeout => Some("wait and retry"),
            Self::QuotaExceeded => Some("check the provider plan or billing settings"),
            Self::NoAvailableModels => Some("check configuration: enable at least one provider"),
            Self::MaxFallbacksExceeded => {
                Some("wait and retry, or check configuration of the fallback providers")
            }
            Self::ToolExecutionError | Self::Cancelled | Self::Unknown => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_kinds_never_fall_back() {
        for kind in [
            ErrorKind::NoAvailableModels,
            ErrorKind::MaxFallbacksExceeded,
            ErrorKind::Cancelled,
        ] {
            assert!(kind.terminal());
            assert!(!kind.fallbackable());
            assert!(!kind.retryable());
        }
    }

    #[test]
    fn serializes_as_screaming_snake_case() {
        let v = serde_json::to_value(ErrorKind::MaxFallbacksExceeded).unwrap();
        assert_eq!(v, serde_json::json!("MAX_FALLBACKS_EXCEEDED"));
    }
}
