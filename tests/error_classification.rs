//! Classification of raw provider failures.

use std::time::Duration;

use ai_research_runtime::{BackoffConfig, Error, ErrorClassifier, ErrorKind};

fn remote(status: u16, body: &str, code: Option<&str>) -> Error {
    Error::Remote {
        status,
        message: body.to_string(),
        provider_code: code.map(str::to_string),
        retry_after_ms: None,
    }
}

#[test]
fn taxonomy_by_provider_payload() {
    let classifier = ErrorClassifier::default();
    let cases = [
        (remote(429, "Too Many Requests", None), ErrorKind::RateLimit),
        (
            remote(429, r#"{"error":{"code":"insufficient_quota"}}"#, Some("insufficient_quota")),
            ErrorKind::QuotaExceeded,
        ),
        (remote(402, "Payment Required", None), ErrorKind::QuotaExceeded),
        (
            remote(529, r#"{"error":{"type":"overloaded_error"}}"#, Some("overloaded_error")),
            ErrorKind::RateLimit,
        ),
        (
            remote(
                429,
                r#"{"error":{"status":"RESOURCE_EXHAUSTED","message":"Quota exceeded for metric"}}"#,
                Some("RESOURCE_EXHAUSTED"),
            ),
            ErrorKind::QuotaExceeded,
        ),
        (
            remote(400, r#"{"error":{"message":"Your credit balance is too low"}}"#, None),
            ErrorKind::QuotaExceeded,
        ),
        (remote(500, "internal", None), ErrorKind::Unknown),
        (remote(401, "bad key", None), ErrorKind::Unknown),
        (Error::Timeout { after_ms: 100 }, ErrorKind::Timeout),
        (Error::Cancelled, ErrorKind::Cancelled),
        (Error::runtime("malformed payload"), ErrorKind::Unknown),
    ];
    for (err, expected) in cases {
        assert_eq!(classifier.classify(&err).kind, expected, "for {err}");
    }
}

#[test]
fn retryability_follows_kind() {
    let classifier = ErrorClassifier::default();
    assert!(classifier.classify(&remote(429, "slow", None)).retryable);
    assert!(classifier.classify(&Error::Timeout { after_ms: 1 }).retryable);
    assert!(!classifier.classify(&remote(402, "pay", None)).retryable);
    assert!(!classifier.classify(&remote(503, "down", None)).retryable);
}

#[test]
fn retry_after_wins_over_schedule_but_is_capped() {
    let classifier = ErrorClassifier::new(BackoffConfig {
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
    });
    let short = Error::Remote {
        status: 429,
        message: String::new(),
        provider_code: None,
        retry_after_ms: Some(300),
    };
    let long = Error::Remote {
        status: 429,
        message: String::new(),
        provider_code: None,
        retry_after_ms: Some(60_000),
    };
    assert_eq!(classifier.classify(&short).suggested_backoff, Duration::from_millis(300));
    assert_eq!(classifier.classify(&long).suggested_backoff, Duration::from_secs(1));

    let plain = classifier.classify(&remote(429, "", None));
    assert_eq!(classifier.delay(&plain, 0), Duration::from_millis(100));
    assert_eq!(classifier.delay(&plain, 2), Duration::from_millis(400));
    assert_eq!(classifier.delay(&plain, 10), Duration::from_secs(1));
}

#[test]
fn terminal_kinds_carry_remediation() {
    for kind in [ErrorKind::NoAvailableModels, ErrorKind::MaxFallbacksExceeded] {
        assert!(kind.terminal());
        assert!(kind.remediation().unwrap().contains("check configuration"));
    }
    assert_eq!(ErrorKind::RateLimit.remediation(), Some("wait and retry"));
    assert!(ErrorKind::Cancelled.terminal());
    assert!(!ErrorKind::ToolExecutionError.fallbackable());
}

#[test]
fn classification_is_pure() {
    let classifier = ErrorClassifier::default();
    let err = remote(429, "slow", Some("rate_limit_exceeded"));
    assert_eq!(classifier.classify(&err), classifier.classify(&err));
}
