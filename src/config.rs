//! 编排器配置：提供者优先级列表、重试预算、超时与退避参数
//!
//! Orchestrator configuration.
//!
//! Loaded from YAML or JSON. Field defaults match what an unconfigured orchestrator
//! uses, so a minimal file only lists providers:
//!
//! ```yaml
//! providers:
//!   - id: openai
//!     kind: openai
//!     model: gpt-4o-mini
//!     api_key: sk-...
//!   - id: claude
//!     kind: anthropic
//!     model: claude-sonnet-4-5
//!     retry_budget: 1
//! max_tool_iterations: 5
//! attempt_timeout_ms: 60000
//! ```
//!
//! Credentials are plain values here; resolving them from the environment belongs to
//! the caller.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::classifier::BackoffConfig;
use crate::error::ErrorContext;
use crate::provider::ProviderKind;
use crate::{Error, Result};

pub const DEFAULT_RETRY_BUDGET: u32 = 2;
pub const DEFAULT_MAX_TOOL_ITERATIONS: u32 = 5;
pub const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

fn default_retry_budget() -> u32 {
    DEFAULT_RETRY_BUDGET
}

fn default_max_tool_iterations() -> u32 {
    DEFAULT_MAX_TOOL_ITERATIONS
}

fn default_attempt_timeout_ms() -> u64 {
    DEFAULT_ATTEMPT_TIMEOUT_MS
}

fn default_history_capacity() -> Option<usize> {
    Some(DEFAULT_HISTORY_CAPACITY)
}

fn default_true() -> bool {
    true
}

/// One entry of the provider priority list.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Identifier used for `provider/model` pinning, logs and ledgers.
    pub id: String,
    pub kind: ProviderKind,
    /// Default model for this provider.
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Overrides the driver's default endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Extra attempts after a retryable failure; falls back to the global default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_budget: Option<u32>,
    /// Overrides tool support (defaults to true for every kind).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_tools: Option<bool>,
    /// Extra headers sent with every request (e.g. OpenRouter attribution headers).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>, kind: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            model: model.into(),
            api_key: None,
            base_url: None,
            enabled: true,
            retry_budget: None,
            supports_tools: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = Some(budget);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("enabled", &self.enabled)
            .field("retry_budget", &self.retry_budget)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffSettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Priority order; the first enabled provider is the primary.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default = "default_retry_budget")]
    pub default_retry_budget: u32,
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,
    /// Per-attempt timeout; 0 disables it.
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    #[serde(default)]
    pub backoff: BackoffSettings,
    /// Execution history capacity; `null` keeps everything.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: Option<usize>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            default_retry_budget: DEFAULT_RETRY_BUDGET,
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
            attempt_timeout_ms: DEFAULT_ATTEMPT_TIMEOUT_MS,
            backoff: BackoffSettings::default(),
            history_capacity: default_history_capacity(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; `.json` is parsed as JSON, anything else as YAML.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let result = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&raw),
            _ => Self::from_yaml_str(&raw),
        };
        result.map_err(|e| match e {
            Error::Configuration { message, context } => Error::Configuration {
                message,
                context: context.with_source(path.display().to_string()),
            },
            other => other,
        })
    }

    pub fn with_provider(mut self, provider: ProviderConfig) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (i, p) in self.providers.iter().enumerate() {
            if p.id.trim().is_empty() {
                return Err(invalid(format!("providers[{i}].id"), "provider id must not be empty"));
            }
            if !seen.insert(p.id.as_str()) {
                return Err(invalid(
                    format!("providers[{i}].id"),
                    format!("duplicate provider id '{}'", p.id),
                ));
            }
            if p.model.trim().is_empty() {
                return Err(invalid(
                    format!("providers[{i}].model"),
                    format!("provider '{}' has no model", p.id),
                ));
            }
            if let Some(url) = &p.base_url {
                if let Err(e) = Url::parse(url) {
                    return Err(invalid(
                        format!("providers[{i}].base_url"),
                        format!("invalid base_url '{}': {}", url, e),
                    ));
                }
            }
        }
        if self.max_tool_iterations == 0 {
            return Err(invalid(
                "max_tool_iterations".to_string(),
                "max_tool_iterations must be at least 1",
            ));
        }
        if self.backoff.base_delay_ms > self.backoff.max_delay_ms {
            return Err(invalid(
                "backoff".to_string(),
                "base_delay_ms must not exceed max_delay_ms",
            ));
        }
        Ok(())
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        (self.attempt_timeout_ms > 0).then(|| Duration::from_millis(self.attempt_timeout_ms))
    }

    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            base_delay: Duration::from_millis(self.backoff.base_delay_ms),
            max_delay: Duration::from_millis(self.backoff.max_delay_ms),
        }
    }
}

fn invalid(field: String, message: impl Into<String>) -> Error {
    Error::configuration_with_context(message, ErrorContext::new().with_field_path(field))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_defaults() {
        let config = OrchestratorConfig::from_yaml_str(
            r#"
providers:
  - id: a
    kind: openai
    model: gpt-4o-mini
  - id: b
    kind: mock
    model: scripted
    enabled: false
"#,
        )
        .unwrap();
        assert_eq!(config.providers.len(), 2);
        assert!(!config.providers[1].enabled);
        assert_eq!(config.default_retry_budget, 2);
        assert_eq!(config.max_tool_iterations, 5);
        assert_eq!(config.attempt_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.backoff(), BackoffConfig::default());
        assert_eq!(config.history_capacity, Some(1000));
    }

    #[test]
    fn json_is_accepted() {
        let config = OrchestratorConfig::from_json_str(
            r#"{"providers":[{"id":"g","kind":"gemini","model":"gemini-2.5-flash"}],"attempt_timeout_ms":0}"#,
        )
        .unwrap();
        assert_eq!(config.providers[0].kind, ProviderKind::Gemini);
        assert_eq!(config.attempt_timeout(), None);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let config = OrchestratorConfig::default()
            .with_provider(ProviderConfig::new("a", ProviderKind::Mock, "m"))
            .with_provider(ProviderConfig::new("a", ProviderKind::Mock, "m"));
        match config.validate() {
            Err(Error::Configuration { context, .. }) => {
                assert_eq!(context.field_path.as_deref(), Some("providers[1].id"));
            }
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn bad_base_url_and_zero_iterations() {
        let bad_url = OrchestratorConfig::default().with_provider(
            ProviderConfig::new("a", ProviderKind::OpenAi, "m").with_base_url("not a url"),
        );
        assert!(bad_url.validate().is_err());

        let zero = OrchestratorConfig {
            max_tool_iterations: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn debug_redacts_key() {
        let p = ProviderConfig::new("a", ProviderKind::OpenAi, "m").with_api_key("sk-secret");
        assert!(!format!("{p:?}").contains("sk-secret"));
    }
}
