//! Generation request and its caller-chosen knobs.

use crate::error::ErrorContext;
use crate::types::tool::ToolDefinition;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Caller-chosen tier controlling token budget and reasoning depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffortLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl EffortLevel {
    /// Output token budget sent to the provider.
    pub fn max_output_tokens(self) -> u32 {
        match self {
            EffortLevel::Low => 1024,
            EffortLevel::Medium => 4096,
            EffortLevel::High => 8192,
        }
    }

    /// Reasoning ("thinking") token budget, for backends that support one.
    pub fn reasoning_budget(self) -> Option<u32> {
        match self {
            EffortLevel::High => Some(4096),
            EffortLevel::Low | EffortLevel::Medium => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EffortLevel::Low => "low",
            EffortLevel::Medium => "medium",
            EffortLevel::High => "high",
        }
    }
}

impl fmt::Display for EffortLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EffortLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(EffortLevel::Low),
            "medium" => Ok(EffortLevel::Medium),
            "high" => Ok(EffortLevel::High),
            other => Err(Error::validation_with_context(
                format!("unknown effort level '{}'", other),
                ErrorContext::new()
                    .with_field_path("effort")
                    .with_details("expected low, medium or high"),
            )),
        }
    }
}

/// Opaque paradigm label plus probability distribution from the upstream classifier.
///
/// The orchestrator never interprets it; it is echoed into results and stream summaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParadigmContext {
    pub paradigm: String,
    #[serde(default)]
    pub probabilities: BTreeMap<String, f64>,
}

impl ParadigmContext {
    pub fn new(paradigm: impl Into<String>) -> Self {
        Self {
            paradigm: paradigm.into(),
            probabilities: BTreeMap::new(),
        }
    }

    pub fn with_probability(mut self, category: impl Into<String>, p: f64) -> Self {
        self.probabilities.insert(category.into(), p);
        self
    }

    pub fn with_probabilities(mut self, probabilities: BTreeMap<String, f64>) -> Self {
        self.probabilities = probabilities;
        self
    }
}

/// Immutable generation request.
///
/// Built with the `with_*` constructors; there are no setters once it is handed to the
/// orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    prompt: String,
    system_prompt: Option<String>,
    model: Option<String>,
    effort: EffortLevel,
    tools: Vec<ToolDefinition>,
    paradigm: Option<ParadigmContext>,
    max_iterations: Option<u32>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            model: None,
            effort: EffortLevel::default(),
            tools: Vec::new(),
            paradigm: None,
            max_iterations: None,
        }
    }

    pub fn with_system_prompt(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    /// Target model. `provider/model` pins the model to one provider; a bare model id
    /// applies to the primary provider only.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_effort(mut self, effort: EffortLevel) -> Self {
        self.effort = effort;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_paradigm(mut self, paradigm: ParadigmContext) -> Self {
        self.paradigm = Some(paradigm);
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = Some(max);
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn effort(&self) -> EffortLevel {
        self.effort
    }

    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn paradigm(&self) -> Option<&ParadigmContext> {
        self.paradigm.as_ref()
    }

    pub fn max_iterations(&self) -> Option<u32> {
        self.max_iterations
    }

    /// Pre-flight checks run before any provider is contacted.
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(Error::validation_with_context(
                "prompt must not be empty",
                ErrorContext::new()
                    .with_field_path("request.prompt")
                    .with_source("request_validator"),
            ));
        }
        if self.max_iterations == Some(0) {
            return Err(Error::validation_with_context(
                "max_iterations must be at least 1",
                ErrorContext::new()
                    .with_field_path("request.max_iterations")
                    .with_source("request_validator"),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effort_parses_case_insensitively() {
        assert_eq!("HIGH".parse::<EffortLevel>().unwrap(), EffortLevel::High);
        assert!("extreme".parse::<EffortLevel>().is_err());
    }

    #[test]
    fn zero_iterations_rejected() {
        let req = GenerationRequest::new("q").with_max_iterations(0);
        assert!(matches!(req.validate(), Err(Error::Validation { .. })));
    }

    #[test]
    fn blank_prompt_rejected() {
        assert!(GenerationRequest::new("   ").validate().is_err());
        assert!(GenerationRequest::new("q").validate().is_ok());
    }
}
