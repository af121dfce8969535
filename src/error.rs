use crate::classifier::ErrorClassification;
use crate::transport::TransportError;
use crate::types::attempt::ProviderAttempt;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "providers[1].model")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "config_loader", "openai_driver")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the research runtime.
///
/// Low-level failures (HTTP status, transport, timeouts) stay distinguishable so the
/// classifier can map them; orchestration-level terminal failures surface as
/// [`Error::Generation`] carrying the classification and the attempt ledger.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("Network transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Remote error: HTTP {status}: {message}")]
    Remote {
        status: u16,
        message: String,
        provider_code: Option<String>,
        retry_after_ms: Option<u64>,
    },

    #[error("Attempt timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{}", format_generation(.classification))]
    Generation {
        classification: ErrorClassification,
        attempts: Vec<ProviderAttempt>,
    },
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

fn format_generation(c: &ErrorClassification) -> String {
    match &c.remediation {
        Some(hint) => format!("{} [{}]: {} ({})", c.kind, c.kind.code(), c.message, hint),
        None => format!("{} [{}]: {}", c.kind, c.kind.code(), c.message),
    }
}

impl Error {
    pub fn runtime(msg: impl Into<String>) -> Self {
        Error::Runtime {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Terminal orchestration failure.
    pub fn generation(classification: ErrorClassification, attempts: Vec<ProviderAttempt>) -> Self {
        Error::Generation {
            classification,
            attempts,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. }
            | Error::Validation { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Classification of a terminal orchestration failure, if this is one.
    pub fn classification(&self) -> Option<&ErrorClassification> {
        match self {
            Error::Generation { classification, .. } => Some(classification),
            _ => None,
        }
    }

    /// Attempt ledger attached to a terminal orchestration failure.
    pub fn attempts(&self) -> &[ProviderAttempt] {
        match self {
            Error::Generation { attempts, .. } => attempts,
            _ => &[],
        }
    }
}
