//! 工具调用：注册表、执行服务与执行历史
//!
//! Tool execution.
//!
//! - [`ToolRegistry`]: name → executor map plus the catalog advertised to models.
//! - [`FunctionExecutionService`]: runs one [`ToolCall`](crate::types::ToolCall), validating
//!   arguments against the tool's JSON Schema, and turns every failure into an error
//!   [`ToolResult`](crate::types::ToolResult) the model can read.
//! - [`ExecutionHistory`]: append-only, bounded, shared record of every execution.

pub mod history;
pub mod registry;
pub mod service;

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;

use crate::Result;

pub use history::{ExecutionHistory, ExecutionHistoryEntry};
pub use registry::ToolRegistry;
pub use service::FunctionExecutionService;

/// Executes one tool with already-validated arguments.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, arguments: Value) -> Result<Value>;
}

/// Wraps an async closure as a [`ToolExecutor`].
///
/// ```
/// use ai_research_runtime::tools::FnTool;
/// use serde_json::json;
///
/// let tool = FnTool::new(|args: serde_json::Value| async move {
///     Ok::<_, ai_research_runtime::Error>(json!({ "echo": args }))
/// });
/// # let _ = tool;
/// ```
pub struct FnTool<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnTool<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> ToolExecutor for FnTool<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn execute(&self, arguments: Value) -> Result<Value> {
        (self.f)(arguments).await
    }
}
