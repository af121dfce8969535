//! 进度回调：ProgressSink trait 与内置实现
//!
//! Progress reporting.
//!
//! The orchestrator reports human-readable progress (provider attempts, retries,
//! fallbacks, tool rounds) to a [`ProgressSink`]. A failing sink never fails the
//! generation; its errors are logged and dropped.

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

fn timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// What a progress update is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    ProviderAttempt,
    Retry,
    Fallback,
    ToolRound,
    ToolExecution,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub kind: ProgressKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub timestamp: f64,
}

impl ProgressUpdate {
    pub fn new(kind: ProgressKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            metadata: None,
            timestamp: timestamp(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, update: ProgressUpdate) -> Result<()>;
}

/// Discards every update.
pub struct NoopProgressSink;

#[async_trait]
impl ProgressSink for NoopProgressSink {
    async fn report(&self, _: ProgressUpdate) -> Result<()> {
        Ok(())
    }
}

pub fn noop_sink() -> Arc<dyn ProgressSink> {
    Arc::new(NoopProgressSink)
}

/// Bounded in-memory sink; the oldest update is dropped once `max` is reached.
pub struct InMemoryProgressSink {
    updates: RwLock<VecDeque<ProgressUpdate>>,
    max_updates: usize,
}

impl InMemoryProgressSink {
    pub fn new(max: usize) -> Self {
        Self {
            updates: RwLock::new(VecDeque::new()),
            max_updates: max,
        }
    }

    pub fn updates(&self) -> Vec<ProgressUpdate> {
        self.updates
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.updates().into_iter().map(|u| u.message).collect()
    }

    pub fn of_kind(&self, kind: ProgressKind) -> Vec<ProgressUpdate> {
        self.updates().into_iter().filter(|u| u.kind == kind).collect()
    }

    pub fn len(&self) -> usize {
        self.updates.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ProgressSink for InMemoryProgressSink {
    async fn report(&self, update: ProgressUpdate) -> Result<()> {
        let mut updates = self.updates.write().unwrap_or_else(|e| e.into_inner());
        updates.push_back(update);
        while updates.len() > self.max_updates {
            updates.pop_front();
        }
        Ok(())
    }
}

/// Adapts a plain callback (`on_progress(message)`) into a sink.
pub struct FnProgressSink<F> {
    callback: F,
}

impl<F> FnProgressSink<F>
where
    F: Fn(&ProgressUpdate) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<F> ProgressSink for FnProgressSink<F>
where
    F: Fn(&ProgressUpdate) + Send + Sync,
{
    async fn report(&self, update: ProgressUpdate) -> Result<()> {
        (self.callback)(&update);
        Ok(())
    }
}

/// Forwards every update to each inner sink, stopping at the first error.
pub struct CompositeProgressSink {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl CompositeProgressSink {
    pub fn new(sinks: Vec<Arc<dyn ProgressSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl ProgressSink for CompositeProgressSink {
    async fn report(&self, update: ProgressUpdate) -> Result<()> {
        for sink in &self.sinks {
            sink.report(update.clone()).await?;
        }
        Ok(())
    }
}
