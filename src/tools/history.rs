//! Append-only execution history shared across concurrent invocations.

use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use crate::error_code::ErrorKind;
use crate::types::tool::ToolResult;

/// One executed tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionHistoryEntry {
    /// Generation invocation that triggered the call.
    pub invocation_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub result: ToolResult,
    pub started_at: SystemTime,
    pub finished_at: SystemTime,
    pub success: bool,
    /// `TOOL_EXECUTION_ERROR`, or `CANCELLED` when the invocation was cancelled mid-call.
    pub error_kind: Option<ErrorKind>,
}

#[derive(Debug, Default)]
struct HistoryInner {
    entries: VecDeque<ExecutionHistoryEntry>,
    total_appended: u64,
}

/// Cloning shares the same underlying history.
///
/// With a capacity set, the oldest entries are evicted first. Entries are never
/// modified once appended, and a snapshot is always a prefix-consistent copy.
#[derive(Debug, Clone)]
pub struct ExecutionHistory {
    inner: Arc<RwLock<HistoryInner>>,
    capacity: Option<usize>,
}

impl Default for ExecutionHistory {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl ExecutionHistory {
    pub fn unbounded() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HistoryInner::default())),
            capacity: None,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::unbounded()
        }
    }

    pub fn new(capacity: Option<usize>) -> Self {
        match capacity {
            Some(c) => Self::with_capacity(c),
            None => Self::unbounded(),
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn append(&self, entry: ExecutionHistoryEntry) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.entries.push_back(entry);
        inner.total_appended += 1;
        if let Some(cap) = self.capacity {
            while inner.entries.len() > cap {
                inner.entries.pop_front();
            }
        }
    }

    /// Copy of the retained entries, oldest first.
    pub fn snapshot(&self) -> Vec<ExecutionHistoryEntry> {
        self.read(|inner| inner.entries.iter().cloned().collect())
    }

    /// Retained entries for one invocation, in execution order.
    pub fn for_invocation(&self, invocation_id: &str) -> Vec<ExecutionHistoryEntry> {
        self.read(|inner| {
            inner
                .entries
                .iter()
                .filter(|e| e.invocation_id == invocation_id)
                .cloned()
                .collect()
        })
    }

    pub fn len(&self) -> usize {
        self.read(|inner| inner.entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries ever appended, including evicted ones.
    pub fn total_appended(&self) -> u64 {
        self.read(|inner| inner.total_appended)
    }

    fn read<T>(&self, f: impl FnOnce(&HistoryInner) -> T) -> T {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        f(&inner)
    }
}
