//! Task and run results
//!
//! `TaskResults` is the shared task-result map: DashMap-backed so parallel
//! tasks write without a global lock. Keys are unique task ids.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::step_log::ExecutionStep;

/// Outcome of one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub agent_id: String,
    /// Raw model text (empty on failure)
    pub output: String,
    pub duration_ms: u64,
    #[serde(default)]
    pub usage_tokens: u32,
    /// Set when the task failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    /// Create a successful result
    pub fn success(
        task_id: impl Into<String>,
        agent_id: impl Into<String>,
        output: impl Into<String>,
        duration: Duration,
        usage_tokens: u32,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            output: output.into(),
            duration_ms: duration.as_millis() as u64,
            usage_tokens,
            error: None,
        }
    }

    /// Create a failed result
    pub fn failed(
        task_id: impl Into<String>,
        agent_id: impl Into<String>,
        error: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            output: String::new(),
            duration_ms: duration.as_millis() as u64,
            usage_tokens: 0,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Thread-safe task-result map (lock-free)
#[derive(Clone, Default, Debug)]
pub struct TaskResults {
    results: Arc<DashMap<String, TaskResult>>,
}

impl TaskResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task result (keyed by its task id)
    pub fn insert(&self, result: TaskResult) {
        self.results.insert(result.task_id.clone(), result);
    }

    pub fn get(&self, task_id: &str) -> Option<TaskResult> {
        self.results.get(task_id).map(|r| r.clone())
    }

    /// Output of a successfully completed task
    pub fn output(&self, task_id: &str) -> Option<String> {
        self.results
            .get(task_id)
            .filter(|r| r.is_success())
            .map(|r| r.output.clone())
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.results.contains_key(task_id)
    }

    pub fn is_success(&self, task_id: &str) -> bool {
        self.results
            .get(task_id)
            .map(|r| r.is_success())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Ordered copy for persistence and the final result
    pub fn snapshot(&self) -> BTreeMap<String, TaskResult> {
        self.results
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal value of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub run_id: String,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_duration_ms: u64,
    pub task_results: BTreeMap<String, TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_output: Option<String>,
    pub steps: Vec<ExecutionStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Sum of model tokens across all tasks
    pub fn total_tokens(&self) -> u64 {
        self.task_results
            .values()
            .map(|r| u64::from(r.usage_tokens))
            .sum()
    }
}
