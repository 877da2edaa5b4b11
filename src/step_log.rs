//! Step log: the user-visible trace of a run
//!
//! - ExecutionStep: immutable entry with sequence id + timestamps
//! - StepType: 8 kinds (task lifecycle, agent, tool, delegation, error)
//! - StepLog: thread-safe, append-only, optionally mirrored to a stream
//!
//! Sequence ids are assigned under the write lock, so the stored order, the
//! ids and the streamed order always agree.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::crew::Agent;

/// Kind of step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    TaskStart,
    AgentThinking,
    ToolCall,
    ToolResult,
    AgentResponse,
    TaskComplete,
    Delegation,
    Error,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::TaskStart => "task_start",
            StepType::AgentThinking => "agent_thinking",
            StepType::ToolCall => "tool_call",
            StepType::ToolResult => "tool_result",
            StepType::AgentResponse => "agent_response",
            StepType::TaskComplete => "task_complete",
            StepType::Delegation => "delegation",
            StepType::Error => "error",
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single entry in the step log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    /// Monotonic sequence id (emission order)
    pub id: u64,
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Human-readable summary
    pub content: String,
    /// Wall-clock time of emission
    pub timestamp: DateTime<Utc>,
    /// Time since the run started (ms)
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Thread-safe, append-only step log
#[derive(Clone)]
pub struct StepLog {
    steps: Arc<RwLock<Vec<ExecutionStep>>>,
    start_time: Instant,
    sink: Option<UnboundedSender<ExecutionStep>>,
}

impl StepLog {
    /// Create a new log (call at run start)
    pub fn new() -> Self {
        Self {
            steps: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            sink: None,
        }
    }

    /// Create a log that also forwards every step to `sink` as it is written
    pub fn with_sink(sink: UnboundedSender<ExecutionStep>) -> Self {
        Self {
            sink: Some(sink),
            ..Self::new()
        }
    }

    /// Start building a step; nothing is written until [`StepBuilder::emit`]
    pub fn step(&self, step_type: StepType, content: impl Into<String>) -> StepBuilder<'_> {
        StepBuilder {
            log: self,
            step_type,
            content: content.into(),
            task_id: None,
            agent_id: None,
            agent_name: None,
            tool_name: None,
            duration: None,
            metadata: None,
        }
    }

    fn append(&self, builder: StepBuilder<'_>) -> u64 {
        let mut steps = self.steps.write();
        let id = steps.len() as u64;
        let step = ExecutionStep {
            id,
            step_type: builder.step_type,
            task_id: builder.task_id,
            agent_id: builder.agent_id,
            agent_name: builder.agent_name,
            tool_name: builder.tool_name,
            content: builder.content,
            timestamp: Utc::now(),
            elapsed_ms: self.start_time.elapsed().as_millis() as u64,
            duration_ms: builder.duration.map(|d| d.as_millis() as u64),
            metadata: builder.metadata,
        };

        if let Some(sink) = &self.sink {
            // A dropped receiver only means nobody is watching live
            let _ = sink.send(step.clone());
        }
        steps.push(step);
        id
    }

    /// Get all steps (cloned)
    pub fn steps(&self) -> Vec<ExecutionStep> {
        self.steps.read().clone()
    }

    /// Zero-copy access to steps via callback
    ///
    /// Holds the read lock for the duration of the callback.
    pub fn with_steps<T>(&self, f: impl FnOnce(&[ExecutionStep]) -> T) -> T {
        f(&self.steps.read())
    }

    /// Steps belonging to one task, in emission order
    pub fn filter_task(&self, task_id: &str) -> Vec<ExecutionStep> {
        self.with_steps(|steps| {
            steps
                .iter()
                .filter(|s| s.task_id.as_deref() == Some(task_id))
                .cloned()
                .collect()
        })
    }

    /// Steps of one type, in emission order
    pub fn filter_type(&self, step_type: StepType) -> Vec<ExecutionStep> {
        self.with_steps(|steps| {
            steps
                .iter()
                .filter(|s| s.step_type == step_type)
                .cloned()
                .collect()
        })
    }

    /// Serialize to JSON for persistence/debugging
    pub fn to_json(&self) -> Value {
        self.with_steps(|steps| serde_json::to_value(steps).unwrap_or(Value::Null))
    }

    pub fn len(&self) -> usize {
        self.steps.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StepLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StepLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepLog")
            .field("len", &self.len())
            .field("streaming", &self.sink.is_some())
            .finish()
    }
}

/// Fluent builder for a single step
#[must_use = "a step is only recorded once emit() is called"]
pub struct StepBuilder<'a> {
    log: &'a StepLog,
    step_type: StepType,
    content: String,
    task_id: Option<String>,
    agent_id: Option<String>,
    agent_name: Option<String>,
    tool_name: Option<String>,
    duration: Option<Duration>,
    metadata: Option<Value>,
}

impl StepBuilder<'_> {
    pub fn task(mut self, task_id: &str) -> Self {
        self.task_id = Some(task_id.to_string());
        self
    }

    /// Attribute the step to an agent (id + display name)
    pub fn agent(mut self, agent: &Agent) -> Self {
        self.agent_id = Some(agent.id.clone());
        self.agent_name = Some(agent.name.clone());
        self
    }

    pub fn tool(mut self, tool_name: &str) -> Self {
        self.tool_name = Some(tool_name.to_string());
        self
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Append the step and return its sequence id
    pub fn emit(self) -> u64 {
        let log = self.log;
        log.append(self)
    }
}
