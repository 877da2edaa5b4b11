//! Per-run execution context
//!
//! Created at run start and cloned (cheaply, all `Arc`) into every task the
//! scheduler spawns. Only the scheduler and task executor mutate it.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::crew::Inputs;
use crate::error::{CrewError, Result};
use crate::result::TaskResults;
use crate::step_log::StepLog;

/// Workspace/user scoping identifiers passed through to tools and the run store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl RunScope {
    pub fn new(workspace_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            workspace_id: Some(workspace_id.into()),
            user_id: Some(user_id.into()),
        }
    }
}

/// Per-agent memory extension point
///
/// Reserved for multi-turn reasoning; the executor only appends task outputs.
pub trait AgentMemory: Send + Sync {
    fn append(&self, agent_id: &str, entry: &str);
    fn entries(&self, agent_id: &str) -> Vec<String>;
}

/// Append-only list per agent
#[derive(Debug, Default)]
pub struct AppendOnlyMemory {
    entries: RwLock<std::collections::HashMap<String, Vec<String>>>,
}

impl AgentMemory for AppendOnlyMemory {
    fn append(&self, agent_id: &str, entry: &str) {
        self.entries
            .write()
            .entry(agent_id.to_string())
            .or_default()
            .push(entry.to_string());
    }

    fn entries(&self, agent_id: &str) -> Vec<String> {
        self.entries
            .read()
            .get(agent_id)
            .cloned()
            .unwrap_or_default()
    }
}

/// Task lifecycle within one run (each transition happens at most once)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Done,
}

/// Everything a run shares between scheduler and executor
#[derive(Clone)]
pub struct ExecutionContext {
    run_id: Arc<str>,
    scope: Arc<RunScope>,
    inputs: Arc<Inputs>,
    results: TaskResults,
    memory: Arc<dyn AgentMemory>,
    states: Arc<DashMap<String, TaskState>>,
    steps: StepLog,
    cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(run_id: &str, scope: RunScope, inputs: Inputs, steps: StepLog) -> Self {
        Self {
            run_id: Arc::from(run_id),
            scope: Arc::new(scope),
            inputs: Arc::new(inputs),
            results: TaskResults::new(),
            memory: Arc::new(AppendOnlyMemory::default()),
            states: Arc::new(DashMap::new()),
            steps,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn AgentMemory>) -> Self {
        self.memory = memory;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn scope(&self) -> &RunScope {
        &self.scope
    }

    pub fn inputs(&self) -> &Inputs {
        &self.inputs
    }

    pub fn results(&self) -> &TaskResults {
        &self.results
    }

    pub fn memory(&self) -> &dyn AgentMemory {
        self.memory.as_ref()
    }

    pub fn steps(&self) -> &StepLog {
        &self.steps
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail with `Cancelled` if the run was cancelled
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(CrewError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// not-started -> running; a second start of the same task is an error
    pub fn mark_running(&self, task_id: &str) -> Result<()> {
        match self.states.entry(task_id.to_string()) {
            Entry::Vacant(e) => {
                e.insert(TaskState::Running);
                Ok(())
            }
            Entry::Occupied(_) => Err(CrewError::TaskReentered {
                task_id: task_id.to_string(),
            }),
        }
    }

    /// running -> done
    pub fn mark_done(&self, task_id: &str) {
        self.states.insert(task_id.to_string(), TaskState::Done);
    }

    pub fn task_state(&self, task_id: &str) -> Option<TaskState> {
        self.states.get(task_id).map(|s| *s)
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("run_id", &self.run_id)
            .field("results", &self.results.len())
            .field("steps", &self.steps.len())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
