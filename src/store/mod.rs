//! Run Store - durable run records
//!
//! The controller creates a record (status `running`) before any task runs and
//! patches it once with the terminal state. Implementations are injected into
//! the controller; there is no global run registry.
//!
//! - [`InMemoryRunStore`]: DashMap-backed, for tests and embedding
//! - [`JsonFileRunStore`]: one pretty-printed `<run_id>.json` per run

mod json_file;
mod memory;

pub use json_file::JsonFileRunStore;
pub use memory::InMemoryRunStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::RunScope;
use crate::crew::{Crew, Inputs};
use crate::error::Result;
use crate::result::{ExecutionResult, RunStatus, TaskResult};
use crate::step_log::ExecutionStep;

/// Persisted record of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    /// Crew as it was when the run started
    pub crew: Crew,
    #[serde(default)]
    pub scope: RunScope,
    #[serde(default)]
    pub inputs: Inputs,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration_ms: Option<u64>,
    #[serde(default)]
    pub task_results: BTreeMap<String, TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_output: Option<String>,
    #[serde(default)]
    pub steps: Vec<ExecutionStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunRecord {
    /// Fresh record in `running` state
    pub fn new(run_id: &str, crew: &Crew, scope: &RunScope, inputs: &Inputs) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.to_string(),
            crew: crew.clone(),
            scope: scope.clone(),
            inputs: inputs.clone(),
            status: RunStatus::Running,
            created_at: now,
            updated_at: now,
            end_time: None,
            total_duration_ms: None,
            task_results: BTreeMap::new(),
            final_output: None,
            steps: Vec::new(),
            error: None,
        }
    }

    /// Apply the fields a patch carries
    pub fn apply(&mut self, patch: RunPatch) {
        self.status = patch.status;
        self.updated_at = Utc::now();
        if patch.end_time.is_some() {
            self.end_time = patch.end_time;
        }
        if patch.total_duration_ms.is_some() {
            self.total_duration_ms = patch.total_duration_ms;
        }
        if let Some(results) = patch.task_results {
            self.task_results = results;
        }
        if patch.final_output.is_some() {
            self.final_output = patch.final_output;
        }
        if let Some(steps) = patch.steps {
            self.steps = steps;
        }
        if patch.error.is_some() {
            self.error = patch.error;
        }
    }
}

/// Partial update of a run record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPatch {
    pub status: RunStatus,
    pub end_time: Option<DateTime<Utc>>,
    pub total_duration_ms: Option<u64>,
    pub task_results: Option<BTreeMap<String, TaskResult>>,
    pub final_output: Option<String>,
    pub steps: Option<Vec<ExecutionStep>>,
    pub error: Option<String>,
}

impl RunPatch {
    /// Status-only patch
    pub fn status(status: RunStatus) -> Self {
        Self {
            status,
            end_time: None,
            total_duration_ms: None,
            task_results: None,
            final_output: None,
            steps: None,
            error: None,
        }
    }

    /// Terminal patch carrying everything in `result`
    pub fn from_result(result: &ExecutionResult) -> Self {
        Self {
            status: result.status,
            end_time: Some(result.end_time),
            total_duration_ms: Some(result.total_duration_ms),
            task_results: Some(result.task_results.clone()),
            final_output: result.final_output.clone(),
            steps: Some(result.steps.clone()),
            error: result.error.clone(),
        }
    }
}

/// Durable run records
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Create the record in `running` state
    async fn create(&self, run_id: &str, crew: &Crew, scope: &RunScope, inputs: &Inputs) -> Result<()>;

    /// Patch an existing record
    async fn update(&self, run_id: &str, patch: RunPatch) -> Result<()>;

    /// Load a record, if present
    async fn get(&self, run_id: &str) -> Result<Option<RunRecord>>;
}
