//! Crew definition: agents, tasks and the scheduling policy
//!
//! Parsed from YAML, validated once, then shared read-only (`Arc`) for the
//! lifetime of a run.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{CrewError, Result};

/// Run-scoped input values used for `{placeholder}` interpolation
pub type Inputs = BTreeMap<String, Value>;

/// Default bound on tool-use iterations per task
pub const DEFAULT_MAX_ITERATIONS: u32 = 25;

/// Default sampling temperature when neither agent nor engine config sets one
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Scheduling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Process {
    /// Declaration order, fail-fast
    #[default]
    Sequential,
    /// Level-by-level fan-out with a barrier between levels
    Parallel,
    /// Sequential, with the first agent acting as delegating manager
    Hierarchical,
}

impl Process {
    pub fn as_str(&self) -> &'static str {
        match self {
            Process::Sequential => "sequential",
            Process::Parallel => "parallel",
            Process::Hierarchical => "hierarchical",
        }
    }
}

impl std::fmt::Display for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Process {
    type Err = CrewError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(Process::Sequential),
            "parallel" => Ok(Process::Parallel),
            "hierarchical" => Ok(Process::Hierarchical),
            other => Err(CrewError::EngineConfig {
                reason: format!(
                    "unknown process '{}' (expected sequential, parallel, hierarchical)",
                    other
                ),
            }),
        }
    }
}

/// Model selection for an agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model id; empty means "use the engine default"
    #[serde(default)]
    pub model: String,
    /// Unset means the engine's `[defaults]` temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

/// A named persona driving every task assigned to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub role: String,
    pub goal: String,
    #[serde(default)]
    pub backstory: String,
    /// Tool names this agent may invoke
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

impl Agent {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        role: impl Into<String>,
        goal: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: role.into(),
            goal: goal.into(),
            backstory: String::new(),
            tools: Vec::new(),
            model: ModelConfig::default(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_backstory(mut self, backstory: impl Into<String>) -> Self {
        self.backstory = backstory.into();
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>, temperature: f32) -> Self {
        self.model.model = model.into();
        self.model.temperature = Some(temperature);
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }
}

/// A unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Template text, may contain `{placeholder}` tokens
    pub description: String,
    #[serde(default)]
    pub expected_output: String,
    /// Assigned agent id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Ordered upstream task ids
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Task {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            description: description.into(),
            expected_output: String::new(),
            agent: None,
            depends_on: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_expected_output(mut self, expected: impl Into<String>) -> Self {
        self.expected_output = expected.into();
        self
    }

    pub fn assigned_to(mut self, agent_id: impl Into<String>) -> Self {
        self.agent = Some(agent_id.into());
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Display label: name if present, else id
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// The run-time unit: agents + tasks + policy + default inputs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Crew {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub process: Process,
    #[serde(default)]
    pub inputs: Inputs,
    pub agents: Vec<Arc<Agent>>,
    pub tasks: Vec<Arc<Task>>,
}

impl Crew {
    pub fn new(name: impl Into<String>, process: Process) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            process,
            inputs: Inputs::new(),
            agents: Vec::new(),
            tasks: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_agent(mut self, agent: Agent) -> Self {
        self.agents.push(Arc::new(agent));
        self
    }

    pub fn with_task(mut self, task: Task) -> Self {
        self.tasks.push(Arc::new(task));
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    /// Parse a crew definition from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read and parse a crew definition file
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let yaml = tokio::fs::read_to_string(path).await?;
        Self::from_yaml(&yaml)
    }

    /// Look up an agent by id
    pub fn agent(&self, id: &str) -> Option<&Arc<Agent>> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// The implicit manager of a hierarchical crew (first declared agent)
    pub fn manager(&self) -> Option<&Arc<Agent>> {
        self.agents.first()
    }

    /// Resolve the agent that runs `task` under a non-delegating policy
    pub fn assigned_agent(&self, task: &Task) -> Result<&Arc<Agent>> {
        let agent_id = task.agent.as_deref().ok_or_else(|| CrewError::MissingAgent {
            task_id: task.id.clone(),
        })?;
        self.agent(agent_id).ok_or_else(|| CrewError::UnknownAgent {
            task_id: task.id.clone(),
            agent_id: agent_id.to_string(),
        })
    }

    /// Crew defaults overlaid with run-time inputs (run-time wins)
    pub fn merged_inputs(&self, overrides: &Inputs) -> Inputs {
        let mut merged = self.inputs.clone();
        for (key, value) in overrides {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }

    /// Check the configuration invariants
    ///
    /// Unknown `depends_on` ids are not errors (the leveler forces progress),
    /// but are reported.
    pub fn validate(&self) -> Result<()> {
        if self.agents.is_empty() {
            return Err(CrewError::NoAgents {
                crew: self.name.clone(),
            });
        }

        let mut agent_ids = HashSet::with_capacity(self.agents.len());
        for agent in &self.agents {
            if !agent_ids.insert(agent.id.as_str()) {
                return Err(CrewError::DuplicateAgent {
                    agent_id: agent.id.clone(),
                });
            }
        }

        let mut task_ids = HashSet::with_capacity(self.tasks.len());
        for task in &self.tasks {
            if !task_ids.insert(task.id.as_str()) {
                return Err(CrewError::DuplicateTask {
                    task_id: task.id.clone(),
                });
            }
        }

        for task in &self.tasks {
            // Hierarchical crews delegate unresolved tasks to the manager
            if self.process != Process::Hierarchical {
                self.assigned_agent(task)?;
            }

            for dep in &task.depends_on {
                if !task_ids.contains(dep.as_str()) {
                    warn!(task = %task.id, dependency = %dep, "depends_on names an unknown task");
                }
            }
        }

        Ok(())
    }
}
