//! Crewflow - crew orchestration engine for LLM agents
//!
//! A crew is a set of agent personas, a list of tasks with dependencies, and a
//! process policy (`sequential`, `parallel`, `hierarchical`). The
//! [`RunController`] drives a crew through the [`Scheduler`], which hands each
//! task to the [`TaskExecutor`]; everything that happens is recorded in the
//! run's [`StepLog`].
//!
//! ```rust
//! use std::sync::Arc;
//! use crewflow::{Agent, Crew, EngineConfig, Process, RunController, RunScope, Task};
//! use crewflow::provider::MockProvider;
//! use crewflow::store::InMemoryRunStore;
//! use crewflow::tools::BuiltinRegistry;
//!
//! # #[tokio::main]
//! # async fn main() -> crewflow::Result<()> {
//! let crew = Crew::new("Demo", Process::Sequential)
//!     .with_agent(Agent::new("writer", "Wren", "Writer", "Write clearly"))
//!     .with_task(Task::new("draft", "Write about {topic}").assigned_to("writer"))
//!     .with_input("topic", "ownership");
//!
//! let controller = RunController::from_config(
//!     Arc::new(MockProvider::new().with_default("Ownership means...")),
//!     Arc::new(BuiltinRegistry::new()),
//!     Arc::new(InMemoryRunStore::new()),
//!     &EngineConfig::default(),
//! );
//!
//! let result = controller
//!     .run(Arc::new(crew), RunScope::default(), Default::default())
//!     .await?;
//! assert!(result.is_success());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod controller;
pub mod crew;
pub mod detect;
pub mod error;
pub mod executor;
pub mod interpolate;
pub mod leveler;
pub mod provider;
pub mod result;
pub mod scheduler;
pub mod step_log;
pub mod store;
pub mod tools;

pub use config::EngineConfig;
pub use context::{ExecutionContext, RunScope};
pub use controller::{RunController, RunEvent, RunStream};
pub use crew::{Agent, Crew, Inputs, Process, Task};
pub use error::{CrewError, FixSuggestion, Result};
pub use executor::TaskExecutor;
pub use leveler::{level, Leveling};
pub use result::{ExecutionResult, RunStatus, TaskResult};
pub use scheduler::Scheduler;
pub use step_log::{ExecutionStep, StepLog, StepType};
