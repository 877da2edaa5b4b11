//! Scheduling policies
//!
//! - **Sequential**: declaration order, fail-fast, last task's output wins.
//! - **Parallel**: dependency levels run concurrently (JoinSet) with a barrier
//!   between levels; a failing level fails the run once every task in it settled.
//! - **Hierarchical**: sequential, with a `delegation` step from the manager
//!   (first agent) before each task; unresolved assignments fall back to the manager.
//!
//! Every task goes `not-started -> running -> done` once per run, and every
//! outcome (success or failure) lands in the shared task-result map.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio::task::JoinSet;
use tracing::{info, instrument};

use crate::context::ExecutionContext;
use crate::crew::{Agent, Crew, Process, Task};
use crate::error::{CrewError, Result};
use crate::executor::TaskExecutor;
use crate::leveler::{self, Leveling};
use crate::result::TaskResult;
use crate::step_log::StepType;

/// Drives a crew's tasks through the task executor
#[derive(Clone, Debug)]
pub struct Scheduler {
    executor: TaskExecutor,
}

impl Scheduler {
    pub fn new(executor: TaskExecutor) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &TaskExecutor {
        &self.executor
    }

    /// Run every task of `crew` under its process policy
    ///
    /// Returns the final output (`None` for a crew without tasks). Results of
    /// tasks that ran before a failure stay in `ctx.results()`.
    #[instrument(skip_all, fields(run_id = %ctx.run_id(), crew = %crew.name, process = %crew.process))]
    pub async fn run(&self, crew: &Arc<Crew>, ctx: &ExecutionContext) -> Result<Option<String>> {
        info!(tasks = crew.tasks.len(), "Scheduling crew");
        match crew.process {
            Process::Sequential => self.run_sequential(crew, ctx).await,
            Process::Parallel => self.run_parallel(crew, ctx).await,
            Process::Hierarchical => self.run_hierarchical(crew, ctx).await,
        }
    }

    async fn run_sequential(&self, crew: &Arc<Crew>, ctx: &ExecutionContext) -> Result<Option<String>> {
        let mut final_output = None;
        for task in &crew.tasks {
            let agent = crew.assigned_agent(task)?;
            let result = run_task(&self.executor, task, agent, crew, ctx, None).await?;
            final_output = Some(result.output);
        }
        Ok(final_output)
    }

    async fn run_hierarchical(&self, crew: &Arc<Crew>, ctx: &ExecutionContext) -> Result<Option<String>> {
        let manager = crew.manager().ok_or_else(|| CrewError::NoAgents {
            crew: crew.name.clone(),
        })?;

        let mut final_output = None;
        for task in &crew.tasks {
            ctx.ensure_active()?;

            let (agent, fallback) = delegate(crew, manager, task);
            ctx.steps()
                .step(
                    StepType::Delegation,
                    format!("{} delegates '{}' to {}", manager.name, task.label(), agent.name),
                )
                .task(&task.id)
                .agent(manager)
                .metadata(json!({
                    "delegated_to": agent.id,
                    "fallback_to_manager": fallback,
                }))
                .emit();

            let result = run_task(&self.executor, task, agent, crew, ctx, None).await?;
            final_output = Some(result.output);
        }
        Ok(final_output)
    }

    async fn run_parallel(&self, crew: &Arc<Crew>, ctx: &ExecutionContext) -> Result<Option<String>> {
        let leveling = leveler::level(&crew.tasks);
        info!(levels = leveling.len(), "Tasks leveled");

        let mut final_output = None;
        for (index, level) in leveling.levels.iter().enumerate() {
            ctx.ensure_active()?;
            final_output = self
                .run_level(crew, ctx, &leveling, index, level)
                .await?
                .or(final_output);
        }
        Ok(final_output)
    }

    /// Fan out one level and wait for all of it (the barrier)
    async fn run_level(
        &self,
        crew: &Arc<Crew>,
        ctx: &ExecutionContext,
        leveling: &Leveling,
        index: usize,
        level: &[Arc<Task>],
    ) -> Result<Option<String>> {
        info!(level = index, tasks = level.len(), "Starting level");

        let start_metadata = leveling.forced.as_ref().filter(|_| leveling.is_forced(index)).map(|forced| {
            json!({
                "level": index,
                "forced_level": true,
                "unmet_dependencies": forced.unmet,
            })
        });

        let assignments = level
            .iter()
            .map(|task| crew.assigned_agent(task).map(|agent| (Arc::clone(task), Arc::clone(agent))))
            .collect::<Result<Vec<_>>>()?;

        let mut join_set = JoinSet::new();
        for (position, (task, agent)) in assignments.into_iter().enumerate() {
            let crew = Arc::clone(crew);
            let ctx = ctx.clone();
            let executor = self.executor.clone();
            let metadata = start_metadata
                .clone()
                .unwrap_or_else(|| json!({ "level": index }));

            join_set.spawn(async move {
                let outcome = run_task(&executor, &task, &agent, &crew, &ctx, Some(metadata)).await;
                (position, outcome)
            });
        }

        let mut outcomes: Vec<Option<Result<TaskResult>>> = (0..level.len()).map(|_| None).collect();
        let mut panicked = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((position, outcome)) => outcomes[position] = Some(outcome),
                Err(e) => {
                    panicked.get_or_insert_with(|| CrewError::Execution(format!("task panicked: {}", e)));
                }
            }
        }

        if let Some(err) = panicked {
            return Err(err);
        }

        // declaration order, so the level's last task decides the output
        let mut last_output = None;
        let mut first_error = None;
        for outcome in outcomes.into_iter().flatten() {
            match outcome {
                Ok(result) => last_output = Some(result.output),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(last_output),
        }
    }
}

/// Hierarchical assignment: the task's agent, or the manager when unresolved
fn delegate<'a>(crew: &'a Crew, manager: &'a Arc<Agent>, task: &Task) -> (&'a Arc<Agent>, bool) {
    match task.agent.as_deref().and_then(|id| crew.agent(id)) {
        Some(agent) => (agent, false),
        None => (manager, true),
    }
}

/// Run one task through its state transitions and record the outcome
async fn run_task(
    executor: &TaskExecutor,
    task: &Task,
    agent: &Agent,
    crew: &Crew,
    ctx: &ExecutionContext,
    start_metadata: Option<Value>,
) -> Result<TaskResult> {
    ctx.ensure_active()?;
    ctx.mark_running(&task.id)?;

    let started = Instant::now();
    let outcome = executor
        .execute_annotated(task, agent, crew, ctx, start_metadata)
        .await;
    match &outcome {
        Ok(result) => ctx.results().insert(result.clone()),
        Err(e) => {
            ctx.results()
                .insert(TaskResult::failed(&task.id, &agent.id, e.to_string(), started.elapsed()));
        }
    }
    ctx.mark_done(&task.id);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    use crate::context::RunScope;
    use crate::crew::Inputs;
    use crate::provider::MockProvider;
    use crate::step_log::StepLog;
    use crate::tools::{BuiltinRegistry, ToolDispatcher};

    /// Counts WARN events seen on this thread
    struct WarnCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for WarnCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn crew() -> Crew {
        Crew::new("c", Process::Hierarchical)
            .with_agent(Agent::new("lead", "Lead", "Manager", "Coordinate"))
            .with_agent(Agent::new("writer", "Wren", "Writer", "Write"))
    }

    #[test]
    fn delegate_resolves_assigned_agent() {
        let crew = crew();
        let manager = crew.manager().unwrap();
        let task = Task::new("t", "x").assigned_to("writer");
        let (agent, fallback) = delegate(&crew, manager, &task);
        assert_eq!(agent.id, "writer");
        assert!(!fallback);
    }

    #[test]
    fn delegate_falls_back_to_manager() {
        let crew = crew();
        let manager = crew.manager().unwrap();
        for task in [Task::new("t", "x"), Task::new("t", "x").assigned_to("ghost")] {
            let (agent, fallback) = delegate(&crew, manager, &task);
            assert_eq!(agent.id, "lead");
            assert!(fallback);
        }
    }

    #[tokio::test]
    async fn forced_level_warned_once() {
        let warnings = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(WarnCounter(warnings.clone()));
        let _guard = tracing::subscriber::set_default(subscriber);

        let crew = Arc::new(
            Crew::new("cycle", Process::Parallel)
                .with_agent(Agent::new("a", "A", "r", "g"))
                .with_task(Task::new("x", "x").assigned_to("a").depends_on(["y"]))
                .with_task(Task::new("y", "y").assigned_to("a").depends_on(["x"])),
        );
        let dispatcher = ToolDispatcher::new(Arc::new(BuiltinRegistry::new()), Duration::from_secs(1));
        let scheduler = Scheduler::new(TaskExecutor::new(Arc::new(MockProvider::new()), dispatcher));
        let ctx = ExecutionContext::new("run", RunScope::default(), Inputs::new(), StepLog::new());

        scheduler.run(&crew, &ctx).await.unwrap();

        assert_eq!(ctx.results().len(), 2);
        assert_eq!(warnings.load(Ordering::SeqCst), 1);
    }
}
