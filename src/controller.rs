//! Run controller - top-level entry point
//!
//! ```text
//! validate crew -> new run id -> store.create (fatal on error)
//!     -> scheduler.run -> ExecutionResult -> store.update (logged on error)
//! ```
//!
//! Task failures never escape as `Err`: they become a `failed` (or
//! `cancelled`) [`ExecutionResult`]. Only configuration errors and a failed
//! `store.create` are returned as errors.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::context::{ExecutionContext, RunScope};
use crate::crew::{Crew, Inputs};
use crate::error::{CrewError, Result};
use crate::executor::TaskExecutor;
use crate::provider::ModelProvider;
use crate::result::{ExecutionResult, RunStatus};
use crate::scheduler::Scheduler;
use crate::step_log::{ExecutionStep, StepLog};
use crate::store::{RunPatch, RunStore};
use crate::tools::ToolRegistry;

/// Item of a streaming run: steps as they happen, then exactly one `Finished`
#[derive(Debug)]
pub enum RunEvent {
    Step(ExecutionStep),
    Finished(Result<ExecutionResult>),
}

pub type RunStream = Pin<Box<dyn Stream<Item = RunEvent> + Send>>;

#[derive(Clone)]
pub struct RunController {
    scheduler: Scheduler,
    store: Arc<dyn RunStore>,
}

impl RunController {
    pub fn new(scheduler: Scheduler, store: Arc<dyn RunStore>) -> Self {
        Self { scheduler, store }
    }

    /// Controller wired from an engine config
    pub fn from_config(
        provider: Arc<dyn ModelProvider>,
        tools: Arc<dyn ToolRegistry>,
        store: Arc<dyn RunStore>,
        config: &EngineConfig,
    ) -> Self {
        let executor = TaskExecutor::from_config(provider, tools, config);
        Self::new(Scheduler::new(executor), store)
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Run to completion
    pub async fn run(&self, crew: Arc<Crew>, scope: RunScope, inputs: Inputs) -> Result<ExecutionResult> {
        self.run_with_cancel(crew, scope, inputs, CancellationToken::new())
            .await
    }

    /// Run to completion; cancelling `cancel` stops the run at its next step
    pub async fn run_with_cancel(
        &self,
        crew: Arc<Crew>,
        scope: RunScope,
        inputs: Inputs,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult> {
        self.execute(crew, scope, inputs, cancel, StepLog::new())
            .await
    }

    /// Run in the background, yielding steps as they are written
    pub fn run_streaming(&self, crew: Arc<Crew>, scope: RunScope, inputs: Inputs) -> RunStream {
        self.run_streaming_with_cancel(crew, scope, inputs, CancellationToken::new())
    }

    pub fn run_streaming_with_cancel(
        &self,
        crew: Arc<Crew>,
        scope: RunScope,
        inputs: Inputs,
        cancel: CancellationToken,
    ) -> RunStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = self.clone();

        // the sender lives in the run's step log, so the step stream ends with the run
        let handle = tokio::spawn(async move {
            controller
                .execute(crew, scope, inputs, cancel, StepLog::with_sink(tx))
                .await
        });

        let steps = UnboundedReceiverStream::new(rx).map(RunEvent::Step);
        let finished = futures::stream::once(async move {
            let result = handle
                .await
                .unwrap_or_else(|e| Err(CrewError::Execution(format!("run task failed: {}", e))));
            RunEvent::Finished(result)
        });

        Box::pin(steps.chain(finished))
    }

    #[instrument(name = "run", skip_all, fields(crew = %crew.name))]
    async fn execute(
        &self,
        crew: Arc<Crew>,
        scope: RunScope,
        inputs: Inputs,
        cancel: CancellationToken,
        steps: StepLog,
    ) -> Result<ExecutionResult> {
        crew.validate()?;

        let run_id = Uuid::new_v4().to_string();
        let inputs = crew.merged_inputs(&inputs);
        self.store.create(&run_id, &crew, &scope, &inputs).await?;

        info!(run_id = %run_id, process = %crew.process, tasks = crew.tasks.len(), "Run started");
        let start_time = Utc::now();
        let started = Instant::now();

        let ctx = ExecutionContext::new(&run_id, scope, inputs, steps).with_cancellation(cancel);
        let outcome = self.scheduler.run(&crew, &ctx).await;

        let (status, final_output, error) = match outcome {
            Ok(output) => (RunStatus::Completed, output, None),
            Err(e) if matches!(e, CrewError::Cancelled) || ctx.is_cancelled() => {
                (RunStatus::Cancelled, None, Some(e.to_string()))
            }
            Err(e) => (RunStatus::Failed, None, Some(e.to_string())),
        };

        let result = ExecutionResult {
            run_id: run_id.clone(),
            status,
            start_time,
            end_time: Utc::now(),
            total_duration_ms: started.elapsed().as_millis() as u64,
            task_results: ctx.results().snapshot(),
            final_output,
            steps: ctx.steps().steps(),
            error,
        };

        info!(
            run_id = %run_id,
            status = %result.status,
            duration_ms = result.total_duration_ms,
            tokens = result.total_tokens(),
            "Run finished"
        );

        if let Err(e) = self.store.update(&run_id, RunPatch::from_result(&result)).await {
            warn!(run_id = %run_id, error = %e, "Failed to persist run result");
        }

        Ok(result)
    }
}

impl std::fmt::Debug for RunController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunController")
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}
