//! Task executor
//!
//! Runs one task for one agent: interpolate, build prompts, call the model,
//! dispatch detected tools, record every stage in the step log. Stateless
//! across calls; the scheduler owns task state and stores the result.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{debug, error, instrument};

use crate::config::{EngineConfig, ModelDefaults};
use crate::context::ExecutionContext;
use crate::crew::{Agent, Crew, Task};
use crate::detect::{detector_for, HeuristicDetector, ToolUseDetector};
use crate::error::{CrewError, Result};
use crate::interpolate::interpolate;
use crate::provider::{Completion, CompletionRequest, ModelProvider};
use crate::result::TaskResult;
use crate::step_log::StepType;
use crate::tools::{ToolDispatcher, ToolRegistry};

/// Characters of the response kept in the `agent_response` step
pub const RESPONSE_PREVIEW_CHARS: usize = 500;

/// Executes single tasks against the model provider
#[derive(Clone)]
pub struct TaskExecutor {
    provider: Arc<dyn ModelProvider>,
    dispatcher: ToolDispatcher,
    detector: Arc<dyn ToolUseDetector>,
    defaults: ModelDefaults,
    task_timeout: Option<Duration>,
}

impl TaskExecutor {
    pub fn new(provider: Arc<dyn ModelProvider>, dispatcher: ToolDispatcher) -> Self {
        Self {
            provider,
            dispatcher,
            detector: Arc::new(HeuristicDetector),
            defaults: ModelDefaults::default(),
            task_timeout: None,
        }
    }

    /// Executor wired from `[defaults]` and `[runtime]`
    pub fn from_config(
        provider: Arc<dyn ModelProvider>,
        tools: Arc<dyn ToolRegistry>,
        config: &EngineConfig,
    ) -> Self {
        let dispatcher = ToolDispatcher::new(tools, config.runtime.tool_timeout());
        Self::new(provider, dispatcher)
            .with_detector(detector_for(config.runtime.tool_detection))
            .with_defaults(config.defaults.clone())
            .with_task_timeout(config.runtime.task_timeout())
    }

    pub fn with_detector(mut self, detector: Arc<dyn ToolUseDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_defaults(mut self, defaults: ModelDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn provider(&self) -> &Arc<dyn ModelProvider> {
        &self.provider
    }

    /// Run `task` as `agent`
    ///
    /// Model failures are recorded as an `error` step and returned; they are
    /// never retried. Tool failures only show up in `tool_result` steps.
    pub async fn execute_task(
        &self,
        task: &Task,
        agent: &Agent,
        crew: &Crew,
        ctx: &ExecutionContext,
    ) -> Result<TaskResult> {
        self.execute_annotated(task, agent, crew, ctx, None).await
    }

    /// [`execute_task`](Self::execute_task) with extra `task_start` metadata
    #[instrument(
        name = "execute_task",
        skip_all,
        fields(run_id = %ctx.run_id(), task_id = %task.id, agent_id = %agent.id)
    )]
    pub async fn execute_annotated(
        &self,
        task: &Task,
        agent: &Agent,
        crew: &Crew,
        ctx: &ExecutionContext,
        start_metadata: Option<serde_json::Value>,
    ) -> Result<TaskResult> {
        let started = Instant::now();
        let steps = ctx.steps();

        let mut start = steps
            .step(StepType::TaskStart, format!("Starting task: {}", task.label()))
            .task(&task.id)
            .agent(agent);
        if let Some(metadata) = start_metadata {
            start = start.metadata(metadata);
        }
        start.emit();

        match self.run_started(task, agent, crew, ctx, started).await {
            Ok(result) => Ok(result),
            Err(e) => {
                error!(error = %e, code = e.code(), "Task failed");
                steps
                    .step(StepType::Error, e.to_string())
                    .task(&task.id)
                    .agent(agent)
                    .duration(started.elapsed())
                    .metadata(json!({ "code": e.code() }))
                    .emit();
                Err(e)
            }
        }
    }

    /// Everything after `task_start`; any error here becomes one `error` step
    async fn run_started(
        &self,
        task: &Task,
        agent: &Agent,
        crew: &Crew,
        ctx: &ExecutionContext,
        started: Instant,
    ) -> Result<TaskResult> {
        let steps = ctx.steps();
        let description = interpolate(&task.description, ctx.inputs());
        let expected_output = interpolate(&task.expected_output, ctx.inputs());

        let system_prompt = self.system_prompt(agent, crew);
        let task_prompt = task_prompt(task, &description, &expected_output, ctx);
        let request = self.request(agent, system_prompt, task_prompt);

        debug!(
            model = %request.model,
            prompt_len = request.prompt_len(),
            "Prompts built"
        );

        steps
            .step(
                StepType::AgentThinking,
                format!("{} is working on the task", agent.name),
            )
            .task(&task.id)
            .agent(agent)
            .metadata(json!({ "model": request.model }))
            .emit();

        let completion = self.call_model(&task.id, request, ctx).await?;

        self.run_tools(task, agent, &description, &completion.content, ctx)
            .await?;

        let (preview, truncated) = preview(&completion.content);
        steps
            .step(StepType::AgentResponse, preview)
            .task(&task.id)
            .agent(agent)
            .metadata(json!({
                "truncated": truncated,
                "length": completion.content.chars().count(),
                "usage_tokens": completion.usage_tokens,
            }))
            .emit();

        ctx.memory().append(&agent.id, &completion.content);

        let elapsed = started.elapsed();
        steps
            .step(
                StepType::TaskComplete,
                format!("Completed task: {}", task.label()),
            )
            .task(&task.id)
            .agent(agent)
            .duration(elapsed)
            .emit();

        Ok(TaskResult::success(
            &task.id,
            &agent.id,
            completion.content,
            elapsed,
            completion.usage_tokens,
        ))
    }

    fn system_prompt(&self, agent: &Agent, crew: &Crew) -> String {
        let mut prompt = format!(
            "You are {}, {}.\nYour goal: {}\n",
            agent.name, agent.role, agent.goal
        );
        if !agent.backstory.is_empty() {
            let _ = writeln!(prompt, "\n{}", agent.backstory);
        }

        let _ = write!(prompt, "\nYou are a member of the crew \"{}\"", crew.name);
        if crew.description.is_empty() {
            prompt.push_str(".\n");
        } else {
            let _ = writeln!(prompt, ": {}", crew.description);
        }

        if !agent.tools.is_empty() {
            prompt.push_str("\nYou have access to the following tools:\n");
            for (i, tool) in agent.tools.iter().enumerate() {
                let _ = writeln!(prompt, "{}. {}", i + 1, tool);
            }
            let _ = writeln!(prompt, "{}", self.detector.prompt_hint());
        }
        prompt
    }

    /// Agent settings first, then `[defaults]`, then the provider's model
    fn request(&self, agent: &Agent, system_prompt: String, task_prompt: String) -> CompletionRequest {
        let model = if !agent.model.model.is_empty() {
            agent.model.model.clone()
        } else {
            self.defaults
                .model
                .clone()
                .unwrap_or_else(|| self.provider.default_model().to_string())
        };

        CompletionRequest::new(model, system_prompt, task_prompt)
            .with_temperature(agent.model.temperature.unwrap_or(self.defaults.temperature))
            .with_max_tokens(agent.model.max_tokens.or(self.defaults.max_tokens))
    }

    async fn call_model(
        &self,
        task_id: &str,
        request: CompletionRequest,
        ctx: &ExecutionContext,
    ) -> Result<Completion> {
        ctx.ensure_active()?;

        let call = async {
            let outcome = match self.task_timeout {
                Some(limit) => match tokio::time::timeout(limit, self.provider.complete(request)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        return Err(CrewError::Timeout {
                            task_id: task_id.to_string(),
                            limit,
                        })
                    }
                },
                None => self.provider.complete(request).await,
            };
            outcome.map_err(|e| CrewError::Model {
                task_id: task_id.to_string(),
                reason: format!("{:#}", e),
            })
        };

        tokio::select! {
            biased;
            _ = ctx.cancellation().cancelled() => Err(CrewError::Cancelled),
            result = call => result,
        }
    }

    /// Dispatch detected tool calls (at most `max_iterations`)
    async fn run_tools(
        &self,
        task: &Task,
        agent: &Agent,
        description: &str,
        response: &str,
        ctx: &ExecutionContext,
    ) -> Result<()> {
        let invocations = self
            .detector
            .detect(response, &agent.tools, description);
        let limit = agent.max_iterations as usize;
        if invocations.len() > limit {
            debug!(
                detected = invocations.len(),
                limit, "Tool calls capped at max_iterations"
            );
        }

        for invocation in invocations.into_iter().take(limit) {
            ctx.ensure_active()?;

            ctx.steps()
                .step(
                    StepType::ToolCall,
                    format!("Using tool: {}", invocation.tool_name),
                )
                .task(&task.id)
                .agent(agent)
                .tool(&invocation.tool_name)
                .metadata(json!({ "params": invocation.params }))
                .emit();

            let started = Instant::now();
            let outcome = self
                .dispatcher
                .dispatch(&invocation.tool_name, invocation.params, ctx)
                .await;

            let content = if outcome.success {
                format!("Tool {} completed", invocation.tool_name)
            } else {
                format!(
                    "Tool {} failed: {}",
                    invocation.tool_name,
                    outcome.error.as_deref().unwrap_or("unknown error")
                )
            };
            ctx.steps()
                .step(StepType::ToolResult, content)
                .task(&task.id)
                .agent(agent)
                .tool(&invocation.tool_name)
                .duration(started.elapsed())
                .metadata(serde_json::to_value(&outcome).unwrap_or_default())
                .emit();
        }
        ctx.ensure_active()
    }
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("provider", &self.provider.name())
            .field("task_timeout", &self.task_timeout)
            .finish_non_exhaustive()
    }
}

/// Task prompt with outputs of completed dependencies
fn task_prompt(task: &Task, description: &str, expected_output: &str, ctx: &ExecutionContext) -> String {
    let mut prompt = format!("## Task\n{}\n", description);
    if !expected_output.is_empty() {
        let _ = write!(prompt, "\n## Expected Output\n{}\n", expected_output);
    }

    let upstream: Vec<(&str, String)> = task
        .depends_on
        .iter()
        .filter_map(|id| ctx.results().output(id).map(|out| (id.as_str(), out)))
        .collect();

    if !upstream.is_empty() {
        prompt.push_str("\n## Context\n");
        for (n, (id, output)) in upstream.iter().enumerate() {
            let _ = write!(prompt, "\n### Previous Task {} Output ({})\n{}\n", n + 1, id, output);
        }
    }
    prompt
}

/// First [`RESPONSE_PREVIEW_CHARS`] characters, and whether anything was cut
fn preview(content: &str) -> (String, bool) {
    match content.char_indices().nth(RESPONSE_PREVIEW_CHARS) {
        Some((cut, _)) => (content[..cut].to_string(), true),
        None => (content.to_string(), false),
    }
}
