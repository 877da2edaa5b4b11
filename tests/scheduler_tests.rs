//! Scheduling policy tests
//!
//! Every run goes through the controller with a deterministic MockProvider;
//! assertions look at the recorded prompts and the step log.

use std::sync::Arc;
use std::time::Duration;

use crewflow::provider::MockProvider;
use crewflow::store::InMemoryRunStore;
use crewflow::tools::BuiltinRegistry;
use crewflow::{
    Agent, Crew, EngineConfig, ExecutionResult, Inputs, Process, RunController, RunScope,
    RunStatus, StepType, Task,
};

// =============================================================================
// HELPERS
// =============================================================================

async fn run(crew: Crew, provider: &MockProvider) -> ExecutionResult {
    RunController::from_config(
        Arc::new(provider.clone()),
        Arc::new(BuiltinRegistry::new()),
        Arc::new(InMemoryRunStore::new()),
        &EngineConfig::default(),
    )
    .run(Arc::new(crew), RunScope::default(), Inputs::new())
    .await
    .expect("run should produce a result")
}

fn agent(id: &str) -> Agent {
    Agent::new(id, id.to_uppercase(), "Analyst", "Be useful")
}

/// alpha -> beta -> gamma, each answering with a distinct marker
fn chain(process: Process) -> (Crew, MockProvider) {
    let crew = Crew::new("chain", process)
        .with_agent(agent("a"))
        .with_task(Task::new("t1", "alpha step").assigned_to("a"))
        .with_task(Task::new("t2", "beta step").assigned_to("a").depends_on(["t1"]))
        .with_task(Task::new("t3", "gamma step").assigned_to("a").depends_on(["t2"]));
    let provider = MockProvider::new()
        .on_prompt_containing("alpha step", "ALPHA-OUT")
        .on_prompt_containing("beta step", "BETA-OUT")
        .on_prompt_containing("gamma step", "GAMMA-OUT");
    (crew, provider)
}

/// Step types for one task, without the manager's delegation step
fn task_steps(result: &ExecutionResult, task_id: &str) -> Vec<StepType> {
    result
        .steps
        .iter()
        .filter(|s| s.task_id.as_deref() == Some(task_id) && s.step_type != StepType::Delegation)
        .map(|s| s.step_type)
        .collect()
}

/// task_start, agent_thinking, [tool_call, tool_result]*, agent_response, task_complete
fn assert_step_order(types: &[StepType]) {
    assert!(types.len() >= 4, "too few steps: {:?}", types);
    assert_eq!(types[0], StepType::TaskStart);
    assert_eq!(types[1], StepType::AgentThinking);
    assert_eq!(types[types.len() - 2], StepType::AgentResponse);
    assert_eq!(types[types.len() - 1], StepType::TaskComplete);
    for pair in types[2..types.len() - 2].chunks(2) {
        assert_eq!(pair, [StepType::ToolCall, StepType::ToolResult]);
    }
}

fn step_index(result: &ExecutionResult, task_id: &str, step_type: StepType) -> usize {
    result
        .steps
        .iter()
        .position(|s| s.task_id.as_deref() == Some(task_id) && s.step_type == step_type)
        .unwrap_or_else(|| panic!("no {} step for {}", step_type, task_id))
}

// =============================================================================
// SEQUENTIAL
// =============================================================================

#[tokio::test]
async fn sequential_runs_in_declared_order_with_direct_context_only() {
    let (crew, provider) = chain(Process::Sequential);
    let result = run(crew, &provider).await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.final_output.as_deref(), Some("GAMMA-OUT"));

    let prompts: Vec<String> = provider.requests().into_iter().map(|r| r.user_prompt).collect();
    assert_eq!(prompts.len(), 3);
    assert!(prompts[0].contains("alpha step"));
    assert!(prompts[1].contains("beta step"));
    assert!(prompts[2].contains("gamma step"));

    assert!(prompts[2].contains("BETA-OUT"));
    assert!(!prompts[2].contains("ALPHA-OUT"));
}

#[tokio::test]
async fn sequential_fails_fast() {
    let (crew, provider) = chain(Process::Sequential);
    let provider = provider.fail_on_prompt_containing("beta step", "model overloaded");
    let result = run(crew, &provider).await;

    assert_eq!(result.status, RunStatus::Failed);
    assert!(result.error.as_deref().unwrap().contains("model overloaded"));
    assert!(provider.request_containing("gamma step").is_none());

    let ids: Vec<&str> = result.task_results.keys().map(String::as_str).collect();
    assert_eq!(ids, vec!["t1", "t2"]);
    assert!(result.task_results["t1"].is_success());
    assert!(!result.task_results["t2"].is_success());
    assert!(result.final_output.is_none());

    let errors: Vec<_> = result
        .steps
        .iter()
        .filter(|s| s.step_type == StepType::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].task_id.as_deref(), Some("t2"));
}

#[tokio::test]
async fn interpolates_inputs_into_prompts() {
    let crew = Crew::new("c", Process::Sequential)
        .with_agent(agent("a"))
        .with_task(
            Task::new("t1", "Hello {name}, about {missing}")
                .with_expected_output("{count} bullet points")
                .assigned_to("a"),
        )
        .with_input("name", "Ada")
        .with_input("count", 3);
    let provider = MockProvider::new();
    run(crew, &provider).await;

    let prompt = provider.last_request().unwrap().user_prompt;
    assert!(prompt.contains("Hello Ada, about {missing}"));
    assert!(prompt.contains("3 bullet points"));
}

// =============================================================================
// PARALLEL
// =============================================================================

fn diamond() -> Crew {
    Crew::new("diamond", Process::Parallel)
        .with_agent(agent("a"))
        .with_agent(agent("b"))
        .with_task(Task::new("t1", "left branch").assigned_to("a"))
        .with_task(Task::new("t2", "right branch").assigned_to("b"))
        .with_task(Task::new("t3", "merge both").assigned_to("a").depends_on(["t1", "t2"]))
}

#[tokio::test]
async fn parallel_level_barrier() {
    let provider = MockProvider::new()
        .with_delay(Duration::from_millis(30))
        .on_prompt_containing("left branch", "LEFT")
        .on_prompt_containing("right branch", "RIGHT")
        .on_prompt_containing("merge both", "MERGED");
    let result = run(diamond(), &provider).await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.final_output.as_deref(), Some("MERGED"));

    let merge_prompt = provider.request_containing("merge both").unwrap().user_prompt;
    assert!(merge_prompt.contains("LEFT"));
    assert!(merge_prompt.contains("RIGHT"));

    let merge_start = step_index(&result, "t3", StepType::TaskStart);
    assert!(step_index(&result, "t1", StepType::TaskComplete) < merge_start);
    assert!(step_index(&result, "t2", StepType::TaskComplete) < merge_start);
}

#[tokio::test]
async fn parallel_final_output_follows_declaration_order() {
    let crew = Crew::new("flat", Process::Parallel)
        .with_agent(agent("a"))
        .with_task(Task::new("first", "first job").assigned_to("a"))
        .with_task(Task::new("second", "second job").assigned_to("a"));
    let provider = MockProvider::new()
        .on_prompt_containing("first job", "FIRST")
        .on_prompt_containing("second job", "SECOND");

    let result = run(crew, &provider).await;
    assert_eq!(result.final_output.as_deref(), Some("SECOND"));
}

#[tokio::test]
async fn parallel_failure_settles_level_then_fails_run() {
    let provider = MockProvider::new()
        .with_delay(Duration::from_millis(20))
        .fail_on_prompt_containing("left branch", "boom");
    let result = run(diamond(), &provider).await;

    assert_eq!(result.status, RunStatus::Failed);
    assert!(result.error.as_deref().unwrap().contains("boom"));
    assert!(!result.task_results["t1"].is_success());
    assert!(result.task_results["t2"].is_success());
    assert!(!result.task_results.contains_key("t3"));
    assert!(provider.request_containing("merge both").is_none());
}

#[tokio::test]
async fn parallel_cycle_terminates_in_forced_level() {
    let crew = Crew::new("cycle", Process::Parallel)
        .with_agent(agent("a"))
        .with_task(Task::new("root", "root job").assigned_to("a"))
        .with_task(Task::new("x", "x job").assigned_to("a").depends_on(["y"]))
        .with_task(Task::new("y", "y job").assigned_to("a").depends_on(["x"]))
        .with_task(Task::new("z", "z job").assigned_to("a").depends_on(["ghost"]));
    let provider = MockProvider::new();
    let result = run(crew, &provider).await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.task_results.len(), 4);

    let forced: Vec<&str> = result
        .steps
        .iter()
        .filter(|s| s.step_type == StepType::TaskStart)
        .filter(|s| {
            s.metadata
                .as_ref()
                .and_then(|m| m.get("forced_level"))
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
        })
        .filter_map(|s| s.task_id.as_deref())
        .collect();
    let mut forced = forced;
    forced.sort_unstable();
    assert_eq!(forced, vec!["x", "y", "z"]);
}

// =============================================================================
// HIERARCHICAL
// =============================================================================

#[tokio::test]
async fn hierarchical_emits_delegation_from_manager() {
    let crew = Crew::new("team", Process::Hierarchical)
        .with_agent(agent("lead"))
        .with_agent(agent("writer"))
        .with_task(Task::new("draft", "draft it").assigned_to("writer"))
        .with_task(Task::new("review", "review it").depends_on(["draft"]));
    let provider = MockProvider::new().with_default("done");
    let result = run(crew, &provider).await;

    assert_eq!(result.status, RunStatus::Completed);

    let delegations: Vec<_> = result
        .steps
        .iter()
        .filter(|s| s.step_type == StepType::Delegation)
        .collect();
    assert_eq!(delegations.len(), 2);
    for step in &delegations {
        assert_eq!(step.agent_id.as_deref(), Some("lead"));
    }

    let draft = delegations[0].metadata.as_ref().unwrap();
    assert_eq!(draft["delegated_to"], "writer");
    assert_eq!(draft["fallback_to_manager"], false);

    let review = delegations[1].metadata.as_ref().unwrap();
    assert_eq!(review["delegated_to"], "lead");
    assert_eq!(review["fallback_to_manager"], true);
    assert_eq!(result.task_results["review"].agent_id, "lead");

    assert!(
        step_index(&result, "draft", StepType::Delegation)
            < step_index(&result, "draft", StepType::TaskStart)
    );
}

#[tokio::test]
async fn hierarchical_fails_fast() {
    let crew = Crew::new("team", Process::Hierarchical)
        .with_agent(agent("lead"))
        .with_task(Task::new("one", "one job"))
        .with_task(Task::new("two", "two job"));
    let provider = MockProvider::new().fail_on_prompt_containing("one job", "nope");
    let result = run(crew, &provider).await;

    assert_eq!(result.status, RunStatus::Failed);
    assert!(provider.request_containing("two job").is_none());
}

// =============================================================================
// STEP ORDERING
// =============================================================================

#[tokio::test]
async fn per_task_step_order_holds_for_every_policy() {
    for process in [Process::Sequential, Process::Parallel, Process::Hierarchical] {
        let crew = Crew::new("tools", process)
            .with_agent(agent("lead"))
            .with_agent(agent("scout").with_tools(["web_search", "file_lookup"]))
            .with_task(Task::new("find", "find sources").assigned_to("scout"))
            .with_task(Task::new("other", "other work").assigned_to("scout"))
            .with_task(
                Task::new("sum", "summarize")
                    .assigned_to("lead")
                    .depends_on(["find", "other"]),
            );
        let provider = MockProvider::new()
            .with_delay(Duration::from_millis(5))
            .on_prompt_containing("find sources", "Let me search with web_search")
            .with_default("Plain answer");
        let result = run(crew, &provider).await;
        assert_eq!(result.status, RunStatus::Completed, "{}", process);

        for task_id in ["find", "other", "sum"] {
            assert_step_order(&task_steps(&result, task_id));
        }
        assert_eq!(
            task_steps(&result, "find")
                .iter()
                .filter(|t| **t == StepType::ToolCall)
                .count(),
            2,
            "{}",
            process
        );
    }
}

#[tokio::test]
async fn step_ids_follow_emission_order() {
    let (crew, provider) = chain(Process::Sequential);
    let result = run(crew, &provider).await;

    let ids: Vec<u64> = result.steps.iter().map(|s| s.id).collect();
    let expected: Vec<u64> = (0..result.steps.len() as u64).collect();
    assert_eq!(ids, expected);
}
