//! # Tool Registry and Dispatcher
//!
//! Named side-effecting capabilities an agent may invoke during a task.
//!
//! - [`Tool`] - one capability with a JSON Schema for its params
//! - [`ToolRegistry`] - `invoke(name, params, scope) -> ToolOutcome`
//! - [`BuiltinRegistry`] - in-process registry with `file_lookup` and `web_scrape`
//! - [`ToolDispatcher`] - cancellation/timeout wrapper used by the task executor
//!
//! Tools augment a task, they never gate it: every failure (bad params, tool
//! error, timeout) comes back as a failed [`ToolOutcome`], and unknown tool
//! names resolve to a marked mock result.

mod file_lookup;
mod web_scrape;

pub use file_lookup::FileLookupTool;
pub use web_scrape::WebScrapeTool;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::config::EngineConfig;
use crate::context::{ExecutionContext, RunScope};

/// Normalized tool result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Benign default for tools nobody registered
    pub fn mock(tool_name: &str) -> Self {
        Self::ok(json!({
            "mock": true,
            "tool": tool_name,
            "message": format!("Tool '{}' is not registered; no action taken", tool_name),
        }))
    }

    pub fn is_mock(&self) -> bool {
        self.result
            .as_ref()
            .and_then(|r| r.get("mock"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// One named capability
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema the params must satisfy
    fn parameters_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn invoke(&self, params: Value, scope: &RunScope) -> anyhow::Result<Value>;
}

/// Resolves tool names to capability calls
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Never errors: failures are reported through the outcome
    async fn invoke(&self, tool_name: &str, params: Value, scope: &RunScope) -> ToolOutcome;

    fn contains(&self, tool_name: &str) -> bool;
}

/// In-process registry keyed by tool name
#[derive(Clone, Default)]
pub struct BuiltinRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl BuiltinRegistry {
    /// Empty registry (every name resolves to the mock outcome)
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `file_lookup` and `web_scrape` configured from `[tools]`
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut registry = Self::new();
        registry.register(FileLookupTool::new(config.tools.workspace_root.clone()));
        registry.register(
            WebScrapeTool::new(config.runtime.tool_timeout())
                .allow_private_hosts(config.tools.allow_private_hosts),
        );
        registry
    }

    /// Add (or replace) a tool under its own name
    pub fn register(&mut self, tool: impl Tool + 'static) -> &mut Self {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
        self
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl ToolRegistry for BuiltinRegistry {
    async fn invoke(&self, tool_name: &str, params: Value, scope: &RunScope) -> ToolOutcome {
        let Some(tool) = self.tools.get(tool_name) else {
            debug!(tool = tool_name, "Unknown tool, returning mock outcome");
            return ToolOutcome::mock(tool_name);
        };

        if let Err(reason) = validate_params(&tool.parameters_schema(), &params) {
            return ToolOutcome::failed(format!("Invalid params for '{}': {}", tool_name, reason));
        }

        match tool.invoke(params, scope).await {
            Ok(result) => ToolOutcome::ok(result),
            Err(e) => ToolOutcome::failed(format!("{:#}", e)),
        }
    }

    fn contains(&self, tool_name: &str) -> bool {
        self.tools.contains_key(tool_name)
    }
}

/// Validate `params` against a tool's JSON Schema, collecting every violation
fn validate_params(schema: &Value, params: &Value) -> Result<(), String> {
    let validator =
        jsonschema::validator_for(schema).map_err(|e| format!("invalid tool schema: {}", e))?;

    let errors: Vec<String> = validator.iter_errors(params).map(|e| e.to_string()).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

/// Dispatches tool calls for the task executor
///
/// Races each call against the run's cancellation token and the per-tool timeout.
#[derive(Clone)]
pub struct ToolDispatcher {
    registry: Arc<dyn ToolRegistry>,
    timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<dyn ToolRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &Arc<dyn ToolRegistry> {
        &self.registry
    }

    #[instrument(skip(self, params, ctx), fields(run_id = %ctx.run_id()))]
    pub async fn dispatch(
        &self,
        tool_name: &str,
        params: Value,
        ctx: &ExecutionContext,
    ) -> ToolOutcome {
        if ctx.is_cancelled() {
            return ToolOutcome::failed("run cancelled");
        }

        let call = self.registry.invoke(tool_name, params, ctx.scope());
        tokio::select! {
            biased;
            _ = ctx.cancellation().cancelled() => ToolOutcome::failed("run cancelled"),
            outcome = tokio::time::timeout(self.timeout, call) => match outcome {
                Ok(outcome) => outcome,
                Err(_) => ToolOutcome::failed(format!(
                    "Tool '{}' timed out after {}s",
                    tool_name,
                    self.timeout.as_secs_f32()
                )),
            },
        }
    }
}

impl std::fmt::Debug for ToolDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDispatcher")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
