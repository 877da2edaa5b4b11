//! Tool-use detection
//!
//! Decides which of an agent's allowed tools its response intends to invoke.
//! The task executor only sees [`ToolUseDetector`], so the detection mode can be
//! swapped through `runtime.tool_detection` without touching scheduling.
//!
//! - [`HeuristicDetector`] - tool name or intent phrase in the text (default).
//!   False positives are expected; multiple tools can fire per response.
//! - [`StructuredDetector`] - explicit `{"tool": "...", "params": {...}}` objects.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::config::ToolDetection;

/// Phrases that signal the agent wants to use a tool without naming it
static INTENT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(i need to use|i'll use|i will use|let me (search|look up|check|find|read|fetch|use)|i will (search|read|look up|fetch|check))\b",
    )
    .unwrap()
});

static URL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s<>"'`)\]]+"#).unwrap());

/// A tool the agent intends to call
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub params: Value,
}

impl ToolInvocation {
    pub fn new(tool_name: impl Into<String>, params: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            params,
        }
    }
}

/// Decide whether a model response invokes any of the allowed tools
pub trait ToolUseDetector: Send + Sync {
    /// Invocations in the order they should be dispatched
    fn detect(
        &self,
        response: &str,
        allowed_tools: &[String],
        task_description: &str,
    ) -> Vec<ToolInvocation>;

    /// Instruction appended to the agent's tool list
    fn prompt_hint(&self) -> &str {
        "When you want to use a tool, name it explicitly before using it."
    }
}

/// String-matching detector
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicDetector;

impl ToolUseDetector for HeuristicDetector {
    fn detect(
        &self,
        response: &str,
        allowed_tools: &[String],
        task_description: &str,
    ) -> Vec<ToolInvocation> {
        if allowed_tools.is_empty() {
            return Vec::new();
        }

        let lowered = response.to_lowercase();
        let intent = INTENT_PATTERN.is_match(response);

        let mut params = json!({ "query": task_description });
        if let Some(url) = URL_PATTERN.find(response) {
            params["url"] = Value::String(url.as_str().trim_end_matches(['.', ',']).to_string());
        }

        allowed_tools
            .iter()
            .filter(|tool| intent || mentions(&lowered, tool))
            .map(|tool| ToolInvocation::new(tool.as_str(), params.clone()))
            .collect()
    }
}

/// `web_scrape` also matches "web scrape"
fn mentions(lowered_response: &str, tool: &str) -> bool {
    let tool = tool.to_lowercase();
    lowered_response.contains(&tool)
        || (tool.contains('_') && lowered_response.contains(&tool.replace('_', " ")))
}

/// Recognises JSON tool-call objects embedded anywhere in the response
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredDetector;

impl ToolUseDetector for StructuredDetector {
    fn prompt_hint(&self) -> &str {
        r#"To use a tool, include a JSON object {"tool": "<name>", "params": {...}} in your answer."#
    }

    fn detect(
        &self,
        response: &str,
        allowed_tools: &[String],
        _task_description: &str,
    ) -> Vec<ToolInvocation> {
        let mut found = Vec::new();
        let mut offset = 0;

        while let Some(start) = response[offset..].find('{') {
            let begin = offset + start;
            let mut stream =
                serde_json::Deserializer::from_str(&response[begin..]).into_iter::<Map<String, Value>>();

            match stream.next() {
                Some(Ok(object)) => {
                    offset = begin + stream.byte_offset();
                    if let Some(invocation) = tool_call(object, allowed_tools) {
                        found.push(invocation);
                    }
                }
                _ => offset = begin + 1,
            }
        }

        found
    }
}

fn tool_call(mut object: Map<String, Value>, allowed_tools: &[String]) -> Option<ToolInvocation> {
    let name = object.get("tool")?.as_str()?.to_string();
    if !allowed_tools.iter().any(|t| *t == name) {
        return None;
    }
    let params = match object.remove("params") {
        Some(params @ Value::Object(_)) => params,
        _ => Value::Object(Map::new()),
    };
    Some(ToolInvocation::new(name, params))
}

/// Detector for a configured mode
pub fn detector_for(mode: ToolDetection) -> Arc<dyn ToolUseDetector> {
    match mode {
        ToolDetection::Heuristic => Arc::new(HeuristicDetector),
        ToolDetection::Structured => Arc::new(StructuredDetector),
    }
}
