//! Error types with fix suggestions
//!
//! Error code ranges:
//! - CREW-000-019: Crew configuration errors (fatal, never recorded as steps)
//! - CREW-020-029: Model inference errors
//! - CREW-030-039: Execution / cancellation errors
//! - CREW-040-049: Run store errors
//! - CREW-050-059: Engine config and IO errors

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CrewError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

#[derive(Error, Debug)]
pub enum CrewError {
    // ─────────────────────────────────────────────────────────────
    // Crew configuration (CREW-000 to CREW-019)
    // ─────────────────────────────────────────────────────────────
    #[error("CREW-001: Failed to parse crew definition: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("CREW-002: Crew '{crew}' declares no agents")]
    NoAgents { crew: String },

    #[error("CREW-003: Duplicate agent id '{agent_id}'")]
    DuplicateAgent { agent_id: String },

    #[error("CREW-004: Duplicate task id '{task_id}'")]
    DuplicateTask { task_id: String },

    #[error("CREW-005: Task '{task_id}' is assigned to unknown agent '{agent_id}'")]
    UnknownAgent { task_id: String, agent_id: String },

    #[error("CREW-006: Task '{task_id}' has no assigned agent")]
    MissingAgent { task_id: String },

    // ─────────────────────────────────────────────────────────────
    // Model inference (CREW-020 to CREW-029)
    // ─────────────────────────────────────────────────────────────
    #[error("CREW-020: Model call failed for task '{task_id}': {reason}")]
    Model { task_id: String, reason: String },

    #[error("CREW-021: Model call for task '{task_id}' timed out after {limit:?}")]
    Timeout { task_id: String, limit: Duration },

    #[error("CREW-022: Provider error: {0}")]
    Provider(String),

    // ─────────────────────────────────────────────────────────────
    // Execution (CREW-030 to CREW-039)
    // ─────────────────────────────────────────────────────────────
    #[error("CREW-030: Run cancelled")]
    Cancelled,

    #[error("CREW-031: Task '{task_id}' was already scheduled in this run")]
    TaskReentered { task_id: String },

    #[error("CREW-032: Execution error: {0}")]
    Execution(String),

    // ─────────────────────────────────────────────────────────────
    // Run store (CREW-040 to CREW-049)
    // ─────────────────────────────────────────────────────────────
    #[error("CREW-040: Run store error for run '{run_id}': {reason}")]
    Store { run_id: String, reason: String },

    #[error("CREW-041: Run '{run_id}' not found in store")]
    RunNotFound { run_id: String },

    // ─────────────────────────────────────────────────────────────
    // Engine config and IO (CREW-050 to CREW-059)
    // ─────────────────────────────────────────────────────────────
    #[error("CREW-050: Invalid engine configuration: {reason}")]
    EngineConfig { reason: String },

    #[error("CREW-051: Invalid input '{input}': expected key=value")]
    InvalidInput { input: String },

    #[error("CREW-052: IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CrewError {
    /// Configuration errors are fatal and surface before any task runs.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::YamlParse(_)
                | Self::NoAgents { .. }
                | Self::DuplicateAgent { .. }
                | Self::DuplicateTask { .. }
                | Self::UnknownAgent { .. }
                | Self::MissingAgent { .. }
        )
    }

    /// Error code prefix (e.g. "CREW-020")
    pub fn code(&self) -> &'static str {
        match self {
            Self::YamlParse(_) => "CREW-001",
            Self::NoAgents { .. } => "CREW-002",
            Self::DuplicateAgent { .. } => "CREW-003",
            Self::DuplicateTask { .. } => "CREW-004",
            Self::UnknownAgent { .. } => "CREW-005",
            Self::MissingAgent { .. } => "CREW-006",
            Self::Model { .. } => "CREW-020",
            Self::Timeout { .. } => "CREW-021",
            Self::Provider(_) => "CREW-022",
            Self::Cancelled => "CREW-030",
            Self::TaskReentered { .. } => "CREW-031",
            Self::Execution(_) => "CREW-032",
            Self::Store { .. } => "CREW-040",
            Self::RunNotFound { .. } => "CREW-041",
            Self::EngineConfig { .. } => "CREW-050",
            Self::InvalidInput { .. } => "CREW-051",
            Self::Io(_) => "CREW-052",
        }
    }
}

impl FixSuggestion for CrewError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            CrewError::YamlParse(_) => Some("Check YAML syntax: indentation and quoting"),
            CrewError::NoAgents { .. } => Some("Declare at least one agent under agents:"),
            CrewError::DuplicateAgent { .. } => Some("Give every agent a unique id"),
            CrewError::DuplicateTask { .. } => Some("Give every task a unique id"),
            CrewError::UnknownAgent { .. } => {
                Some("Set the task's agent: field to the id of a declared agent")
            }
            CrewError::MissingAgent { .. } => {
                Some("Add an agent: field, or use process: hierarchical to delegate to the manager")
            }
            CrewError::Model { .. } => {
                Some("Check the provider API key, base URL and model id")
            }
            CrewError::Timeout { .. } => Some("Raise runtime.task_timeout_secs in the config"),
            CrewError::Provider(_) => {
                Some("Check provider name (openai, mock) and OPENAI_API_KEY")
            }
            CrewError::Cancelled => None,
            CrewError::TaskReentered { .. } => Some("Task ids must be unique within a crew"),
            CrewError::Execution(_) => None,
            CrewError::Store { .. } => Some("Check the run store directory is writable"),
            CrewError::RunNotFound { .. } => Some("Verify the run id"),
            CrewError::EngineConfig { .. } => {
                Some("Check ~/.config/crewflow/config.toml syntax")
            }
            CrewError::InvalidInput { .. } => Some("Pass inputs as -i key=value"),
            CrewError::Io(_) => Some("Check file path and permissions"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_flagged() {
        let err = CrewError::UnknownAgent {
            task_id: "t1".into(),
            agent_id: "ghost".into(),
        };
        assert!(err.is_configuration());
        assert_eq!(err.code(), "CREW-005");
        assert!(err.to_string().starts_with("CREW-005"));

        let err = CrewError::Model {
            task_id: "t1".into(),
            reason: "rate limited".into(),
        };
        assert!(!err.is_configuration());
    }

    #[test]
    fn timeout_message_keeps_sub_second_limit() {
        let err = CrewError::Timeout {
            task_id: "t1".into(),
            limit: Duration::from_millis(250),
        };
        assert!(err.to_string().ends_with("timed out after 250ms"), "{}", err);
    }

    #[test]
    fn every_code_matches_message_prefix() {
        let errors = vec![
            CrewError::NoAgents { crew: "c".into() },
            CrewError::MissingAgent { task_id: "t".into() },
            CrewError::Timeout { task_id: "t".into(), limit: Duration::from_secs(3) },
            CrewError::Cancelled,
            CrewError::Store { run_id: "r".into(), reason: "disk".into() },
            CrewError::InvalidInput { input: "x".into() },
        ];
        for err in errors {
            assert!(err.to_string().starts_with(err.code()), "{}", err);
        }
    }

    #[test]
    fn fix_suggestions_present_for_config_errors() {
        let err = CrewError::DuplicateTask { task_id: "t".into() };
        assert!(err.fix_suggestion().is_some());
        assert!(CrewError::Cancelled.fix_suggestion().is_none());
    }
}
