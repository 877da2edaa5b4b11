//! Engine configuration
//!
//! Stored in `~/.config/crewflow/config.toml`.
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. CLI flags
//! 2. Environment variables (`OPENAI_API_KEY`, `CREWFLOW_PROVIDER`, `CREWFLOW_MODEL`, `CREWFLOW_BASE_URL`)
//! 3. Config file
//! 4. Defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crew::DEFAULT_TEMPERATURE;
use crate::error::{CrewError, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub defaults: ModelDefaults,
    #[serde(default)]
    pub runtime: RuntimeSettings,
    #[serde(default)]
    pub tools: ToolSettings,
    #[serde(default)]
    pub store: StoreSettings,
}

/// Which model backend to use
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderSettings {
    /// openai | mock
    #[serde(default = "default_provider")]
    pub name: String,
    pub api_key: Option<String>,
    /// OpenAI-compatible base URL override
    pub base_url: Option<String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            name: default_provider(),
            api_key: None,
            base_url: None,
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

/// Defaults applied when an agent's model config leaves a field empty
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelDefaults {
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: Option<u32>,
}

impl Default for ModelDefaults {
    fn default() -> Self {
        Self {
            model: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_max_tokens() -> Option<u32> {
    Some(4096)
}

/// How tool use is recognised in model output
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolDetection {
    #[default]
    Heuristic,
    Structured,
}

/// Timeouts and detection mode
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeSettings {
    /// Per-task model-call timeout; unset means no timeout
    pub task_timeout_secs: Option<u64>,
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
    #[serde(default)]
    pub tool_detection: ToolDetection,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            task_timeout_secs: None,
            tool_timeout_secs: default_tool_timeout(),
            tool_detection: ToolDetection::default(),
        }
    }
}

fn default_tool_timeout() -> u64 {
    30
}

impl RuntimeSettings {
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

/// Built-in tool settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSettings {
    /// Root directory for `file_lookup`
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    /// Let `web_scrape` reach localhost / private ranges
    #[serde(default)]
    pub allow_private_hosts: bool,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            allow_private_hosts: false,
        }
    }
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from(".")
}

/// Run record persistence
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoreSettings {
    /// Directory for JSON run records; unset keeps records in memory
    pub dir: Option<PathBuf>,
}

impl EngineConfig {
    /// Get the config directory path
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("crewflow")
    }

    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load from the default path (defaults if the file doesn't exist)
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load from `path`
    ///
    /// Returns defaults if the file doesn't exist, an error if it is malformed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| CrewError::EngineConfig {
            reason: format!("Failed to read config file '{}': {}", path.display(), e),
        })?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| CrewError::EngineConfig {
            reason: format!("Failed to parse config file: {}", e),
        })
    }

    /// Merge with environment variables (env wins over file values)
    pub fn with_env(mut self) -> Self {
        if let Some(key) = non_empty_env("OPENAI_API_KEY") {
            self.provider.api_key = Some(key);
        }
        if let Some(name) = non_empty_env("CREWFLOW_PROVIDER") {
            self.provider.name = name;
        }
        if let Some(model) = non_empty_env("CREWFLOW_MODEL") {
            self.defaults.model = Some(model);
        }
        if let Some(url) = non_empty_env("CREWFLOW_BASE_URL") {
            self.provider.base_url = Some(url);
        }
        self
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
