//! Configuration for the ticket desk.
//!
//! Settings are layered: `.beanbotics/desk.toml` (or `--config`) →
//! environment variables → CLI flags. Every section and field is optional in
//! the file; missing values take the defaults below.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 5000
//! dev_mode = false
//!
//! [events]
//! capacity = 256
//!
//! [agent]
//! enabled = true
//! identity = "BeanBotics AI"
//! timeout_secs = 120
//!
//! [reasoning]
//! backend = "command"          # none | command | openai
//! command = "claude"
//! args = ["--print", "--output-format", "text"]
//! api_base = "https://api.openai.com/v1"
//! model = "gpt-4o-mini"
//! api_key_env = "OPENAI_API_KEY"
//!
//! [guides]
//! dir = "troubleshooting"
//!
//! [logging]
//! json = false
//! # dir = ".beanbotics/logs"
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::desk::agent::AGENT_IDENTITY;
use crate::desk::events::DEFAULT_CAPACITY;

pub const DEFAULT_CONFIG_PATH: &str = ".beanbotics/desk.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeskConfig {
    pub server: ServerSettings,
    pub events: EventSettings,
    pub agent: AgentSettings,
    pub reasoning: ReasoningSettings,
    pub guides: GuideSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Permissive CORS and bind on all interfaces.
    pub dev_mode: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSettings {
    /// Per-subscriber queue depth before the oldest events are dropped.
    pub capacity: usize,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub enabled: bool,
    pub identity: String,
    pub timeout_secs: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            identity: AGENT_IDENTITY.to_string(),
            timeout_secs: 120,
        }
    }
}

impl AgentSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningBackend {
    #[default]
    None,
    Command,
    OpenAi,
}

impl std::fmt::Display for ReasoningBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReasoningBackend::None => write!(f, "none"),
            ReasoningBackend::Command => write!(f, "command"),
            ReasoningBackend::OpenAi => write!(f, "openai"),
        }
    }
}

impl FromStr for ReasoningBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "" => Ok(ReasoningBackend::None),
            "command" => Ok(ReasoningBackend::Command),
            "openai" => Ok(ReasoningBackend::OpenAi),
            _ => anyhow::bail!(
                "Invalid reasoning backend '{}'. Valid values: none, command, openai",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningSettings {
    pub backend: ReasoningBackend,
    /// Executable for the `command` backend; the prompt is appended as `-p <prompt>`.
    pub command: String,
    pub args: Vec<String>,
    pub api_base: String,
    pub model: String,
    /// Name of the environment variable holding the API key, never the key itself.
    pub api_key_env: String,
}

impl Default for ReasoningSettings {
    fn default() -> Self {
        Self {
            backend: ReasoningBackend::None,
            command: "claude".to_string(),
            args: vec![
                "--print".to_string(),
                "--output-format".to_string(),
                "text".to_string(),
            ],
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuideSettings {
    pub dir: PathBuf,
}

impl Default for GuideSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("troubleshooting"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub json: bool,
    /// When set, logs are also written to a daily-rolling file in this directory.
    pub dir: Option<PathBuf>,
}

impl DeskConfig {
    /// Load from `path` if it exists (defaults otherwise), then apply
    /// environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            Self::from_toml_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid desk configuration")
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Apply `BEANBOTICS_*` overrides using `lookup` to read variables.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("BEANBOTICS_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("BEANBOTICS_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("BEANBOTICS_PORT is not a valid port: {}", port))?;
        }
        if let Some(backend) = lookup("BEANBOTICS_REASONING_BACKEND") {
            self.reasoning.backend = backend.parse()?;
        }
        if let Some(cmd) = lookup("BEANBOTICS_REASONING_CMD") {
            self.reasoning.command = cmd;
        }
        if let Some(model) = lookup("BEANBOTICS_REASONING_MODEL") {
            self.reasoning.model = model;
        }
        if let Some(dir) = lookup("BEANBOTICS_GUIDES_DIR") {
            self.guides.dir = PathBuf::from(dir);
        }
        if let Some(identity) = lookup("BEANBOTICS_AGENT_IDENTITY") {
            self.agent.identity = identity;
        }
        Ok(())
    }

    /// Human-readable warnings for settings that will not work as intended.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.events.capacity == 0 {
            warnings.push("events.capacity is 0; a queue depth of 1 will be used".to_string());
        }
        if self.agent.identity.trim().is_empty() {
            warnings.push(
                "agent.identity is empty; the loop guard cannot recognise agent comments"
                    .to_string(),
            );
        }
        if self.agent.timeout_secs == 0 {
            warnings.push("agent.timeout_secs is 0; every reasoning call will time out".to_string());
        }
        match self.reasoning.backend {
            ReasoningBackend::None if self.agent.enabled => warnings.push(
                "agent.enabled is true but reasoning.backend is none; the agent will not start"
                    .to_string(),
            ),
            ReasoningBackend::Command if self.reasoning.command.trim().is_empty() => {
                warnings.push("reasoning.command is empty".to_string())
            }
            ReasoningBackend::OpenAi if self.reasoning.model.trim().is_empty() => {
                warnings.push("reasoning.model is empty".to_string())
            }
            _ => {}
        }
        if !self.guides.dir.exists() {
            warnings.push(format!(
                "guides.dir {} does not exist; guide lookups will report not found",
                self.guides.dir.display()
            ));
        }
        warnings
    }
}
