//! Language-model backends used by the agent and the guide selector.
//!
//! Two backends ship with the desk:
//! - `command`: runs a CLI (default `claude --print --output-format text`) with
//!   the prompt appended as `-p <prompt>` and reads stdout.
//! - `openai`: an OpenAI-compatible `/chat/completions` endpoint.

use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::process::Command;

use crate::config::{ReasoningBackend, ReasoningSettings};

#[async_trait]
pub trait Sampler: Send + Sync {
    /// Produce a completion for `prompt`. `system` may be empty.
    async fn sample(&self, system: &str, prompt: &str) -> Result<String>;

    fn name(&self) -> &str;
}

pub struct CommandSampler {
    command: String,
    args: Vec<String>,
}

impl CommandSampler {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    fn build_args(&self, system: &str, prompt: &str) -> Vec<String> {
        let mut args = self.args.clone();
        args.push("-p".to_string());
        args.push(prompt.to_string());
        if !system.is_empty() {
            args.push("--system-prompt".to_string());
            args.push(system.to_string());
        }
        args
    }
}

#[async_trait]
impl Sampler for CommandSampler {
    async fn sample(&self, system: &str, prompt: &str) -> Result<String> {
        let output = Command::new(&self.command)
            .args(self.build_args(system, prompt))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run reasoning command '{}'", self.command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Reasoning command failed ({}): {}", output.status, stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn name(&self) -> &str {
        &self.command
    }
}

pub struct OpenAiSampler {
    client: reqwest::Client,
    api_base: String,
    model: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl ChatCompletion {
    fn into_text(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .map(|s| s.trim().to_string())
    }
}

impl OpenAiSampler {
    pub fn new(
        api_base: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    fn request_body(&self, system: &str, prompt: &str) -> serde_json::Value {
        let mut messages = Vec::new();
        if !system.is_empty() {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": prompt }));
        json!({ "model": self.model, "messages": messages })
    }
}

#[async_trait]
impl Sampler for OpenAiSampler {
    async fn sample(&self, system: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_base);
        let completion = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(system, prompt))
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?
            .error_for_status()
            .context("Chat completion endpoint returned error status")?
            .json::<ChatCompletion>()
            .await
            .context("Failed to parse chat completion response")?;

        completion
            .into_text()
            .context("Chat completion response had no message content")
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Build the configured backend. `Ok(None)` means reasoning is switched off.
pub fn build_sampler(settings: &ReasoningSettings) -> Result<Option<Arc<dyn Sampler>>> {
    build_sampler_with(settings, |key| std::env::var(key).ok())
}

pub fn build_sampler_with(
    settings: &ReasoningSettings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Option<Arc<dyn Sampler>>> {
    match settings.backend {
        ReasoningBackend::None => Ok(None),
        ReasoningBackend::Command => {
            if settings.command.trim().is_empty() {
                anyhow::bail!("reasoning.command must be set for the command backend");
            }
            Ok(Some(Arc::new(CommandSampler::new(
                settings.command.clone(),
                settings.args.clone(),
            ))))
        }
        ReasoningBackend::OpenAi => {
            let api_key = lookup(&settings.api_key_env)
                .filter(|k| !k.trim().is_empty())
                .with_context(|| {
                    format!(
                        "{} is not set; the openai backend needs an API key",
                        settings.api_key_env
                    )
                })?;
            Ok(Some(Arc::new(OpenAiSampler::new(
                settings.api_base.clone(),
                settings.model.clone(),
                api_key,
            ))))
        }
    }
}
