use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::context::{ContextPolicy, DEFAULT_CONTEXT_TURNS, DEFAULT_SYSTEM_PROMPT};
use crate::gateway::ollama::DEFAULT_BASE_URL;
use crate::gateway::{EmbeddedGateway, HttpGateway, InferenceGateway, OllamaClient, OllamaRuntime};
use crate::provider::Backend;

pub const DEFAULT_MODEL: &str = "llama3.2:latest";
pub const DEFAULT_GREETING: &str = "Hello! Ask me anything.";

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_ollama_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_context_turns() -> usize {
    DEFAULT_CONTEXT_TURNS
}

fn default_greeting() -> Option<String> {
    Some(DEFAULT_GREETING.to_string())
}

fn default_timeout() -> u64 {
    120
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub backend: Backend,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_context_turns")]
    pub context_turns: usize,
    #[serde(default = "default_greeting")]
    pub greeting: Option<String>,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub stream_preview: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            backend: Backend::default(),
            default_model: default_model(),
            ollama_url: default_ollama_url(),
            system_prompt: default_system_prompt(),
            context_turns: default_context_turns(),
            greeting: default_greeting(),
            request_timeout_secs: default_timeout(),
            stream_preview: false,
        }
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let config: Config = serde_json::from_str(&config_content)
            .with_context(|| format!("Invalid config file {}", config_path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(config_path, config_content)?;
        Ok(())
    }

    pub fn save_default_model(model: &str) -> Result<()> {
        let mut config = Self::load().unwrap_or_else(|_| Self::new());
        config.default_model = model.to_string();
        config.save()
    }

    pub fn config_dir() -> Result<PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("pocketchat"))
    }

    pub fn get_config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Apply `POCKETCHAT_BACKEND`, `POCKETCHAT_MODEL` and `OLLAMA_HOST`
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(backend) = lookup("POCKETCHAT_BACKEND") {
            self.backend = backend
                .parse()
                .map_err(|e: String| anyhow!("POCKETCHAT_BACKEND: {}", e))?;
        }
        if let Some(model) = lookup("POCKETCHAT_MODEL").filter(|m| !m.trim().is_empty()) {
            self.default_model = model;
        }
        if let Some(host) = lookup("OLLAMA_HOST").filter(|h| !h.trim().is_empty()) {
            self.ollama_url = normalize_host(&host);
        }
        Ok(())
    }

    pub fn context_policy(&self) -> ContextPolicy {
        match self.backend {
            Backend::Http => ContextPolicy::LatestOnly,
            Backend::Embedded => ContextPolicy::Window {
                system_prompt: self.system_prompt.clone(),
                turns: self.context_turns.max(1),
            },
        }
    }

    pub fn ollama_client(&self) -> OllamaClient {
        OllamaClient::with_timeout(
            &self.ollama_url,
            Duration::from_secs(self.request_timeout_secs),
        )
    }

    pub fn build_gateway(&self) -> Arc<dyn InferenceGateway> {
        let client = self.ollama_client();
        match self.backend {
            Backend::Http => Arc::new(HttpGateway::new(client, &self.default_model)),
            Backend::Embedded => Arc::new(EmbeddedGateway::new(
                OllamaRuntime::new(client, &self.default_model),
                self.context_policy(),
            )),
        }
    }
}

/// `OLLAMA_HOST` is often given without a scheme, e.g. `127.0.0.1:11434`
pub fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}
