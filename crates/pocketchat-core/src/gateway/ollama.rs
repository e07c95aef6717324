use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{GatewayError, InferenceGateway, ModelRuntime, ProgressFn};
use crate::context::{ContextPolicy, Prompt, PromptMessage};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<u32>,
}

#[derive(Deserialize)]
struct ChatChunkMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChatChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

#[derive(Deserialize)]
struct OllamaModelsResponse {
    models: Vec<OllamaModel>,
}

/// HTTP plumbing for a local Ollama server
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Self {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Self {
        let client = match Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "could not configure HTTP client, falling back to one without timeouts"
                );
                Client::new()
            }
        };
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Single-prompt, non-streaming completion via `/api/generate`
    pub async fn generate(&self, model: &str, prompt: &str) -> Result<String, GatewayError> {
        let url = format!("{}/api/generate", self.base_url);
        tracing::debug!(%url, model, "ollama generate");

        let request = GenerateRequest {
            model,
            prompt,
            stream: false,
        };

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(GatewayError::Status {
                status: response.status(),
            });
        }

        let body: GenerateResponse = response.json().await?;
        Ok(body.response)
    }

    /// Streaming chat completion via `/api/chat`.
    ///
    /// The server answers with one JSON object per line; every content
    /// fragment is handed to `progress` and appended to the returned reply.
    pub async fn chat_stream(
        &self,
        model: &str,
        messages: &[PromptMessage],
        progress: Option<&ProgressFn>,
    ) -> Result<String, GatewayError> {
        let url = format!("{}/api/chat", self.base_url);
        tracing::debug!(%url, model, messages = messages.len(), "ollama chat");

        let request = ChatRequest {
            model,
            messages,
            stream: true,
            keep_alive: None,
        };

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(GatewayError::Status {
                status: response.status(),
            });
        }

        let mut stream = response.bytes_stream();
        let mut buf: Vec<u8> = Vec::new();
        let mut reply = String::new();

        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
            while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                if apply_chat_line(&line, &mut reply, progress)? {
                    return Ok(reply);
                }
            }
        }

        // Last object may arrive without a trailing newline
        if !buf.is_empty() && apply_chat_line(&buf, &mut reply, progress)? {
            return Ok(reply);
        }

        Err(GatewayError::Malformed(
            "chat stream ended before completion".to_string(),
        ))
    }

    /// Ask the server to load `model` into memory
    pub async fn load_model(&self, model: &str) -> Result<(), GatewayError> {
        self.empty_chat(model, None).await
    }

    /// Ask the server to evict `model` from memory
    pub async fn unload_model(&self, model: &str) -> Result<(), GatewayError> {
        self.empty_chat(model, Some(0)).await
    }

    async fn empty_chat(&self, model: &str, keep_alive: Option<u32>) -> Result<(), GatewayError> {
        let url = format!("{}/api/chat", self.base_url);
        let request = ChatRequest {
            model,
            messages: &[],
            stream: false,
            keep_alive,
        };

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(GatewayError::Status {
                status: response.status(),
            });
        }
        Ok(())
    }

    pub async fn list_models(&self) -> Result<Vec<String>, GatewayError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(GatewayError::Status {
                status: response.status(),
            });
        }

        let models_response: OllamaModelsResponse = response.json().await?;
        let model_names: Vec<String> = models_response
            .models
            .into_iter()
            .map(|model| model.name)
            .collect();

        Ok(model_names)
    }

    /// `llama3.2` matches an installed `llama3.2:latest`
    pub async fn has_model(&self, name: &str) -> Result<bool, GatewayError> {
        let models = self.list_models().await?;
        let tagged = format!("{}:latest", name);
        Ok(models.iter().any(|m| m == name || *m == tagged))
    }
}

/// Returns true once the server marks the stream done
fn apply_chat_line(
    line: &[u8],
    reply: &mut String,
    progress: Option<&ProgressFn>,
) -> Result<bool, GatewayError> {
    let text = std::str::from_utf8(line)
        .map_err(|e| GatewayError::Malformed(e.to_string()))?
        .trim();
    if text.is_empty() {
        return Ok(false);
    }

    let chunk: ChatChunk =
        serde_json::from_str(text).map_err(|e| GatewayError::Malformed(e.to_string()))?;

    if let Some(error) = chunk.error {
        return Err(GatewayError::Backend(error));
    }

    if let Some(message) = chunk.message {
        if !message.content.is_empty() {
            if let Some(progress) = progress {
                progress(&message.content);
            }
            reply.push_str(&message.content);
        }
    }

    Ok(chunk.done)
}

/// The HTTP backend: the latest user text goes to `/api/generate` as is
pub struct HttpGateway {
    client: OllamaClient,
    model: String,
}

impl HttpGateway {
    pub fn new(client: OllamaClient, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }

    pub async fn fetch_response(&self, prompt_text: &str) -> Result<String, GatewayError> {
        self.client.generate(&self.model, prompt_text).await
    }
}

#[async_trait]
impl InferenceGateway for HttpGateway {
    fn name(&self) -> &str {
        "http"
    }

    fn context_policy(&self) -> ContextPolicy {
        ContextPolicy::LatestOnly
    }

    async fn complete(
        &self,
        prompt: Prompt,
        _progress: Option<ProgressFn>,
    ) -> Result<String, GatewayError> {
        let text = prompt.latest_user_text().unwrap_or_default();
        self.fetch_response(text).await
    }
}

/// A [`ModelRuntime`] hosted by a local Ollama daemon.
///
/// Loading checks that the model is installed and warms it; releasing asks
/// the daemon to evict it.
pub struct OllamaRuntime {
    client: OllamaClient,
    model: String,
}

impl OllamaRuntime {
    pub fn new(client: OllamaClient, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl ModelRuntime for OllamaRuntime {
    async fn load(&self) -> Result<(), GatewayError> {
        if !self.client.has_model(&self.model).await? {
            return Err(GatewayError::ModelMissing {
                model: self.model.clone(),
            });
        }
        self.client.load_model(&self.model).await
    }

    async fn completion(
        &self,
        messages: &[PromptMessage],
        progress: Option<&ProgressFn>,
    ) -> Result<String, GatewayError> {
        self.client.chat_stream(&self.model, messages, progress).await
    }

    async fn release(&self) -> Result<(), GatewayError> {
        self.client.unload_model(&self.model).await
    }
}
