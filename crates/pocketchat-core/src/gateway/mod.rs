//! Inference gateways: the external systems that turn a prompt into reply text

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::context::{ContextPolicy, Prompt};

pub mod embedded;
pub mod ollama;

pub use embedded::{EmbeddedGateway, ModelRuntime};
pub use ollama::{HttpGateway, OllamaClient, OllamaRuntime};

/// Receives reply fragments as a backend produces them
pub type ProgressFn = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Model runtime has not been initialized")]
    NotInitialized,
    #[error("Model '{model}' is not available. Pull it with: ollama pull {model}")]
    ModelMissing { model: String },
    #[error("Request failed with status {status}. Make sure Ollama is running with: ollama serve")]
    Status { status: reqwest::StatusCode },
    #[error("Backend reported an error: {0}")]
    Backend(String),
    #[error("Malformed response: {0}")]
    Malformed(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// A backend the chat session can hand prompts to.
///
/// Only one call to [`InferenceGateway::complete`] is ever outstanding per
/// session; implementations do not need to guard against overlap.
#[async_trait]
pub trait InferenceGateway: Send + Sync {
    /// Short label for logs and the UI header
    fn name(&self) -> &str;

    /// How the transcript is reduced to this gateway's input
    fn context_policy(&self) -> ContextPolicy;

    /// Prepare the backend. Must be idempotent.
    async fn initialize(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn complete(
        &self,
        prompt: Prompt,
        progress: Option<ProgressFn>,
    ) -> Result<String, GatewayError>;

    /// Release backend resources at session end
    async fn cleanup(&self) {}
}
