//! Gateway over a model runtime with an explicit load/release lifecycle

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{GatewayError, InferenceGateway, ProgressFn};
use crate::context::{ContextPolicy, Prompt, PromptMessage, PromptRole};

/// A model runtime that answers role-tagged conversations
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    /// Load the model into memory
    async fn load(&self) -> Result<(), GatewayError>;

    /// Produce a complete reply. Fragments are also passed to `progress` as
    /// they become available.
    async fn completion(
        &self,
        messages: &[PromptMessage],
        progress: Option<&ProgressFn>,
    ) -> Result<String, GatewayError>;

    /// Unload the model
    async fn release(&self) -> Result<(), GatewayError>;
}

pub struct EmbeddedGateway<R> {
    runtime: R,
    policy: ContextPolicy,
    loaded: Mutex<bool>,
}

impl<R: ModelRuntime> EmbeddedGateway<R> {
    pub fn new(runtime: R, policy: ContextPolicy) -> Self {
        Self {
            runtime,
            policy,
            loaded: Mutex::new(false),
        }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub async fn is_loaded(&self) -> bool {
        *self.loaded.lock().await
    }
}

#[async_trait]
impl<R: ModelRuntime> InferenceGateway for EmbeddedGateway<R> {
    fn name(&self) -> &str {
        "embedded"
    }

    fn context_policy(&self) -> ContextPolicy {
        self.policy.clone()
    }

    async fn initialize(&self) -> Result<(), GatewayError> {
        let mut loaded = self.loaded.lock().await;
        if *loaded {
            return Ok(());
        }
        self.runtime.load().await?;
        *loaded = true;
        tracing::info!("model runtime loaded");
        Ok(())
    }

    async fn complete(
        &self,
        prompt: Prompt,
        progress: Option<ProgressFn>,
    ) -> Result<String, GatewayError> {
        if !self.is_loaded().await {
            return Err(GatewayError::NotInitialized);
        }

        let messages = match prompt {
            Prompt::Chat(messages) => messages,
            Prompt::Text(text) => vec![PromptMessage::new(PromptRole::User, text)],
        };
        tracing::debug!(messages = messages.len(), "runtime completion");
        self.runtime.completion(&messages, progress.as_ref()).await
    }

    async fn cleanup(&self) {
        let mut loaded = self.loaded.lock().await;
        if !*loaded {
            return;
        }
        if let Err(e) = self.runtime.release().await {
            tracing::warn!(error = %e, "failed to release model runtime");
        }
        *loaded = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct CountingRuntime {
        loads: AtomicUsize,
        releases: AtomicUsize,
        last_messages: std::sync::Mutex<Vec<PromptMessage>>,
    }

    #[async_trait]
    impl ModelRuntime for CountingRuntime {
        async fn load(&self) -> Result<(), GatewayError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn completion(
            &self,
            messages: &[PromptMessage],
            progress: Option<&ProgressFn>,
        ) -> Result<String, GatewayError> {
            *self.last_messages.lock().unwrap() = messages.to_vec();
            if let Some(progress) = progress {
                progress("he");
                progress("llo");
            }
            Ok("hello".to_string())
        }

        async fn release(&self) -> Result<(), GatewayError> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let gateway = EmbeddedGateway::new(CountingRuntime::default(), ContextPolicy::default());
        gateway.initialize().await.unwrap();
        gateway.initialize().await.unwrap();
        assert_eq!(gateway.runtime().loads.load(Ordering::SeqCst), 1);
        assert!(gateway.is_loaded().await);
    }

    #[tokio::test]
    async fn test_complete_requires_initialize() {
        let gateway = EmbeddedGateway::new(CountingRuntime::default(), ContextPolicy::default());
        let result = gateway.complete(Prompt::Text("hi".into()), None).await;
        assert!(matches!(result, Err(GatewayError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_text_prompt_becomes_single_user_message() {
        let gateway = EmbeddedGateway::new(CountingRuntime::default(), ContextPolicy::default());
        gateway.initialize().await.unwrap();
        let reply = gateway.complete(Prompt::Text("hi".into()), None).await.unwrap();
        assert_eq!(reply, "hello");
        let sent = gateway.runtime().last_messages.lock().unwrap().clone();
        assert_eq!(sent, vec![PromptMessage::new(PromptRole::User, "hi")]);
    }

    #[tokio::test]
    async fn test_progress_fragments_are_forwarded() {
        let gateway = EmbeddedGateway::new(CountingRuntime::default(), ContextPolicy::default());
        gateway.initialize().await.unwrap();

        let seen = Arc::new(std::sync::Mutex::new(String::new()));
        let sink = seen.clone();
        let progress: ProgressFn =
            Arc::new(move |fragment| sink.lock().unwrap().push_str(fragment));

        gateway
            .complete(Prompt::Text("hi".into()), Some(progress))
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_cleanup_releases_once_and_allows_reload() {
        let gateway = EmbeddedGateway::new(CountingRuntime::default(), ContextPolicy::default());
        gateway.initialize().await.unwrap();
        gateway.cleanup().await;
        gateway.cleanup().await;
        assert_eq!(gateway.runtime().releases.load(Ordering::SeqCst), 1);
        assert!(!gateway.is_loaded().await);

        gateway.initialize().await.unwrap();
        assert_eq!(gateway.runtime().loads.load(Ordering::SeqCst), 2);
    }
}
