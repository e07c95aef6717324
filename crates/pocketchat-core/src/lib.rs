pub mod config;
pub mod context;
pub mod gateway;
pub mod provider;
pub mod session;
pub mod state;
pub mod transcript;

// Re-export main types for convenience
pub use config::Config;
pub use context::{ContextPolicy, Prompt, PromptMessage, PromptRole};
pub use gateway::{
    EmbeddedGateway, GatewayError, HttpGateway, InferenceGateway, ModelRuntime, OllamaClient,
    OllamaRuntime, ProgressFn,
};
pub use provider::Backend;
pub use session::{ChatSession, SessionError};
pub use state::{ChatTurn, Sender, TurnId, FAILURE_REPLY, PLACEHOLDER_TEXT};
pub use transcript::{StoreState, SubmitError, Submission, TranscriptStore};
