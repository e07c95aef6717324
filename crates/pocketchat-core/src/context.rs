//! Turning a transcript into gateway input
//!
//! Each backend declares a [`ContextPolicy`]. The HTTP backend only ever sees
//! the latest user text; the embedded-model backend gets a fixed system
//! instruction followed by a bounded window of recent turns. Older turns are
//! dropped silently, there is no token accounting.

use serde::{Deserialize, Serialize};

use crate::state::{ChatTurn, Sender};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant";
pub const DEFAULT_CONTEXT_TURNS: usize = 5;

/// Role tag of a message sent to a chat-style model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

impl From<Sender> for PromptRole {
    fn from(sender: Sender) -> Self {
        match sender {
            Sender::User => PromptRole::User,
            Sender::Assistant => PromptRole::Assistant,
        }
    }
}

/// One role-tagged message, serialized in Ollama's `{"role", "content"}` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: PromptRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Gateway input derived from the transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    /// Raw text of the latest user turn
    Text(String),
    /// System instruction followed by recent turns, oldest first
    Chat(Vec<PromptMessage>),
}

impl Prompt {
    /// The most recent user-authored text in this prompt
    pub fn latest_user_text(&self) -> Option<&str> {
        match self {
            Prompt::Text(text) => Some(text),
            Prompt::Chat(messages) => messages
                .iter()
                .rev()
                .find(|m| m.role == PromptRole::User)
                .map(|m| m.content.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextPolicy {
    LatestOnly,
    Window { system_prompt: String, turns: usize },
}

impl Default for ContextPolicy {
    fn default() -> Self {
        ContextPolicy::Window {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            turns: DEFAULT_CONTEXT_TURNS,
        }
    }
}

impl ContextPolicy {
    /// Build the prompt from committed turns in chronological order.
    ///
    /// `history` must already contain the just-submitted user turn and must
    /// not contain the pending placeholder.
    pub fn derive(&self, history: &[ChatTurn]) -> Prompt {
        match self {
            ContextPolicy::LatestOnly => {
                let latest = history
                    .iter()
                    .rev()
                    .find(|t| t.sender() == Sender::User)
                    .map(|t| t.text().to_string())
                    .unwrap_or_default();
                Prompt::Text(latest)
            }
            ContextPolicy::Window {
                system_prompt,
                turns,
            } => {
                // The window always holds at least the new user turn
                let start = history.len().saturating_sub((*turns).max(1));
                let mut messages = Vec::with_capacity(1 + history.len() - start);
                messages.push(PromptMessage::new(PromptRole::System, system_prompt.clone()));
                messages.extend(
                    history[start..]
                        .iter()
                        .map(|t| PromptMessage::new(t.sender().into(), t.text())),
                );
                Prompt::Chat(messages)
            }
        }
    }
}
