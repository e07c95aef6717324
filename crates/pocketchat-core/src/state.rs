//! UI-agnostic chat turn types
//!
//! These types are shared by the transcript store, the context policy and
//! whatever front-end renders the conversation. None of them depend on a UI
//! framework.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Text shown in the transient assistant turn while a reply is pending
pub const PLACEHOLDER_TEXT: &str = "Thinking...";

/// Text of the assistant turn that replaces the placeholder when the backend fails
pub const FAILURE_REPLY: &str = "Sorry, I couldn't get a response. Please try again.";

/// Identity of a turn, unique for the lifetime of its transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TurnId(u64);

impl TurnId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "turn-{}", self.0)
    }
}

/// Who authored a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

impl Sender {
    pub fn label(&self) -> &'static str {
        match self {
            Sender::User => "You",
            Sender::Assistant => "AI",
        }
    }
}

/// A single message in the transcript. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    id: TurnId,
    text: String,
    sender: Sender,
}

impl ChatTurn {
    pub(crate) fn new(id: TurnId, sender: Sender, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            sender,
        }
    }

    pub fn id(&self) -> TurnId {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn sender(&self) -> Sender {
        self.sender
    }
}
