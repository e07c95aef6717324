//! The chat transcript and its single-flight reply cycle
//!
//! A [`TranscriptStore`] is either idle or awaiting exactly one reply. While a
//! reply is pending the transcript ends with a placeholder turn, which is
//! swapped for the final assistant turn when the reply (or a failure) comes
//! back. Submissions made while a reply is pending are rejected here, not in
//! the UI.

use thiserror::Error;

use crate::context::{ContextPolicy, Prompt};
use crate::gateway::GatewayError;
use crate::state::{ChatTurn, Sender, TurnId, FAILURE_REPLY, PLACEHOLDER_TEXT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    Idle,
    AwaitingReply,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Message is empty")]
    Empty,
    #[error("Still waiting for the previous reply")]
    Busy,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Reply does not belong to the pending turn")]
    StaleTicket,
}

/// Proof that a submission was accepted. Consumed by [`TranscriptStore::resolve`].
#[derive(Debug)]
pub struct ReplyTicket {
    placeholder: TurnId,
}

impl ReplyTicket {
    pub fn placeholder(&self) -> TurnId {
        self.placeholder
    }
}

/// An accepted submission: what to send, and how to report back
#[derive(Debug)]
pub struct Submission {
    pub user_turn: TurnId,
    pub prompt: Prompt,
    pub ticket: ReplyTicket,
}

#[derive(Debug, Clone)]
pub struct TranscriptStore {
    // Chronological; display order is the reverse
    turns: Vec<ChatTurn>,
    pending: Option<TurnId>,
    next_id: u64,
    policy: ContextPolicy,
}

impl TranscriptStore {
    pub fn new(policy: ContextPolicy) -> Self {
        Self {
            turns: Vec::new(),
            pending: None,
            next_id: 0,
            policy,
        }
    }

    /// Start the transcript with an assistant greeting
    pub fn with_greeting(policy: ContextPolicy, greeting: &str) -> Self {
        let mut store = Self::new(policy);
        let id = store.allocate_id();
        store.turns.push(ChatTurn::new(id, Sender::Assistant, greeting));
        store
    }

    fn allocate_id(&mut self) -> TurnId {
        let id = TurnId::new(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn state(&self) -> StoreState {
        if self.pending.is_some() {
            StoreState::AwaitingReply
        } else {
            StoreState::Idle
        }
    }

    pub fn is_awaiting_reply(&self) -> bool {
        self.pending.is_some()
    }

    /// Turns in chronological order
    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn placeholder(&self) -> Option<&ChatTurn> {
        let id = self.pending?;
        self.turns.iter().find(|t| t.id() == id)
    }

    /// Accept user text and open a reply cycle.
    ///
    /// The busy check and the flag set happen in the same call, so a second
    /// submission can never slip in between them.
    pub fn submit(&mut self, text: &str) -> Result<Submission, SubmitError> {
        if self.pending.is_some() {
            return Err(SubmitError::Busy);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(SubmitError::Empty);
        }

        let user_turn = self.allocate_id();
        self.turns.push(ChatTurn::new(user_turn, Sender::User, text));

        let prompt = self.policy.derive(&self.turns);

        let placeholder = self.allocate_id();
        self.turns
            .push(ChatTurn::new(placeholder, Sender::Assistant, PLACEHOLDER_TEXT));
        self.pending = Some(placeholder);

        tracing::debug!(%user_turn, %placeholder, "submission accepted");

        Ok(Submission {
            user_turn,
            prompt,
            ticket: ReplyTicket { placeholder },
        })
    }

    /// Close the reply cycle opened by `ticket`, swapping the placeholder for
    /// the reply or for the fixed failure text.
    pub fn resolve(
        &mut self,
        ticket: ReplyTicket,
        outcome: Result<String, GatewayError>,
    ) -> Result<&ChatTurn, ResolveError> {
        if self.pending != Some(ticket.placeholder) {
            return Err(ResolveError::StaleTicket);
        }

        self.turns.retain(|t| t.id() != ticket.placeholder);
        self.pending = None;

        let text = match outcome {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "gateway call failed");
                FAILURE_REPLY.to_string()
            }
        };

        let id = self.allocate_id();
        self.turns.push(ChatTurn::new(id, Sender::Assistant, text));
        Ok(&self.turns[self.turns.len() - 1])
    }
}
