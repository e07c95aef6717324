//! A transcript bound to one inference gateway
//!
//! [`ChatSession`] is cheap to clone and safe to share between tasks. The
//! store lives behind a mutex that is only held for the synchronous
//! check-and-set in `submit` and the swap in `resolve`, never across the
//! gateway call.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::Notify;

use crate::gateway::{GatewayError, InferenceGateway, ProgressFn};
use crate::state::ChatTurn;
use crate::transcript::{ResolveError, StoreState, SubmitError, Submission, TranscriptStore};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

#[derive(Clone)]
pub struct ChatSession {
    store: Arc<Mutex<TranscriptStore>>,
    gateway: Arc<dyn InferenceGateway>,
    settled: Arc<Notify>,
}

impl ChatSession {
    pub fn new(gateway: Arc<dyn InferenceGateway>, greeting: Option<&str>) -> Self {
        let policy = gateway.context_policy();
        let store = match greeting {
            Some(greeting) => TranscriptStore::with_greeting(policy, greeting),
            None => TranscriptStore::new(policy),
        };
        Self {
            store: Arc::new(Mutex::new(store)),
            gateway,
            settled: Arc::new(Notify::new()),
        }
    }

    // A panic while holding the lock cannot leave the store half-updated,
    // every mutation completes before the guard drops.
    fn store(&self) -> MutexGuard<'_, TranscriptStore> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn gateway_name(&self) -> &str {
        self.gateway.name()
    }

    pub async fn initialize(&self) -> Result<(), GatewayError> {
        self.gateway.initialize().await
    }

    pub async fn cleanup(&self) {
        self.gateway.cleanup().await;
    }

    pub fn submit(&self, text: &str) -> Result<Submission, SubmitError> {
        self.store().submit(text)
    }

    /// Run the gateway for an accepted submission and record the outcome
    pub async fn complete(
        &self,
        submission: Submission,
        progress: Option<ProgressFn>,
    ) -> Result<ChatTurn, ResolveError> {
        let Submission { prompt, ticket, .. } = submission;
        // A panicking backend still has to close the reply cycle
        let outcome = AssertUnwindSafe(self.gateway.complete(prompt, progress))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(GatewayError::Backend("gateway panicked".to_string())));
        let turn = self.store().resolve(ticket, outcome).cloned();
        self.settled.notify_waiters();
        turn
    }

    /// Wait up to `limit` for the pending reply, if any, to be recorded.
    /// Returns false when a reply is still in flight afterwards.
    pub async fn settle(&self, limit: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.settled.notified();
                if !self.is_awaiting_reply() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(limit, wait).await.is_ok()
    }

    /// Submit and wait for the reply in one step
    pub async fn send(
        &self,
        text: &str,
        progress: Option<ProgressFn>,
    ) -> Result<ChatTurn, SessionError> {
        let submission = self.submit(text)?;
        Ok(self.complete(submission, progress).await?)
    }

    pub fn state(&self) -> StoreState {
        self.store().state()
    }

    pub fn is_awaiting_reply(&self) -> bool {
        self.store().is_awaiting_reply()
    }

    /// Chronological copy of the transcript with the pending placeholder, if any
    pub fn snapshot(&self) -> (Vec<ChatTurn>, Option<ChatTurn>) {
        let store = self.store();
        (store.turns().to_vec(), store.placeholder().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextPolicy, Prompt};
    use crate::state::{Sender, FAILURE_REPLY, PLACEHOLDER_TEXT};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Waits for `release` before answering, and counts overlapping calls
    struct GatedGateway {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        release: Notify,
        fail: bool,
    }

    impl GatedGateway {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                release: Notify::new(),
                fail,
            }
        }
    }

    #[async_trait]
    impl InferenceGateway for GatedGateway {
        fn name(&self) -> &str {
            "gated"
        }

        fn context_policy(&self) -> ContextPolicy {
            ContextPolicy::LatestOnly
        }

        async fn complete(
            &self,
            prompt: Prompt,
            _progress: Option<ProgressFn>,
        ) -> Result<String, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.release.notified().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                return Err(GatewayError::Backend("boom".into()));
            }
            let text = prompt.latest_user_text().unwrap_or_default().to_string();
            Ok(format!("echo: {}", text))
        }
    }

    #[tokio::test]
    async fn test_send_round_trip() {
        let gateway = Arc::new(GatedGateway::new(false));
        let session = ChatSession::new(gateway.clone(), Some("Hello! Ask me anything."));

        let task = {
            let session = session.clone();
            tokio::spawn(async move { session.send("What is 2+2?", None).await })
        };

        while gateway.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(session.state(), StoreState::AwaitingReply);
        let (turns, placeholder) = session.snapshot();
        assert_eq!(turns.len(), 3);
        assert_eq!(placeholder.unwrap().text(), PLACEHOLDER_TEXT);

        gateway.release.notify_one();
        let reply = task.await.unwrap().unwrap();
        assert_eq!(reply.text(), "echo: What is 2+2?");
        assert_eq!(reply.sender(), Sender::Assistant);

        let (turns, placeholder) = session.snapshot();
        assert_eq!(turns.len(), 3);
        assert!(placeholder.is_none());
        assert_eq!(session.state(), StoreState::Idle);
    }

    #[tokio::test]
    async fn test_failure_becomes_fixed_reply() {
        let gateway = Arc::new(GatedGateway::new(true));
        let session = ChatSession::new(gateway.clone(), None);

        let submission = session.submit("hi").unwrap();
        gateway.release.notify_one();
        let reply = session.complete(submission, None).await.unwrap();
        assert_eq!(reply.text(), FAILURE_REPLY);
        assert!(!session.is_awaiting_reply());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submitters_get_one_flight() {
        let gateway = Arc::new(GatedGateway::new(false));
        let session = ChatSession::new(gateway.clone(), None);

        let mut handles = Vec::new();
        for i in 0..16 {
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                session.send(&format!("message {}", i), None).await
            }));
        }

        while gateway.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        // Let every rejected submitter finish before releasing the one in flight
        let mut busy = 0;
        let mut accepted = Vec::new();
        for handle in handles {
            if handle.is_finished() {
                match handle.await.unwrap() {
                    Err(SessionError::Submit(SubmitError::Busy)) => busy += 1,
                    other => panic!("unexpected result: {:?}", other.map(|t| t.text().to_string())),
                }
            } else {
                accepted.push(handle);
            }
        }
        while accepted.len() > 1 {
            // Rejections may still be finishing; poll until only the flight remains
            tokio::task::yield_now().await;
            let mut still_running = Vec::new();
            for handle in accepted {
                if handle.is_finished() {
                    let result = handle.await.unwrap();
                    assert!(matches!(result, Err(SessionError::Submit(SubmitError::Busy))));
                    busy += 1;
                } else {
                    still_running.push(handle);
                }
            }
            accepted = still_running;
        }

        gateway.release.notify_one();
        let reply = accepted.pop().unwrap().await.unwrap().unwrap();
        assert!(reply.text().starts_with("echo: message "));

        assert_eq!(busy, 15);
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(session.snapshot().0.len(), 2);
    }

    struct PanickingGateway;

    #[async_trait]
    impl InferenceGateway for PanickingGateway {
        fn name(&self) -> &str {
            "panicking"
        }

        fn context_policy(&self) -> ContextPolicy {
            ContextPolicy::default()
        }

        async fn complete(
            &self,
            _prompt: Prompt,
            _progress: Option<ProgressFn>,
        ) -> Result<String, GatewayError> {
            panic!("runtime crashed");
        }
    }

    #[tokio::test]
    async fn test_gateway_panic_becomes_fixed_reply() {
        let session = ChatSession::new(Arc::new(PanickingGateway), None);

        let task = {
            let session = session.clone();
            tokio::spawn(async move { session.send("hi", None).await })
        };
        let reply = task.await.unwrap().unwrap();
        assert_eq!(reply.text(), FAILURE_REPLY);

        assert_eq!(session.state(), StoreState::Idle);
        let (turns, placeholder) = session.snapshot();
        assert_eq!(turns.len(), 2);
        assert!(placeholder.is_none());
        assert!(session.submit("again").is_ok());
    }

    #[tokio::test]
    async fn test_settle_waits_for_pending_reply() {
        let gateway = Arc::new(GatedGateway::new(false));
        let session = ChatSession::new(gateway.clone(), None);
        assert!(session.settle(Duration::from_millis(10)).await);

        let submission = session.submit("hi").unwrap();
        let task = {
            let session = session.clone();
            tokio::spawn(async move { session.complete(submission, None).await })
        };
        assert!(!session.settle(Duration::from_millis(50)).await);

        gateway.release.notify_one();
        assert!(session.settle(Duration::from_secs(5)).await);
        assert!(!session.is_awaiting_reply());
        task.await.unwrap().unwrap();
    }
}
