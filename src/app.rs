use std::sync::Arc;

use ratatui::layout::Rect;
use tokio::sync::mpsc::UnboundedSender;

use pocketchat_core::{Backend, ChatSession, Config, ProgressFn, SubmitError};

use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub struct App {
    pub should_quit: bool,

    // Conversation
    pub session: ChatSession,
    pub events: UnboundedSender<AppEvent>,
    pub backend: Backend,
    pub model: String,
    pub stream_preview: bool,
    pub preview: String, // reply fragments received so far

    // Input box
    pub input: String,
    pub cursor: usize, // cursor position in input, in chars
    pub status: Option<String>,

    // Chat pane
    pub chat_scroll: u16,
    pub follow_bottom: bool,
    pub chat_height: u16,
    pub total_chat_lines: u16,
    pub chat_area: Option<Rect>, // updated during render, for mouse hit-testing

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation
}

impl App {
    pub fn new(session: ChatSession, config: &Config, events: UnboundedSender<AppEvent>) -> Self {
        Self {
            should_quit: false,

            session,
            events,
            backend: config.backend,
            model: config.default_model.clone(),
            stream_preview: config.stream_preview,
            preview: String::new(),

            input: String::new(),
            cursor: 0,
            status: None,

            chat_scroll: 0,
            follow_bottom: true,
            chat_height: 0,
            total_chat_lines: 0,
            chat_area: None,

            animation_frame: 0,
        }
    }

    /// Hand the input to the session. The box is only cleared when the
    /// session accepted it.
    pub fn submit_input(&mut self) {
        let submission = match self.session.submit(&self.input) {
            Ok(submission) => submission,
            Err(SubmitError::Empty) => return,
            Err(e @ SubmitError::Busy) => {
                self.status = Some(e.to_string());
                return;
            }
        };

        self.input.clear();
        self.cursor = 0;
        self.status = None;
        self.preview.clear();
        self.follow_bottom = true;

        let progress: Option<ProgressFn> = if self.stream_preview {
            let tx = self.events.clone();
            Some(Arc::new(move |fragment: &str| {
                let _ = tx.send(AppEvent::Token(fragment.to_string()));
            }))
        } else {
            None
        };

        let session = self.session.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            if let Err(e) = session.complete(submission, progress).await {
                tracing::error!(error = %e, "reply could not be recorded");
            }
            let _ = tx.send(AppEvent::ReplyFinished);
        });
    }

    pub fn on_token(&mut self, fragment: &str) {
        if self.session.is_awaiting_reply() {
            self.preview.push_str(fragment);
        }
    }

    pub fn on_reply_finished(&mut self) {
        self.preview.clear();
        self.animation_frame = 0;
        if self.status.is_some() && !self.session.is_awaiting_reply() {
            self.status = None;
        }
    }

    // Input editing
    pub fn insert_char(&mut self, c: char) {
        let byte_pos = char_to_byte_index(&self.input, self.cursor);
        self.input.insert(byte_pos, c);
        self.cursor += 1;
    }

    pub fn backspace(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let byte_pos = char_to_byte_index(&self.input, self.cursor);
            self.input.remove(byte_pos);
        }
    }

    pub fn delete(&mut self) {
        if self.cursor < self.input.chars().count() {
            let byte_pos = char_to_byte_index(&self.input, self.cursor);
            self.input.remove(byte_pos);
        }
    }

    pub fn cursor_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn cursor_right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.input.chars().count());
    }

    pub fn cursor_home(&mut self) {
        self.cursor = 0;
    }

    pub fn cursor_end(&mut self) {
        self.cursor = self.input.chars().count();
    }

    // Chat scrolling
    fn max_scroll(&self) -> u16 {
        self.total_chat_lines.saturating_sub(self.chat_height)
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
        self.follow_bottom = self.chat_scroll >= self.max_scroll();
    }

    pub fn scroll_down(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_add(lines).min(self.max_scroll());
        self.follow_bottom = self.chat_scroll >= self.max_scroll();
    }

    pub fn scroll_half_page_up(&mut self) {
        self.scroll_up((self.chat_height / 2).max(1));
    }

    pub fn scroll_half_page_down(&mut self) {
        self.scroll_down((self.chat_height / 2).max(1));
    }

    /// Called by the renderer once it knows how tall the transcript is
    pub fn update_chat_metrics(&mut self, total_lines: u16, height: u16) {
        self.total_chat_lines = total_lines;
        self.chat_height = height;
        if self.follow_bottom {
            self.chat_scroll = self.max_scroll();
        } else {
            self.chat_scroll = self.chat_scroll.min(self.max_scroll());
        }
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.session.is_awaiting_reply() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pocketchat_core::{
        ContextPolicy, GatewayError, InferenceGateway, Prompt, Sender, PLACEHOLDER_TEXT,
    };
    use tokio::sync::{mpsc, Notify};

    struct HeldGateway {
        release: Notify,
    }

    #[async_trait]
    impl InferenceGateway for HeldGateway {
        fn name(&self) -> &str {
            "held"
        }

        fn context_policy(&self) -> ContextPolicy {
            ContextPolicy::LatestOnly
        }

        async fn complete(
            &self,
            prompt: Prompt,
            progress: Option<ProgressFn>,
        ) -> Result<String, GatewayError> {
            if let Some(progress) = progress {
                progress("partial");
            }
            self.release.notified().await;
            Ok(format!("re: {}", prompt.latest_user_text().unwrap_or_default()))
        }
    }

    fn test_app(
        stream_preview: bool,
    ) -> (App, Arc<HeldGateway>, mpsc::UnboundedReceiver<AppEvent>) {
        let gateway = Arc::new(HeldGateway {
            release: Notify::new(),
        });
        let session = ChatSession::new(gateway.clone(), Some("Hello! Ask me anything."));
        let (tx, rx) = mpsc::unbounded_channel();
        let mut config = Config::new();
        config.stream_preview = stream_preview;
        (App::new(session, &config, tx), gateway, rx)
    }

    #[test]
    fn test_char_to_byte_index_multibyte() {
        assert_eq!(char_to_byte_index("héllo", 2), 3);
        assert_eq!(char_to_byte_index("abc", 10), 3);
    }

    #[tokio::test]
    async fn test_editing_is_utf8_safe() {
        let (mut app, _, _) = test_app(false);
        for c in "añb".chars() {
            app.insert_char(c);
        }
        app.cursor_left();
        app.backspace();
        assert_eq!(app.input, "ab");
        app.cursor_home();
        app.delete();
        assert_eq!(app.input, "b");
        app.cursor_end();
        app.insert_char('ü');
        assert_eq!(app.input, "bü");
        assert_eq!(app.cursor, 2);
    }

    #[tokio::test]
    async fn test_blank_submit_keeps_input() {
        let (mut app, _, _) = test_app(false);
        app.input = "   ".to_string();
        app.submit_input();
        assert_eq!(app.input, "   ");
        assert!(!app.session.is_awaiting_reply());
        assert_eq!(app.session.snapshot().0.len(), 1);
    }

    #[tokio::test]
    async fn test_submit_clears_input_and_rejects_while_waiting() {
        let (mut app, gateway, mut rx) = test_app(false);
        app.input = "What is 2+2?".to_string();
        app.cursor = app.input.chars().count();
        app.submit_input();

        assert!(app.input.is_empty());
        assert_eq!(app.cursor, 0);
        assert!(app.session.is_awaiting_reply());
        let (_, placeholder) = app.session.snapshot();
        assert_eq!(placeholder.unwrap().text(), PLACEHOLDER_TEXT);

        app.input = "another".to_string();
        app.submit_input();
        assert_eq!(app.input, "another");
        assert!(app.status.is_some());

        gateway.release.notify_one();
        loop {
            match rx.recv().await {
                Some(AppEvent::ReplyFinished) => break,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
        app.on_reply_finished();

        let (turns, placeholder) = app.session.snapshot();
        assert!(placeholder.is_none());
        assert!(app.status.is_none());
        let last = turns.last().unwrap();
        assert_eq!(last.sender(), Sender::Assistant);
        assert_eq!(last.text(), "re: What is 2+2?");
    }

    #[tokio::test]
    async fn test_stream_preview_collects_fragments() {
        let (mut app, gateway, mut rx) = test_app(true);
        app.input = "hi".to_string();
        app.submit_input();

        match rx.recv().await {
            Some(AppEvent::Token(fragment)) => app.on_token(&fragment),
            other => panic!("expected token, got {:?}", other),
        }
        assert_eq!(app.preview, "partial");

        gateway.release.notify_one();
        while !matches!(rx.recv().await, Some(AppEvent::ReplyFinished)) {}
        app.on_reply_finished();
        assert!(app.preview.is_empty());
    }

    #[tokio::test]
    async fn test_scroll_follows_bottom_until_user_scrolls() {
        let (mut app, _, _) = test_app(false);
        app.update_chat_metrics(50, 10);
        assert_eq!(app.chat_scroll, 40);

        app.scroll_up(5);
        assert!(!app.follow_bottom);
        app.update_chat_metrics(60, 10);
        assert_eq!(app.chat_scroll, 35);

        app.scroll_down(100);
        assert!(app.follow_bottom);
        assert_eq!(app.chat_scroll, 50);
    }
}
