//! Bounded conversation history.

use uuid::Uuid;

use super::message::{ChatMessage, Role};

/// Default cap on retained messages.
pub const DEFAULT_MAX_HISTORY_MESSAGES: usize = 100;

/// Ordered chat history trimmed from the front to a fixed message count.
///
/// Carries the session id handed to tools; clearing the history starts a
/// new session.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    messages: Vec<ChatMessage>,
    max_messages: usize,
    session_id: String,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY_MESSAGES)
    }
}

impl ConversationHistory {
    /// Creates an empty history keeping at most `max_messages` (minimum 1).
    #[must_use]
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_messages: max_messages.max(1),
            session_id: Uuid::new_v4().to_string(),
        }
    }

    /// Appends a message, dropping the oldest ones beyond the cap.
    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(ChatMessage {
            role,
            content: content.into(),
        });
        if self.messages.len() > self.max_messages {
            let excess = self.messages.len() - self.max_messages;
            self.messages.drain(..excess);
        }
    }

    /// Retained messages, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Number of retained messages.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether no messages are retained.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Current session id.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Maximum retained message count.
    #[must_use]
    pub const fn max_messages(&self) -> usize {
        self.max_messages
    }

    /// Drops every message and starts a new session.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.session_id = Uuid::new_v4().to_string();
    }
}
