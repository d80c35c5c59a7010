use chrono::Local;
use serde::{Deserialize, Serialize};

use alexi_config::InputMode;

use crate::mode::ResolvedMode;

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single message in the conversation transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Some(Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()),
        }
    }
}

/// Ordered record of committed turns.
///
/// Entries only ever arrive as a user/assistant pair, so the transcript never
/// holds a user message without the reply it produced.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn turns(&self) -> usize {
        self.messages.len() / 2
    }

    /// Messages to send to the reasoning engine for a pending utterance:
    /// everything committed so far followed by the new user message.
    pub fn with_pending(&self, utterance: &str) -> Vec<Message> {
        let mut messages = self.messages.clone();
        messages.push(Message::user(utterance));
        messages
    }

    /// Record a completed turn.
    pub fn commit(&mut self, utterance: &str, reply: &str) {
        self.messages.push(Message::user(utterance));
        self.messages.push(Message::assistant(reply));
    }
}

/// State of one run of the assistant.
#[derive(Debug, Clone)]
pub struct Session {
    pub requested: InputMode,
    pub resolved: ResolvedMode,
    pub recognizer_available: bool,
    pub transcript: Transcript,
}

impl Session {
    pub fn new(requested: InputMode, resolved: ResolvedMode, recognizer_available: bool) -> Self {
        Self {
            requested,
            resolved,
            recognizer_available,
            transcript: Transcript::new(),
        }
    }

    /// Whether replies should also be spoken.
    pub fn speaks(&self) -> bool {
        self.resolved == ResolvedMode::Speech
    }
}
