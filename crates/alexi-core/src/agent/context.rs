use rig::message::{AssistantContent, Message as RigMessage, Text, UserContent};
use rig::OneOrMany;

use crate::session::{Message, Role};

/// Builds the preamble and chat history for LLM calls.
pub struct ContextBuilder {
    system: String,
    history_window: usize,
}

impl ContextBuilder {
    pub fn new(system: impl Into<String>, history_window: usize) -> Self {
        Self {
            system: system.into(),
            history_window: history_window.max(1),
        }
    }

    /// System instruction followed by runtime facts the model cannot know.
    pub fn build_preamble(&self) -> String {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M (%A)");
        let tz = chrono::Local::now().format("%Z");
        let os = std::env::consts::OS;
        let arch = std::env::consts::ARCH;

        format!(
            "{}\n\n## Current Time\n{now} ({tz})\n\n## Runtime\n{os} {arch}\n\n\
             Replies may be read aloud, so keep them short and conversational.",
            self.system.trim()
        )
    }

    /// Split the transcript into rig chat history and the current prompt.
    ///
    /// Only the last `history_window` messages are kept, and the window always
    /// opens on a user message; the final message is the prompt.
    pub fn build_messages(&self, messages: &[Message]) -> (Vec<RigMessage>, RigMessage) {
        let mut start = messages.len().saturating_sub(self.history_window);
        while start + 1 < messages.len() && messages[start].role != Role::User {
            start += 1;
        }
        let mut history: Vec<RigMessage> = messages[start..].iter().map(to_rig).collect();
        let prompt = history.pop().unwrap_or_else(|| RigMessage::User {
            content: OneOrMany::one(UserContent::Text(Text {
                text: String::new(),
            })),
        });
        (history, prompt)
    }
}

fn to_rig(message: &Message) -> RigMessage {
    let text = Text {
        text: message.content.clone(),
    };
    match message.role {
        Role::User => RigMessage::User {
            content: OneOrMany::one(UserContent::Text(text)),
        },
        Role::Assistant => RigMessage::Assistant {
            id: None,
            content: OneOrMany::one(AssistantContent::Text(text)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_text(msg: &RigMessage) -> Option<String> {
        match msg {
            RigMessage::User { content } => match content.first() {
                UserContent::Text(t) => Some(t.text),
                _ => None,
            },
            _ => None,
        }
    }

    #[test]
    fn last_message_becomes_prompt() {
        let ctx = ContextBuilder::new("sys", 10);
        let msgs = vec![
            Message::user("a"),
            Message::assistant("b"),
            Message::user("c"),
        ];
        let (history, prompt) = ctx.build_messages(&msgs);
        assert_eq!(history.len(), 2);
        assert!(matches!(history[1], RigMessage::Assistant { .. }));
        assert_eq!(user_text(&prompt).as_deref(), Some("c"));
    }

    #[test]
    fn history_is_windowed() {
        let ctx = ContextBuilder::new("sys", 3);
        let msgs = vec![
            Message::user("1"),
            Message::assistant("2"),
            Message::user("3"),
            Message::assistant("4"),
            Message::user("5"),
        ];
        let (history, prompt) = ctx.build_messages(&msgs);
        assert_eq!(history.len(), 2);
        assert_eq!(user_text(&history[0]).as_deref(), Some("3"));
        assert_eq!(user_text(&prompt).as_deref(), Some("5"));
    }

    #[test]
    fn window_never_opens_on_an_assistant_reply() {
        let ctx = ContextBuilder::new("sys", 4);
        let msgs = vec![
            Message::user("1"),
            Message::assistant("2"),
            Message::user("3"),
            Message::assistant("4"),
            Message::user("5"),
        ];
        let (history, prompt) = ctx.build_messages(&msgs);
        assert_eq!(history.len(), 2);
        assert_eq!(user_text(&history[0]).as_deref(), Some("3"));
        assert_eq!(user_text(&prompt).as_deref(), Some("5"));

        let (history, prompt) = ContextBuilder::new("sys", 2).build_messages(&msgs);
        assert!(history.is_empty());
        assert_eq!(user_text(&prompt).as_deref(), Some("5"));
    }

    #[test]
    fn preamble_starts_with_system_instruction() {
        let ctx = ContextBuilder::new("  You are a helpful assistant\n", 5);
        let preamble = ctx.build_preamble();
        assert!(preamble.starts_with("You are a helpful assistant\n"));
        assert!(preamble.contains("## Current Time"));
    }
}
