pub mod context;
pub mod r#loop;

use anyhow::Result;
use async_trait::async_trait;

use crate::session::Message;

pub use context::ContextBuilder;
pub use r#loop::AgentLoop;

/// Turns a transcript into the next assistant reply, possibly running tools
/// along the way. Called once per turn; blocking from the caller's view.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    /// `messages` ends with the pending user message.
    async fn invoke(&self, messages: &[Message]) -> Result<String>;
}
