pub mod agent;
pub mod conversation;
pub mod interrupt;
pub mod io;
pub mod mode;
pub mod session;
pub mod tools;

// Re-export key types
pub use agent::{AgentLoop, ReasoningEngine};
pub use conversation::{Conversation, Finished, Termination};
pub use interrupt::Interrupt;
pub use io::{Acquired, Console, InputChannel, ReaderInput, Speaker, StdoutConsole};
pub use mode::{ModeError, ModeResolver, Resolution, ResolvedMode};
pub use session::{Message, Role, Session, Transcript};
pub use tools::ToolRegistry;
