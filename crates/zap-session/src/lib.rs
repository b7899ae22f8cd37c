//! zap-session: branchable conversation sessions over a zap-stream transport
//!
//! This crate owns the conversation state (response chain, conversation id,
//! saved points), the tool plugin contract and the engine that runs one
//! exchange at a time against a [`zap_stream::Transport`].

pub mod conversation;
pub mod error;
pub mod handle;
pub mod session;
pub mod store;
pub mod tool;

pub use conversation::{ConversationState, SavedPoint};
pub use error::{Error, Result};
pub use handle::SessionHandle;
pub use session::{
    DEFAULT_EXCHANGE_TIMEOUT, ExchangeOutcome, Session, SessionConfig, TokenSink, WriterSink,
};
pub use store::{CONVERSATION_KEY, ConfigStore, MemoryStore, PersistedConversation};
pub use tool::{BoxedTool, Tool, ToolError, ToolRegistry};
