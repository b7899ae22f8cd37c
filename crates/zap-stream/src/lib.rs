//! zap-stream: streaming layer for conversational chat backends
//!
//! This crate turns an outgoing exchange into a lazy stream of
//! [`StreamEvent`]s, whichever way the backend is reached: a direct HTTP
//! connection, a sandboxed execution context that relays the body over its
//! console, or an OpenAI-compatible chat completions server.

pub mod error;
pub mod parser;
pub mod stream;
pub mod transports;
pub mod types;

pub use error::{Error, Result};
pub use parser::ResponseParser;
pub use stream::{EventStream, StreamEvent};
pub use transports::Transport;
pub use types::*;
