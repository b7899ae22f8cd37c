//! Built-in tools for the chat client

mod file;

use std::sync::Arc;
use zap_session::ToolRegistry;

pub use file::FileTool;

/// Registry with every built-in tool
pub fn builtin() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(FileTool::new()));
    registry
}
