//! Tool plugins: prompt/response transforms with no transport awareness

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use zap_stream::StructuredResponse;

/// Failures raised by a tool
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The final response did not have the shape the tool asked for
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The tool refused to act (e.g. a path outside the working directory)
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for ToolError {
    fn from(e: serde_json::Error) -> Self {
        ToolError::InvalidResponse(e.to_string())
    }
}

/// Trait for prompt/response tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Registry key
    fn name(&self) -> &str;

    /// One-line description for listings
    fn description(&self) -> &str;

    /// Rewrite the user's input before it is sent.
    ///
    /// Must not touch external state; only the prompt text may change.
    async fn preprocess(&self, prompt: &str) -> Result<String, ToolError> {
        Ok(prompt.to_string())
    }

    /// Act on the final response of an exchange.
    ///
    /// Failures are reported to the caller but never undo the exchange.
    async fn postprocess(&self, _response: &StructuredResponse) -> Result<(), ToolError> {
        Ok(())
    }
}

/// Type alias for a shared tool
pub type BoxedTool = Arc<dyn Tool>;

/// Tools available to a session, keyed by name
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, BoxedTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, returning the one it replaced (if any)
    pub fn register(&mut self, tool: BoxedTool) -> Option<BoxedTool> {
        tracing::debug!("Registering tool '{}'", tool.name());
        self.tools.insert(tool.name().to_string(), tool)
    }

    /// Look up a tool by name
    pub fn get(&self, name: &str) -> Option<BoxedTool> {
        self.tools.get(name).cloned()
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Iterate over registered tools in name order
    pub fn iter(&self) -> impl Iterator<Item = &BoxedTool> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
