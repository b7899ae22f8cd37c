//! The streaming session engine

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use zap_stream::{EventStream, ExchangeRequest, MAX_ATTACHMENTS, StreamEvent, StructuredResponse, Transport};

use crate::{
    conversation::{ConversationState, SavedPoint},
    error::{Error, Result},
    handle::SessionHandle,
    store::PersistedConversation,
    tool::{BoxedTool, ToolError, ToolRegistry},
};

/// Upper bound on one exchange, dispatch to terminal event
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Deadline for a whole exchange
    pub exchange_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            exchange_timeout: DEFAULT_EXCHANGE_TIMEOUT,
        }
    }
}

/// Live output surface for streamed tokens
pub trait TokenSink: Send {
    /// Called once per token, in arrival order
    fn token(&mut self, text: &str);

    /// Called once when the exchange stops streaming, whatever the outcome
    fn finish(&mut self) {}
}

impl TokenSink for Vec<String> {
    fn token(&mut self, text: &str) {
        self.push(text.to_string());
    }
}

/// Writes tokens to an `io::Write`, flushing after each one and ending the
/// exchange with a newline.
pub struct WriterSink<W> {
    writer: W,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> TokenSink for WriterSink<W> {
    fn token(&mut self, text: &str) {
        if let Err(e) = self
            .writer
            .write_all(text.as_bytes())
            .and_then(|_| self.writer.flush())
        {
            tracing::warn!("Failed to write token: {}", e);
        }
    }

    fn finish(&mut self) {
        if let Err(e) = self.writer.write_all(b"\n").and_then(|_| self.writer.flush()) {
            tracing::warn!("Failed to finish output: {}", e);
        }
    }
}

/// Result of an exchange that reached its final response
#[derive(Debug)]
pub struct ExchangeOutcome {
    /// The final structured response
    pub response: StructuredResponse,
    /// Postprocessing failure of the active tool; the exchange still counts
    pub tool_error: Option<ToolError>,
}

/// Drives exchanges against one transport and owns the conversation state
pub struct Session {
    config: SessionConfig,
    state: ConversationState,
    transport: Arc<dyn Transport>,
    tools: ToolRegistry,
    active_tool: Option<BoxedTool>,
    attachments: Vec<String>,
    handle: SessionHandle,
}

impl Session {
    /// Create a session with empty conversation state
    pub fn new(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            state: ConversationState::new(),
            transport,
            tools: ToolRegistry::new(),
            active_tool: None,
            attachments: Vec::new(),
            handle: SessionHandle::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.state.conversation_id()
    }

    pub fn last_response_id(&self) -> Option<&str> {
        self.state.last_response_id()
    }

    pub fn saved_points(&self) -> &std::collections::BTreeMap<String, SavedPoint> {
        self.state.saved_points()
    }

    /// Get a cloneable handle for aborting exchanges from outside
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    // ---- Tools ----

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn tools_mut(&mut self) -> &mut ToolRegistry {
        &mut self.tools
    }

    /// Replace the registry; the active tool is deactivated
    pub fn set_tools(&mut self, tools: ToolRegistry) {
        self.tools = tools;
        self.active_tool = None;
    }

    /// Replace the active tool; `None` deactivates it
    pub fn set_active_tool(&mut self, name: Option<&str>) -> Result<()> {
        self.active_tool = match name {
            Some(name) => Some(
                self.tools
                    .get(name)
                    .ok_or_else(|| Error::UnknownTool(name.to_string()))?,
            ),
            None => None,
        };
        Ok(())
    }

    pub fn active_tool(&self) -> Option<&str> {
        self.active_tool.as_ref().map(|t| t.name())
    }

    // ---- Attachments ----

    /// Queue attachment ids for the next exchange (capped at the backend
    /// limit). The caller clears them once the exchange is over.
    pub fn set_attachments(&mut self, ids: impl IntoIterator<Item = String>) {
        self.attachments = ids.into_iter().take(MAX_ATTACHMENTS).collect();
    }

    pub fn attachments(&self) -> &[String] {
        &self.attachments
    }

    pub fn clear_attachments(&mut self) {
        self.attachments.clear();
    }

    // ---- Persistence ----

    /// Take over persisted conversation id and saved points
    pub fn restore(&mut self, record: PersistedConversation) {
        self.state = ConversationState::hydrate(record.active_conversation_id, record.saved_points);
    }

    /// The persistable part of the current state
    pub fn snapshot(&self) -> PersistedConversation {
        PersistedConversation {
            active_conversation_id: self.state.conversation_id().map(str::to_string),
            saved_points: self.state.saved_points().clone(),
        }
    }

    // ---- Conversation control ----

    /// Continue an existing conversation, chaining onto its newest assistant
    /// response.
    pub async fn resume(&mut self, conversation_id: &str) -> Result<()> {
        let last_response_id = self.transport.last_response_id(conversation_id).await?;
        tracing::debug!(
            "Resuming conversation {} at {:?}",
            conversation_id,
            last_response_id
        );
        self.state
            .attach(conversation_id.to_string(), last_response_id);
        Ok(())
    }

    /// Start over with a fresh conversation
    pub fn start_new(&mut self) {
        self.state.reset();
        self.attachments.clear();
    }

    /// Save the current response under `<conversation id>-<name>`
    pub fn save_point(&mut self, name: &str) -> Result<(String, SavedPoint)> {
        self.state.save_point(name)
    }

    /// Fork a new conversation from a saved point; returns the new id
    pub fn load_point(&mut self, key: &str) -> Result<String> {
        let conversation_id = self.state.load_point(key)?;
        self.attachments.clear();
        Ok(conversation_id)
    }

    // ---- Exchange ----

    /// Run one exchange: preprocess, stream tokens into `sink`, then commit
    /// the new response and postprocess it.
    ///
    /// Conversation state only changes when a final response arrives.
    pub async fn stream_exchange(
        &mut self,
        input: &str,
        sink: &mut dyn TokenSink,
    ) -> Result<ExchangeOutcome> {
        let tool = self.active_tool.clone();

        let prompt = match tool {
            Some(ref tool) => tool.preprocess(input).await?,
            None => input.to_string(),
        };

        let request = ExchangeRequest::new(prompt)
            .with_attachments(self.attachments.clone())
            .with_parent(self.state.last_response_id().map(str::to_string))
            .with_conversation(self.state.conversation_id().map(str::to_string));

        let cancel = self.handle.begin();
        let result = self.run_exchange(request, sink, cancel).await;
        self.handle.end();
        sink.finish();

        let (response, started) = result?;
        self.state.commit(started, response.response_id.clone());
        tracing::debug!(
            "Exchange complete: conversation {:?}, response {}",
            self.state.conversation_id(),
            response.response_id
        );

        let tool_error = match tool {
            Some(ref tool) => match tool.postprocess(&response).await {
                Ok(()) => None,
                Err(e) => {
                    tracing::warn!("Tool '{}' failed to postprocess: {}", tool.name(), e);
                    Some(e)
                }
            },
            None => None,
        };

        Ok(ExchangeOutcome {
            response,
            tool_error,
        })
    }

    /// Dispatch and consume one exchange under the deadline.
    /// Returns the final response and the conversation id revealed on the way.
    async fn run_exchange(
        &self,
        request: ExchangeRequest,
        sink: &mut dyn TokenSink,
        cancel: CancellationToken,
    ) -> Result<(StructuredResponse, Option<String>)> {
        let deadline = Instant::now() + self.config.exchange_timeout;

        let mut events: EventStream = tokio::select! {
            _ = cancel.cancelled() => return Err(zap_stream::Error::Aborted.into()),
            sent = timeout_at(deadline, self.transport.send(request)) => match sent {
                Ok(events) => events?,
                Err(_) => return Err(self.timed_out()),
            },
        };

        let mut started: Option<String> = None;
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Exchange aborted");
                    return Err(zap_stream::Error::Aborted.into());
                }
                next = timeout_at(deadline, events.next()) => next,
            };

            let event = match next {
                Ok(Some(event)) => event,
                Ok(None) => return Err(zap_stream::Error::IncompleteStream.into()),
                Err(_) => return Err(self.timed_out()),
            };

            match event {
                StreamEvent::Token { text } => sink.token(&text),
                StreamEvent::ConversationStarted { conversation_id } => {
                    if started.is_none() {
                        started = Some(conversation_id);
                    }
                }
                StreamEvent::Final { response } => return Ok((response, started)),
                StreamEvent::Timeout => return Err(self.timed_out()),
                other => {
                    let error = other
                        .into_error()
                        .unwrap_or(zap_stream::Error::IncompleteStream);
                    return Err(error.into());
                }
            }
        }
    }

    fn timed_out(&self) -> Error {
        tracing::warn!(
            "No final response within {:?}",
            self.config.exchange_timeout
        );
        zap_stream::Error::Timeout(self.config.exchange_timeout).into()
    }
}
