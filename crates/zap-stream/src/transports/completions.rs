//! OpenAI-compatible chat completions transport (self-hosted web UIs and
//! similar servers).
//!
//! These servers have no response chain, so the transport keeps the message
//! history itself and synthesizes the final response once the event stream
//! finishes.

use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest_eventsource::{Event, EventSource, retry::Never};
use serde::{Deserialize, Serialize};

use super::{Transport, error_from_response, validate_base_url};
use crate::{
    error::{Error, Result},
    stream::{EventStream, StreamEvent},
    types::{ExchangeRequest, StructuredResponse},
};

/// One entry of the running conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Chat completions client
pub struct ChatCompletionsTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    history: Arc<Mutex<Vec<ChatMessage>>>,
}

impl ChatCompletionsTransport {
    /// Create a transport for a server and model
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            model: model.into(),
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Send a bearer token with every request
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Reject a server URL or model no request could be sent with
    pub fn validate(&self) -> Result<()> {
        validate_base_url(&self.base_url)?;
        if self.model.trim().is_empty() {
            return Err(Error::InvalidConfig("model name is empty".to_string()));
        }
        Ok(())
    }

    /// Messages exchanged so far
    pub fn history(&self) -> Vec<ChatMessage> {
        self.history.lock().clone()
    }

    fn build_request(&self, request: &ExchangeRequest) -> CompletionRequest {
        let mut messages = self.history.lock().clone();
        messages.push(ChatMessage::user(&request.prompt));

        let attachments = request.capped_attachments();
        CompletionRequest {
            model: self.model.clone(),
            messages,
            stream: true,
            files: if attachments.is_empty() {
                None
            } else {
                Some(
                    attachments
                        .iter()
                        .map(|id| FileRef {
                            file_type: "file".to_string(),
                            id: id.clone(),
                        })
                        .collect(),
                )
            },
        }
    }
}

#[async_trait]
impl Transport for ChatCompletionsTransport {
    async fn send(&self, request: ExchangeRequest) -> Result<EventStream> {
        let url = format!("{}/api/chat/completions", self.base_url);
        tracing::debug!("Posting chat completion to {}", url);

        let body = self.build_request(&request);
        let mut builder = self.client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let mut event_source = EventSource::new(builder)
            .map_err(|e| Error::transport(format!("Failed to create event source: {}", e)))?;
        event_source.set_retry_policy(Box::new(Never));

        // The first event settles whether the server accepted the request.
        match event_source.next().await {
            Some(Ok(Event::Open)) => {}
            Some(Ok(Event::Message(_))) => {
                return Err(Error::transport("event stream did not open"));
            }
            Some(Err(reqwest_eventsource::Error::InvalidStatusCode(_, response))) => {
                event_source.close();
                return Err(error_from_response(response).await);
            }
            Some(Err(e)) => {
                event_source.close();
                return Err(Error::transport(e.to_string()));
            }
            None => return Err(Error::NoBody),
        }

        Ok(create_stream(
            event_source,
            request,
            Arc::clone(&self.history),
        ))
    }
}

fn create_stream(
    mut event_source: EventSource,
    request: ExchangeRequest,
    history: Arc<Mutex<Vec<ChatMessage>>>,
) -> EventStream {
    Box::pin(stream! {
        let mut accumulated = String::new();

        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data == "[DONE]" {
                        break;
                    }
                    let chunk: CompletionChunk = match serde_json::from_str(&msg.data) {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            tracing::warn!("Parse error: {}", e);
                            continue;
                        }
                    };
                    if let Some(error) = chunk.error {
                        event_source.close();
                        let code = match error.code {
                            Some(serde_json::Value::String(code)) => code,
                            Some(other) => other.to_string(),
                            None => "unknown".to_string(),
                        };
                        yield StreamEvent::provider_error(code, error.message);
                        return;
                    }
                    if let Some(text) = chunk
                        .choices
                        .first()
                        .and_then(|c| c.delta.content.as_deref())
                        .filter(|t| !t.is_empty())
                    {
                        accumulated.push_str(text);
                        yield StreamEvent::token(text);
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    event_source.close();
                    yield StreamEvent::TransportError { message: format!("SSE error: {}", e) };
                    return;
                }
            }
        }
        event_source.close();

        {
            let mut history = history.lock();
            history.push(ChatMessage::user(&request.prompt));
            history.push(ChatMessage::assistant(&accumulated));
        }

        let attachments: Vec<serde_json::Value> = request
            .capped_attachments()
            .iter()
            .map(|id| serde_json::json!({ "id": id }))
            .collect();
        let response = StructuredResponse::new(uuid::Uuid::new_v4().to_string(), accumulated)
            .with_metadata("createTime", serde_json::json!(chrono::Utc::now().to_rfc3339()))
            .with_metadata(
                "parentResponseId",
                serde_json::json!(request.parent_response_id.clone().unwrap_or_default()),
            )
            .with_metadata("query", serde_json::json!(request.prompt))
            .with_metadata("fileAttachments", serde_json::Value::Array(attachments));

        yield StreamEvent::Final { response };
    })
}

// Request/Response types

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    files: Option<Vec<FileRef>>,
}

#[derive(Debug, Serialize)]
struct FileRef {
    #[serde(rename = "type")]
    file_type: String,
    id: String,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    error: Option<CompletionError>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    delta: CompletionDelta,
}

#[derive(Debug, Deserialize)]
struct CompletionDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionError {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}
