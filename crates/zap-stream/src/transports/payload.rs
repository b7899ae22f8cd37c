//! App-chat request payload shared by the direct and tunneled transports

use serde::Serialize;

use super::validate_base_url;
use crate::{
    error::{Error, Result},
    types::ExchangeRequest,
};

/// Default model requested from the backend
pub const DEFAULT_MODEL: &str = "grok-3";

/// Where and how app-chat requests are sent
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// API root, e.g. `https://grok.com/rest/app-chat`
    pub base_url: String,
    /// Value of the `Origin` header (and `Referer` with a trailing slash)
    pub origin: Option<String>,
    /// Model name placed in the payload
    pub model: String,
}

impl Endpoint {
    /// Create an endpoint rooted at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            origin: None,
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Set the origin headers
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into().trim_end_matches('/').to_string());
        self
    }

    /// Set the model name
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Reject an endpoint no request could be sent to
    pub fn validate(&self) -> Result<()> {
        validate_base_url(&self.base_url)?;
        if let Some(ref origin) = self.origin {
            validate_base_url(origin)?;
        }
        if self.model.trim().is_empty() {
            return Err(Error::InvalidConfig("model name is empty".to_string()));
        }
        Ok(())
    }

    /// URL an exchange is posted to: a new conversation when no id is known,
    /// otherwise the existing conversation's response list.
    pub fn exchange_url(&self, conversation_id: Option<&str>) -> String {
        match conversation_id.filter(|id| !id.is_empty()) {
            Some(id) => format!("{}/conversations/{}/responses", self.base_url, id),
            None => format!("{}/conversations/new", self.base_url),
        }
    }

    /// URL listing the response nodes of a conversation
    pub fn response_nodes_url(&self, conversation_id: &str) -> String {
        format!(
            "{}/conversations/{}/response-node",
            self.base_url, conversation_id
        )
    }

    /// Fixed headers every request carries
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("Content-Type", "application/json".to_string()),
            ("Accept", "*/*".to_string()),
        ];
        if let Some(ref origin) = self.origin {
            headers.push(("Origin", origin.clone()));
            headers.push(("Referer", format!("{}/", origin)));
        }
        headers
    }
}

/// JSON body of an app-chat exchange
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    temporary: bool,
    model_name: String,
    message: String,
    file_attachments: Vec<String>,
    image_attachments: Vec<String>,
    disable_search: bool,
    enable_image_generation: bool,
    return_image_bytes: bool,
    enable_image_streaming: bool,
    image_generation_count: u32,
    force_concise: bool,
    tool_overrides: serde_json::Map<String, serde_json::Value>,
    enable_side_by_side: bool,
    send_final_metadata: bool,
    is_reasoning: bool,
    webpage_urls: Vec<String>,
    disable_text_follow_ups: bool,
    parent_response_id: String,
}

impl ChatPayload {
    /// Build the payload for a request
    pub fn new(request: &ExchangeRequest, model: &str) -> Self {
        Self {
            temporary: false,
            model_name: model.to_string(),
            message: request.prompt.clone(),
            file_attachments: request.capped_attachments().to_vec(),
            image_attachments: vec![],
            disable_search: false,
            enable_image_generation: true,
            return_image_bytes: false,
            enable_image_streaming: true,
            image_generation_count: 2,
            force_concise: false,
            tool_overrides: serde_json::Map::new(),
            enable_side_by_side: true,
            send_final_metadata: true,
            is_reasoning: false,
            webpage_urls: vec![],
            disable_text_follow_ups: true,
            parent_response_id: request.parent_response_id.clone().unwrap_or_default(),
        }
    }
}
