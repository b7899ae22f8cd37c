//! Direct HTTP transport: the host process issues the request and streams the
//! response body straight into the parser.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;

use super::{
    Transport, error_from_response,
    payload::{ChatPayload, Endpoint},
};
use crate::{
    error::{Error, Result},
    parser::parse_fragments,
    stream::EventStream,
    types::{ExchangeRequest, Sender},
};

/// App-chat client over a direct HTTP connection
pub struct DirectTransport {
    client: reqwest::Client,
    endpoint: Endpoint,
    api_key: Option<String>,
}

impl DirectTransport {
    /// Create a transport for an endpoint
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key: None,
        }
    }

    /// Send a bearer token with every request
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Use a preconfigured client (cookies, proxies, timeouts)
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, url);
        for (name, value) in self.endpoint.headers() {
            builder = builder.header(name, value);
        }
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseNodes {
    #[serde(default)]
    response_nodes: Vec<ResponseNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseNode {
    response_id: String,
    #[serde(default)]
    sender: Option<Sender>,
}

#[async_trait]
impl Transport for DirectTransport {
    async fn send(&self, request: ExchangeRequest) -> Result<EventStream> {
        let url = self.endpoint.exchange_url(request.conversation_id.as_deref());
        tracing::debug!("Posting exchange to {}", url);

        let payload = ChatPayload::new(&request, &self.endpoint.model);
        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        if response.content_length() == Some(0) {
            return Err(Error::NoBody);
        }

        // Chunked bodies carry no length; wait for the first bytes instead.
        let mut body = Box::pin(response.bytes_stream());
        let first = loop {
            match body.next().await {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(chunk) => break chunk?,
                None => return Err(Error::NoBody),
            }
        };

        let body = futures::stream::once(async move { Ok(first) })
            .chain(body.map(|chunk| chunk.map_err(Error::from)));
        Ok(parse_fragments(body))
    }

    async fn last_response_id(&self, conversation_id: &str) -> Result<Option<String>> {
        let url = self.endpoint.response_nodes_url(conversation_id);
        tracing::debug!("Loading response nodes from {}", url);

        let response = self.request(reqwest::Method::GET, &url).send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let nodes: ResponseNodes = response.json().await?;
        Ok(nodes
            .response_nodes
            .into_iter()
            .rev()
            .find(|node| node.sender == Some(Sender::Assistant))
            .map(|node| node.response_id))
    }
}
