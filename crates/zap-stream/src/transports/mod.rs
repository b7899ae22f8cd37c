//! Transport implementations
//!
//! Every transport turns an [`ExchangeRequest`] into a lazy [`EventStream`];
//! callers never need to know which one they hold.

pub mod completions;
pub mod direct;
pub mod payload;
pub mod tunnel;

use async_trait::async_trait;
use serde::Deserialize;

use crate::{EventStream, ExchangeRequest, Result, error::Error};

/// Trait for chat transports
#[async_trait]
pub trait Transport: Send + Sync {
    /// Dispatch an exchange and stream its events.
    ///
    /// Failures detected before any event can be produced (non-success
    /// status, missing body) are returned as `Err`.
    async fn send(&self, request: ExchangeRequest) -> Result<EventStream>;

    /// Look up the newest assistant response of an existing conversation so
    /// the next exchange can chain onto it.
    async fn last_response_id(&self, _conversation_id: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

/// Message used when an error body has no recognizable shape
pub const UNKNOWN_ERROR_FORMAT: &str = "Failed to fetch response: Unknown error format";

/// Turn a non-success response body into a provider error.
///
/// `{"error":{"message":...}}` yields that message verbatim; anything else
/// falls back to [`UNKNOWN_ERROR_FORMAT`].
pub fn decode_error_body(status: reqwest::StatusCode, body: &str) -> Error {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .and_then(|d| d.message)
        .unwrap_or_else(|| UNKNOWN_ERROR_FORMAT.to_string());
    Error::provider(status.as_u16().to_string(), message)
}

/// Check that `url` is an absolute `http` or `https` URL
pub fn validate_base_url(url: &str) -> Result<()> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| Error::InvalidConfig(format!("invalid URL '{}': {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(Error::InvalidConfig(format!(
            "unsupported URL scheme '{}' in '{}'",
            scheme, url
        ))),
    }
}

/// Read an error response and decode it with [`decode_error_body`]
pub(crate) async fn error_from_response(response: reqwest::Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    tracing::debug!("Backend returned {}: {}", status, body);
    decode_error_body(status, &body)
}
