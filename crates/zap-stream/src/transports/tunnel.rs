//! Tunneled transport: the request runs inside a sandboxed execution context
//! (typically an authenticated browser page) that can only talk back through
//! its console. The relay code frames the response body onto that side channel
//! and the host decodes the frames back into parser input.
//!
//! Frames are whole console messages:
//!
//! - `STREAM_CHUNK:<text>` carries a slice of the response body
//! - `STREAM_END` closes the body
//! - `STREAM_ERROR:<message>` aborts the exchange
//!
//! Anything else on the channel is ignored.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;

use super::{
    Transport,
    payload::{ChatPayload, Endpoint},
};
use crate::{
    error::{Error, Result},
    parser::parse_fragments,
    stream::EventStream,
    types::ExchangeRequest,
};

pub const CHUNK_PREFIX: &str = "STREAM_CHUNK:";
pub const END_FRAME: &str = "STREAM_END";
pub const ERROR_PREFIX: &str = "STREAM_ERROR:";

/// A decoded side-channel frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    Chunk(&'a str),
    End,
    Error(&'a str),
}

impl<'a> Frame<'a> {
    /// Decode one console message; `None` for unrelated output.
    pub fn decode(message: &'a str) -> Option<Self> {
        if let Some(payload) = message.strip_prefix(CHUNK_PREFIX) {
            return Some(Frame::Chunk(payload));
        }
        if let Some(reason) = message.strip_prefix(ERROR_PREFIX) {
            return Some(Frame::Error(reason.trim()));
        }
        if message.trim_end_matches(['\r', '\n']) == END_FRAME {
            return Some(Frame::End);
        }
        None
    }
}

/// The request the relay performs inside the execution context
#[derive(Debug, Clone, Serialize)]
pub struct RelayRequest {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: serde_json::Value,
}

impl RelayRequest {
    /// Build the relay request for an exchange
    pub fn new(endpoint: &Endpoint, request: &ExchangeRequest) -> Result<Self> {
        let body = serde_json::to_value(ChatPayload::new(request, &endpoint.model))?;
        Ok(Self {
            url: endpoint.exchange_url(request.conversation_id.as_deref()),
            headers: endpoint
                .headers()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            body,
        })
    }

    /// JavaScript that performs the request and frames the body onto the
    /// console.
    pub fn script(&self) -> Result<String> {
        let url = serde_json::to_string(&self.url)?;
        let headers = serde_json::to_string(&self.headers)?;
        let body = serde_json::to_string(&self.body)?;
        Ok(format!(
            r#"(async () => {{
  try {{
    const response = await fetch({url}, {{
      method: 'POST',
      headers: {headers},
      body: JSON.stringify({body})
    }});
    if (!response.body) {{
      console.log('{ERROR_PREFIX} No response body');
      return;
    }}
    const reader = response.body.getReader();
    const decoder = new TextDecoder();
    while (true) {{
      const {{ done, value }} = await reader.read();
      if (done) {{
        console.log('{END_FRAME}');
        break;
      }}
      console.log('{CHUNK_PREFIX}' + decoder.decode(value, {{ stream: true }}));
    }}
  }} catch (e) {{
    console.log('{ERROR_PREFIX}' + (e && e.message ? e.message : String(e)));
  }}
}})()"#
        ))
    }
}

/// A sandboxed context that can run the relay and whose console output the
/// host can observe.
#[async_trait]
pub trait ExecutionContext: Send + Sync {
    /// Register a console listener. Dropping the receiver deregisters it.
    fn subscribe(&self) -> broadcast::Receiver<String>;

    /// Start the relay for `request`.
    ///
    /// Returns once the relay is running; its output arrives only through the
    /// console.
    async fn dispatch(&self, request: RelayRequest) -> Result<()>;
}

/// App-chat client tunneled through an [`ExecutionContext`]
pub struct TunneledTransport {
    context: Arc<dyn ExecutionContext>,
    endpoint: Endpoint,
}

impl TunneledTransport {
    /// Create a transport over an execution context
    pub fn new(context: Arc<dyn ExecutionContext>, endpoint: Endpoint) -> Self {
        Self { context, endpoint }
    }
}

#[async_trait]
impl Transport for TunneledTransport {
    async fn send(&self, request: ExchangeRequest) -> Result<EventStream> {
        let relay = RelayRequest::new(&self.endpoint, &request)?;
        tracing::debug!("Relaying exchange to {}", relay.url);

        // Listen before dispatching so the first frames cannot be missed.
        let mut console = self.context.subscribe();
        self.context.dispatch(relay).await?;

        let fragments = stream! {
            loop {
                let message = match console.recv().await {
                    Ok(message) => message,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        yield Err(Error::transport(format!("side channel dropped {} messages", n)));
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                match Frame::decode(&message) {
                    Some(Frame::Chunk(payload)) => yield Ok(payload.to_string()),
                    Some(Frame::End) => break,
                    Some(Frame::Error(reason)) => {
                        yield Err(Error::transport(reason.to_string()));
                        break;
                    }
                    None => {}
                }
            }
        };

        Ok(parse_fragments(fragments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamEvent;
    use futures::StreamExt;
    use std::sync::Mutex;

    struct ScriptedContext {
        console: broadcast::Sender<String>,
        frames: Vec<String>,
        dispatched: Mutex<Vec<RelayRequest>>,
    }

    impl ScriptedContext {
        fn new(frames: &[&str]) -> Arc<Self> {
            let (console, _) = broadcast::channel(64);
            Arc::new(Self {
                console,
                frames: frames.iter().map(|f| f.to_string()).collect(),
                dispatched: Mutex::default(),
            })
        }

        fn listeners(&self) -> usize {
            self.console.receiver_count()
        }
    }

    #[async_trait]
    impl ExecutionContext for ScriptedContext {
        fn subscribe(&self) -> broadcast::Receiver<String> {
            self.console.subscribe()
        }

        async fn dispatch(&self, request: RelayRequest) -> Result<()> {
            self.dispatched.lock().unwrap().push(request);
            for frame in &self.frames {
                let _ = self.console.send(frame.clone());
            }
            Ok(())
        }
    }

    fn transport(context: Arc<ScriptedContext>) -> TunneledTransport {
        TunneledTransport::new(context, Endpoint::new("https://grok.com/rest/app-chat"))
    }

    #[test]
    fn test_frame_decode() {
        assert_eq!(Frame::decode("STREAM_CHUNK:{\"a\":1}\n"), Some(Frame::Chunk("{\"a\":1}\n")));
        assert_eq!(Frame::decode("STREAM_END"), Some(Frame::End));
        assert_eq!(Frame::decode("STREAM_END\n"), Some(Frame::End));
        assert_eq!(
            Frame::decode("STREAM_ERROR: No response body"),
            Some(Frame::Error("No response body"))
        );
        assert_eq!(Frame::decode("[HMR] connected"), None);
        assert_eq!(Frame::decode("STREAM_ENDED"), None);
    }

    #[tokio::test]
    async fn test_frames_feed_parser() {
        let context = ScriptedContext::new(&[
            "Download the React DevTools",
            "STREAM_CHUNK:{\"result\":{\"conversation\":{\"conversationId\":\"c1\"}}}\n{\"result\":{\"response\":{\"tok",
            "STREAM_CHUNK:en\":\"Hi\"}}}\n",
            "STREAM_CHUNK:{\"result\":{\"response\":{\"token\":\" there\"}}}\n",
            "STREAM_CHUNK:{\"result\":{\"response\":{\"modelResponse\":{\"responseId\":\"r1\",\"message\":\"Hi there\"}}}}",
            "STREAM_END",
        ]);
        let events: Vec<StreamEvent> = transport(context.clone())
            .send(ExchangeRequest::new("hello"))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(
            events[0],
            StreamEvent::ConversationStarted {
                conversation_id: "c1".into()
            }
        );
        assert_eq!(events[1], StreamEvent::token("Hi"));
        assert_eq!(events[2], StreamEvent::token(" there"));
        assert!(matches!(&events[3], StreamEvent::Final { response } if response.response_id == "r1"));
        assert_eq!(events.len(), 4);
        assert_eq!(context.listeners(), 0, "listener must be released");

        let dispatched = context.dispatched.lock().unwrap();
        assert_eq!(
            dispatched[0].url,
            "https://grok.com/rest/app-chat/conversations/new"
        );
        assert_eq!(dispatched[0].body["message"], "hello");
    }

    #[tokio::test]
    async fn test_error_frame_is_terminal() {
        let context = ScriptedContext::new(&[
            "STREAM_CHUNK:{\"result\":{\"token\":\"a\"}}",
            "STREAM_ERROR: No response body",
            "STREAM_CHUNK:{\"result\":{\"token\":\"b\"}}",
        ]);
        let events: Vec<StreamEvent> = transport(context.clone())
            .send(ExchangeRequest::new("x"))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], StreamEvent::token("a"));
        assert_eq!(
            events[1],
            StreamEvent::TransportError {
                message: "No response body".into()
            }
        );
        assert_eq!(context.listeners(), 0);
    }

    #[tokio::test]
    async fn test_end_without_final_closes_stream() {
        let context = ScriptedContext::new(&["STREAM_CHUNK:{\"result\":{\"token\":\"a\"}}", "STREAM_END"]);
        let events: Vec<StreamEvent> = transport(context)
            .send(ExchangeRequest::new("x"))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(events, vec![StreamEvent::token("a")]);
    }

    #[tokio::test]
    async fn test_dropping_stream_releases_listener() {
        let context = ScriptedContext::new(&["STREAM_CHUNK:{\"result\":{\"token\":\"a\"}}"]);
        let mut stream = transport(context.clone())
            .send(ExchangeRequest::new("x"))
            .await
            .unwrap();
        assert_eq!(stream.next().await, Some(StreamEvent::token("a")));
        assert_eq!(context.listeners(), 1);
        drop(stream);
        assert_eq!(context.listeners(), 0);
    }

    #[test]
    fn test_relay_script_embeds_request() {
        let endpoint = Endpoint::new("https://grok.com/rest/app-chat").with_origin("https://grok.com");
        let relay = RelayRequest::new(
            &endpoint,
            &ExchangeRequest::new("say \"hi\"").with_conversation(Some("c9".into())),
        )
        .unwrap();
        let script = relay.script().unwrap();
        assert!(script.contains("\"https://grok.com/rest/app-chat/conversations/c9/responses\""));
        assert!(script.contains(r#"say \"hi\""#));
        assert!(script.contains("'STREAM_CHUNK:' + decoder.decode"));
        assert!(script.contains("console.log('STREAM_END')"));
        assert!(script.contains("\"Origin\":\"https://grok.com\""));
    }
}
