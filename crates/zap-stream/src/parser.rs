//! Incremental response parser
//!
//! Backends answer with either one JSON document per line or a bare
//! concatenation of JSON objects. [`ResponseParser`] scans raw fragments as
//! they arrive, cuts out each top-level value as soon as its closing bracket is
//! seen, and decodes only the `result` and `error` members of it. Fragment
//! boundaries are irrelevant: feeding a body one byte at a time yields the same
//! events as feeding it whole.

use async_stream::stream;
use futures::StreamExt;
use serde_json::Value;
use tokio_stream::Stream;

use crate::{
    error::Error,
    stream::{EventStream, StreamEvent},
    types::StructuredResponse,
};

/// Splits a byte stream into complete top-level JSON values.
///
/// Values never span a raw newline inside a string, so a newline there marks
/// the value as cut off and the scanner starts over. A value still open at a
/// newline keeps going, but the next line is scanned on its own as well: if
/// that line holds a complete envelope first, the unfinished value is dropped
/// in its favour.
#[derive(Debug, Default)]
struct ValueScanner {
    buf: Vec<u8>,
    depth: usize,
    in_string: bool,
    escaped: bool,
    in_stray: bool,
    resync: Option<Box<ValueScanner>>,
}

impl ValueScanner {
    /// Push one byte; returns the finished value when this byte closes it.
    fn push(&mut self, byte: u8) -> Option<Vec<u8>> {
        if self.depth == 0 {
            match byte {
                b'{' | b'[' => {
                    self.in_stray = false;
                    self.buf.clear();
                    self.buf.push(byte);
                    self.depth = 1;
                }
                b if b.is_ascii_whitespace() => {}
                _ => {
                    if !self.in_stray {
                        tracing::warn!("Skipping stray bytes between stream values");
                        self.in_stray = true;
                    }
                }
            }
            return None;
        }

        self.buf.push(byte);

        if let Some(value) = self.push_resync(byte) {
            return Some(value);
        }

        if self.in_string {
            if byte == b'\n' {
                tracing::warn!(
                    "Dropping value cut off inside a string ({} bytes)",
                    self.buf.len()
                );
                self.reset();
            } else if self.escaped {
                self.escaped = false;
            } else if byte == b'\\' {
                self.escaped = true;
            } else if byte == b'"' {
                self.in_string = false;
            }
            return None;
        }

        match byte {
            b'\n' => self.resync = Some(Box::default()),
            b'"' => self.in_string = true,
            b'{' | b'[' => self.depth += 1,
            b'}' | b']' => {
                self.depth -= 1;
                if self.depth == 0 {
                    self.resync = None;
                    return Some(std::mem::take(&mut self.buf));
                }
            }
            _ => {}
        }
        None
    }

    /// Feed the line-scoped scanner running alongside an unfinished value.
    /// Returns its value when it completes an envelope, which replaces the
    /// unfinished one.
    fn push_resync(&mut self, byte: u8) -> Option<Vec<u8>> {
        let resync = self.resync.as_mut()?;
        if byte == b'\n' {
            self.resync = None;
            return None;
        }
        if resync.depth == 0 && byte != b'{' {
            if !byte.is_ascii_whitespace() {
                self.resync = None;
            }
            return None;
        }

        let value = resync.push(byte)?;
        self.resync = None;
        if !is_envelope(&value) {
            return None;
        }
        tracing::warn!(
            "Dropping unterminated value ({} bytes); resuming at the next line",
            self.buf.len() - value.len()
        );
        self.reset();
        Some(value)
    }

    /// Bytes of a value that was opened but never closed
    fn pending(&self) -> usize {
        if self.depth > 0 { self.buf.len() } else { 0 }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Whether `raw` is a complete top-level object carrying `result` or `error`
fn is_envelope(raw: &[u8]) -> bool {
    serde_json::from_slice::<Value>(raw)
        .map(|value| value.get("result").is_some() || value.get("error").is_some())
        .unwrap_or(false)
}

/// What a `result` value carries, in priority order.
///
/// A token at `token` wins over one at `response.token`; a token of either
/// shape wins over a model response; `modelResponse` wins over
/// `response.modelResponse`.
enum ResultPayload<'a> {
    Token(&'a str),
    ModelResponse(&'a Value),
    Nothing,
}

impl<'a> ResultPayload<'a> {
    fn classify(result: &'a Value) -> Self {
        let nested = result.get("response");

        let token = result
            .get("token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .or_else(|| {
                nested
                    .and_then(|r| r.get("token"))
                    .and_then(Value::as_str)
                    .filter(|t| !t.is_empty())
            });
        if let Some(token) = token {
            return ResultPayload::Token(token);
        }

        let model_response = result
            .get("modelResponse")
            .filter(|v| v.is_object())
            .or_else(|| {
                nested
                    .and_then(|r| r.get("modelResponse"))
                    .filter(|v| v.is_object())
            });
        match model_response {
            Some(mr) => ResultPayload::ModelResponse(mr),
            None => ResultPayload::Nothing,
        }
    }
}

/// Extract `{code, message}` from an error-shaped object
fn error_fields(value: &Value) -> Option<(String, String)> {
    let code = value.get("code")?;
    let message = value.get("message")?;
    let code = match code {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let message = match message {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Some((code, message))
}

/// Incremental parser turning raw response fragments into [`StreamEvent`]s.
///
/// The first terminal event (final response or explicit error) closes the
/// parser; later input is discarded.
#[derive(Debug, Default)]
pub struct ResponseParser {
    scanner: ValueScanner,
    finished: bool,
}

impl ResponseParser {
    /// Create a new parser
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a terminal event has been produced
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed a fragment; returns every event completed by it, in order.
    pub fn feed(&mut self, fragment: impl AsRef<[u8]>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for &byte in fragment.as_ref() {
            if self.finished {
                break;
            }
            if let Some(value) = self.scanner.push(byte) {
                self.decode_value(&value, &mut events);
            }
        }
        events
    }

    /// Close the input. A value still open at this point can never complete
    /// and is dropped.
    pub fn finish(&mut self) {
        let pending = self.scanner.pending();
        if pending > 0 && !self.finished {
            tracing::warn!("Stream closed inside a value; dropped {} bytes", pending);
        }
        self.scanner.reset();
    }

    fn decode_value(&mut self, raw: &[u8], events: &mut Vec<StreamEvent>) {
        let value: Value = match serde_json::from_slice(raw) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Stream parse error: {}", e);
                return;
            }
        };

        if let Some(error) = value.get("error") {
            match error_fields(error) {
                Some((code, message)) => {
                    self.finish_with(StreamEvent::ProviderError { code, message }, events);
                    return;
                }
                None => tracing::warn!("Ignoring error value without code/message: {}", error),
            }
        }

        if let Some(result) = value.get("result") {
            self.decode_result(result, events);
        }
    }

    fn decode_result(&mut self, result: &Value, events: &mut Vec<StreamEvent>) {
        if let Some((code, message)) = error_fields(result) {
            self.finish_with(StreamEvent::ProviderError { code, message }, events);
            return;
        }

        if let Some(id) = result
            .get("conversation")
            .and_then(|c| c.get("conversationId"))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
        {
            events.push(StreamEvent::ConversationStarted {
                conversation_id: id.to_string(),
            });
        }

        match ResultPayload::classify(result) {
            ResultPayload::Token(text) => events.push(StreamEvent::token(text)),
            ResultPayload::ModelResponse(mr) => {
                match serde_json::from_value::<StructuredResponse>(mr.clone()) {
                    Ok(response) => self.finish_with(StreamEvent::Final { response }, events),
                    Err(e) => tracing::warn!("Skipping undecodable model response: {}", e),
                }
            }
            ResultPayload::Nothing => {}
        }
    }

    fn finish_with(&mut self, event: StreamEvent, events: &mut Vec<StreamEvent>) {
        self.finished = true;
        self.scanner.reset();
        events.push(event);
    }
}

/// Drive a [`ResponseParser`] over a stream of raw fragments.
///
/// A failed fragment becomes a terminal `TransportError`. The returned stream
/// ends after the first terminal event or when the input is exhausted.
pub fn parse_fragments<S, B>(fragments: S) -> EventStream
where
    S: Stream<Item = std::result::Result<B, Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    Box::pin(stream! {
        let mut fragments = Box::pin(fragments);
        let mut parser = ResponseParser::new();

        while let Some(fragment) = fragments.next().await {
            match fragment {
                Ok(bytes) => {
                    for event in parser.feed(bytes) {
                        yield event;
                    }
                    if parser.is_finished() {
                        return;
                    }
                }
                Err(e) => {
                    yield StreamEvent::transport_error(&e);
                    return;
                }
            }
        }

        parser.finish();
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = concat!(
        r#"{"result":{"conversation":{"conversationId":"c1","title":"New"}}}"#,
        "\n",
        r#"{"result":{"response":{"token":"Hi","isThinking":false}}}"#,
        "\n",
        r#"{"result":{"response":{"token":" théré {braces} \"q\""}}}"#,
        "\n",
        r#"{"result":{"response":{"modelResponse":{"responseId":"r1","message":"Hi théré","sender":"ASSISTANT"}}}}"#,
        "\n",
    );

    fn feed_all(parser: &mut ResponseParser, chunks: &[&[u8]]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(parser.feed(chunk));
        }
        parser.finish();
        events
    }

    #[test]
    fn test_events_in_order() {
        let mut parser = ResponseParser::new();
        let events = feed_all(&mut parser, &[BODY.as_bytes()]);

        assert_eq!(events.len(), 4);
        assert_eq!(
            events[0],
            StreamEvent::ConversationStarted {
                conversation_id: "c1".into()
            }
        );
        assert_eq!(events[1], StreamEvent::token("Hi"));
        assert_eq!(events[2], StreamEvent::token(" théré {braces} \"q\""));
        match &events[3] {
            StreamEvent::Final { response } => {
                assert_eq!(response.response_id, "r1");
                assert_eq!(response.message, "Hi théré");
            }
            other => panic!("expected Final, got {:?}", other),
        }
        assert!(parser.is_finished());
    }

    #[test]
    fn test_chunking_does_not_change_events() {
        let mut whole = ResponseParser::new();
        let expected = feed_all(&mut whole, &[BODY.as_bytes()]);

        let bytes: Vec<&[u8]> = BODY.as_bytes().chunks(1).collect();
        let mut bytewise = ResponseParser::new();
        assert_eq!(feed_all(&mut bytewise, &bytes), expected);

        let sevens: Vec<&[u8]> = BODY.as_bytes().chunks(7).collect();
        let mut odd = ResponseParser::new();
        assert_eq!(feed_all(&mut odd, &sevens), expected);
    }

    #[test]
    fn test_concatenated_values_without_separators() {
        let body = concat!(
            r#"{"result":{"token":"a"}}"#,
            r#"{"result":{"token":"b"}}"#,
            r#"{"result":{"modelResponse":{"responseId":"r9","message":"ab"}}}"#,
        );
        let mut parser = ResponseParser::new();
        let events = parser.feed(body);
        assert_eq!(events[0], StreamEvent::token("a"));
        assert_eq!(events[1], StreamEvent::token("b"));
        assert!(matches!(&events[2], StreamEvent::Final { response } if response.response_id == "r9"));
    }

    #[test]
    fn test_malformed_value_is_skipped() {
        let body = concat!(
            r#"{"result":{"token":"before"}}"#,
            "\n",
            r#"{"result":{token:oops}}"#,
            "\n",
            r#"{"result":{"token":"after"}}"#,
            "\n",
        );
        let mut parser = ResponseParser::new();
        let events = parser.feed(body);
        assert_eq!(
            events,
            vec![StreamEvent::token("before"), StreamEvent::token("after")]
        );
        assert!(!parser.is_finished());
    }

    const FINAL_LINE: &str =
        r#"{"result":{"response":{"modelResponse":{"responseId":"r1","message":"before after"}}}}"#;

    fn body_around(corrupt: &str) -> String {
        [
            r#"{"result":{"token":"before"}}"#,
            corrupt,
            r#"{"result":{"token":"after"}}"#,
            FINAL_LINE,
        ]
        .join("\n")
            + "\n"
    }

    fn assert_recovers(body: &str) {
        let mut parser = ResponseParser::new();
        let events = feed_all(&mut parser, &[body.as_bytes()]);

        assert_eq!(events.len(), 3, "events: {:?}", events);
        assert_eq!(events[0], StreamEvent::token("before"));
        assert_eq!(events[1], StreamEvent::token("after"));
        assert!(matches!(&events[2], StreamEvent::Final { response } if response.response_id == "r1"));
        assert!(parser.is_finished());

        let bytes: Vec<&[u8]> = body.as_bytes().chunks(1).collect();
        let mut bytewise = ResponseParser::new();
        assert_eq!(feed_all(&mut bytewise, &bytes), events);
    }

    #[test]
    fn test_line_cut_inside_string_is_dropped() {
        assert_recovers(&body_around(r#"{"result":{"response":{"token":"cut"#));
    }

    #[test]
    fn test_unterminated_string_is_dropped() {
        assert_recovers(&body_around(r#"{"result":{"token":"oops}}"#));
    }

    #[test]
    fn test_unclosed_value_is_dropped_at_next_line() {
        assert_recovers(&body_around(r#"{"result":{"response":{"token":"cut""#));
        assert_recovers(&body_around(r#"{"result":{"response":{"#));
    }

    #[test]
    fn test_value_spanning_lines_is_kept() {
        let body = concat!(
            "{\n",
            "  \"result\": {\n",
            "    \"response\": {\"token\": \"pretty\"}\n",
            "  }\n",
            "}\n",
            r#"{"result":{"token":"next"}}"#,
        );
        let mut parser = ResponseParser::new();
        let events = parser.feed(body);
        assert_eq!(
            events,
            vec![StreamEvent::token("pretty"), StreamEvent::token("next")]
        );
    }

    #[test]
    fn test_stray_text_between_values_is_ignored() {
        let mut parser = ResponseParser::new();
        let events = parser.feed("garbage {\"result\":{\"token\":\"x\"}} 42 ");
        assert_eq!(events, vec![StreamEvent::token("x")]);
    }

    #[test]
    fn test_error_short_circuits() {
        let body = concat!(
            r#"{"result":{"token":"partial"}}"#,
            r#"{"error":{"code":7,"message":"Too many requests"}}"#,
            r#"{"result":{"token":"ignored"}}"#,
        );
        let mut parser = ResponseParser::new();
        let events = parser.feed(body);
        assert_eq!(
            events,
            vec![
                StreamEvent::token("partial"),
                StreamEvent::provider_error("7", "Too many requests"),
            ]
        );
        assert!(parser.is_finished());
        assert!(parser.feed(r#"{"result":{"token":"late"}}"#).is_empty());
    }

    #[test]
    fn test_first_final_ends_sequence() {
        let body = concat!(
            r#"{"result":{"modelResponse":{"responseId":"r1","message":"one"}}}"#,
            r#"{"result":{"modelResponse":{"responseId":"r2","message":"two"}}}"#,
        );
        let mut parser = ResponseParser::new();
        let events = parser.feed(body);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], StreamEvent::Final { response } if response.response_id == "r1"));
    }

    #[test]
    fn test_top_level_token_wins_over_nested() {
        let mut parser = ResponseParser::new();
        let events = parser.feed(r#"{"result":{"token":"top","response":{"token":"nested"}}}"#);
        assert_eq!(events, vec![StreamEvent::token("top")]);
    }

    #[test]
    fn test_empty_token_is_not_content() {
        let mut parser = ResponseParser::new();
        let events = parser.feed(r#"{"result":{"response":{"token":"","isSoftStop":true}}}"#);
        assert!(events.is_empty());
    }

    #[test]
    fn test_finish_drops_incomplete_value() {
        let mut parser = ResponseParser::new();
        assert!(parser.feed(r#"{"result":{"token":"cut"#).is_empty());
        parser.finish();
        assert!(!parser.is_finished());
        assert_eq!(
            parser.feed(r#"{"result":{"token":"next"}}"#),
            vec![StreamEvent::token("next")]
        );
    }

    #[tokio::test]
    async fn test_parse_fragments_stops_at_terminal() {
        let chunks: Vec<Result<&'static str, Error>> = vec![
            Ok(r#"{"result":{"tok"#),
            Ok(r#"en":"Hi"}}{"result":{"modelResponse":{"responseId":"r1"}}}"#),
            Ok(r#"{"result":{"token":"after"}}"#),
        ];
        let events: Vec<StreamEvent> =
            parse_fragments(futures::stream::iter(chunks)).collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], StreamEvent::token("Hi"));
        assert!(events[1].is_terminal());
    }

    #[tokio::test]
    async fn test_parse_fragments_reports_transport_failure() {
        let chunks: Vec<Result<&'static str, Error>> = vec![
            Ok(r#"{"result":{"token":"Hi"}}"#),
            Err(Error::transport("connection reset")),
        ];
        let events: Vec<StreamEvent> =
            parse_fragments(futures::stream::iter(chunks)).collect().await;
        assert_eq!(events[0], StreamEvent::token("Hi"));
        assert!(matches!(&events[1], StreamEvent::TransportError { message } if message.contains("connection reset")));
    }
}
