//! Wire codecs.
//!
//! Two framings are supported: newline-delimited JSON for the stdio
//! transport, and Server-Sent Events for the streaming HTTP transport.
//! Both are `tokio_util::codec` decoders so they can sit behind a
//! `FramedRead` on any byte source.
//!
//! Malformed frames are logged and skipped. A bad line from the peer must
//! never tear down the session.

use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::mcp::protocol::Message;

/// Maximum length of a single JSON line (1 MiB).
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Serialize a message to its JSON text (no trailing newline).
pub fn encode(message: &Message) -> Result<String> {
    let text = match message {
        Message::Request(req) => serde_json::to_string(req)?,
        Message::Response(res) => serde_json::to_string(res)?,
        Message::Notification(notif) => serde_json::to_string(notif)?,
    };
    Ok(text)
}

/// Parse JSON text into a message, classifying it by shape.
///
/// Requests carry `method` and `id`, notifications carry only `method`,
/// responses carry `id` and exactly one of `result` or `error`. Any other
/// shape is rejected.
pub fn decode(text: &str) -> Result<Message> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| Error::Protocol(format!("invalid JSON: {}", e)))?;

    let Value::Object(map) = value else {
        return Err(Error::Protocol("expected a JSON object".to_string()));
    };

    let has = |key: &str| map.contains_key(key);
    match (has("method"), has("id"), has("result"), has("error")) {
        (true, true, false, false) => Ok(Message::Request(from_map(map, "request")?)),
        (true, false, false, false) => Ok(Message::Notification(from_map(map, "notification")?)),
        (false, true, true, false) | (false, true, false, true) => {
            Ok(Message::Response(from_map(map, "response")?))
        }
        (false, true, true, true) => Err(Error::Protocol(
            "response carries both result and error".to_string(),
        )),
        _ => Err(Error::Protocol("unrecognized message shape".to_string())),
    }
}

fn from_map<T: DeserializeOwned>(map: Map<String, Value>, kind: &str) -> Result<T> {
    serde_json::from_value(Value::Object(map))
        .map_err(|e| Error::Protocol(format!("malformed {}: {}", kind, e)))
}

// ===== Newline-delimited JSON =====

/// Newline-delimited JSON framing for [`Message`]s.
#[derive(Debug)]
pub struct JsonLineCodec {
    lines: LinesCodec,
}

impl JsonLineCodec {
    pub fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
        }
    }

    fn next_message(
        &mut self,
        buf: &mut BytesMut,
        eof: bool,
    ) -> Result<Option<Message>> {
        loop {
            let line = if eof {
                self.lines.decode_eof(buf)
            } else {
                self.lines.decode(buf)
            };

            match line {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    trace!("Received: {}", trimmed);
                    match decode(trimmed) {
                        Ok(message) => return Ok(Some(message)),
                        Err(e) => warn!("Skipping undecodable line: {}", e),
                    }
                }
                Ok(None) => return Ok(None),
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!("Skipping line longer than {} bytes", MAX_LINE_LENGTH);
                }
                Err(LinesCodecError::Io(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                    warn!("Skipping line that is not valid UTF-8");
                }
                Err(LinesCodecError::Io(e)) => return Err(e.into()),
            }
        }
    }
}

impl Default for JsonLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for JsonLineCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Message>> {
        self.next_message(buf, false)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Message>> {
        self.next_message(buf, true)
    }
}

impl Encoder<Message> for JsonLineCodec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        let text = encode(&item)?;
        trace!("Sending: {}", text);
        dst.reserve(text.len() + 1);
        dst.put_slice(text.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

// ===== Server-Sent Events =====

/// One dispatched Server-Sent Event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the last `event:` field, if any.
    pub event: Option<String>,
    /// All `data:` lines joined with `\n`.
    pub data: String,
    pub id: Option<String>,
}

impl SseEvent {
    /// Unlabeled and `message` events carry JSON-RPC payloads.
    pub fn is_message(&self) -> bool {
        matches!(self.event.as_deref(), None | Some("message"))
    }

    pub fn is_endpoint(&self) -> bool {
        self.event.as_deref() == Some("endpoint")
    }
}

/// Incremental Server-Sent Events parser.
///
/// Input may arrive split at any byte. A label from an `event:` line is
/// held until the blank line that ends the event, so the label and its
/// `data:` payload are always delivered together.
#[derive(Debug, Default)]
pub struct SseDecoder {
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (terminator already stripped). Returns an event when
    /// the line completes one.
    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            "retry" => {}
            other => trace!("Ignoring SSE field: {}", other),
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let id = self.id.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent { event, data, id })
    }
}

impl Decoder for SseDecoder {
    type Item = SseEvent;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<SseEvent>> {
        while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
            let mut line = buf.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(pos - 1);
            }
            let text = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&text) {
                return Ok(Some(event));
            }
        }

        if buf.len() > MAX_LINE_LENGTH {
            warn!("Discarding SSE line longer than {} bytes", MAX_LINE_LENGTH);
            buf.advance(buf.len());
        }
        Ok(None)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<SseEvent>> {
        if let Some(event) = self.decode(buf)? {
            return Ok(Some(event));
        }
        if !buf.is_empty() {
            let rest = buf.split();
            let text = String::from_utf8_lossy(&rest);
            let text = text.trim_end_matches('\r');
            if let Some(event) = self.process_line(text) {
                return Ok(Some(event));
            }
        }
        Ok(self.dispatch())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};
    use serde_json::json;

    fn decode_all_sse(chunks: &[&str]) -> Vec<SseEvent> {
        let mut decoder = SseDecoder::new();
        let mut buf = BytesMut::new();
        let mut events = Vec::new();
        for chunk in chunks {
            buf.extend_from_slice(chunk.as_bytes());
            while let Some(event) = decoder.decode(&mut buf).unwrap() {
                events.push(event);
            }
        }
        while let Some(event) = decoder.decode_eof(&mut buf).unwrap() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_decode_classifies_shapes() {
        let req = decode(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list","params":{}}"#).unwrap();
        assert!(matches!(req, Message::Request(ref r) if r.method == "tools/list"));

        let notif = decode(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(matches!(notif, Message::Notification(_)));

        let ok = decode(r#"{"jsonrpc":"2.0","id":"a","result":{"tools":[]}}"#).unwrap();
        assert!(matches!(ok, Message::Response(ref r) if !r.is_error()));

        let err = decode(r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"nope"}}"#)
            .unwrap();
        assert!(matches!(err, Message::Response(ref r) if r.is_error()));
    }

    #[test]
    fn test_decode_rejects_unknown_shapes() {
        assert!(matches!(decode("not json"), Err(Error::Protocol(_))));
        assert!(matches!(decode("[1,2,3]"), Err(Error::Protocol(_))));
        assert!(matches!(decode(r#"{"jsonrpc":"2.0"}"#), Err(Error::Protocol(_))));
        assert!(matches!(
            decode(r#"{"jsonrpc":"2.0","id":1,"result":{},"error":{"code":1,"message":"x"}}"#),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            decode(r#"{"jsonrpc":"2.0","id":{"nested":true},"method":"ping"}"#),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_encode_decode_preserves_messages() {
        let messages = vec![
            Message::Request(JsonRpcRequest::new(
                RequestId::Number(7),
                "tools/call",
                Some(json!({"name": "buy_stock", "arguments": {"stock_id": "AAPL", "quantity": 10}})),
            )),
            Message::Response(JsonRpcResponse::success(
                RequestId::String("x-1".to_string()),
                json!({"content": []}),
            )),
            Message::Response(JsonRpcResponse::failure(RequestId::Number(8), -32602, "Unknown tool 'zap'")),
            Message::Notification(JsonRpcNotification::new("notifications/initialized", None)),
        ];

        for message in messages {
            let text = encode(&message).unwrap();
            assert_eq!(decode(&text).unwrap(), message);
        }
    }

    #[test]
    fn test_json_line_codec_skips_garbage() {
        let mut codec = JsonLineCodec::new();
        let mut buf = BytesMut::from(
            "garbage line\n\n{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n{\"half\":",
        );

        let first = codec.decode(&mut buf).unwrap();
        assert!(matches!(first, Some(Message::Request(ref r)) if r.method == "ping"));

        // Incomplete line waits for more input.
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"true}\n");
        // Completed but still not a message: skipped.
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_json_line_codec_eof_without_newline() {
        let mut codec = JsonLineCodec::new();
        let mut buf = BytesMut::from("{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        let last = codec.decode_eof(&mut buf).unwrap();
        assert!(matches!(last, Some(Message::Notification(_))));
    }

    #[test]
    fn test_json_line_codec_encodes_one_line() {
        let mut codec = JsonLineCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(
                Message::Request(JsonRpcRequest::new(RequestId::Number(1), "ping", None)),
                &mut buf,
            )
            .unwrap();
        let text = std::str::from_utf8(&buf).unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(text.matches('\n').count(), 1);
    }

    #[test]
    fn test_sse_endpoint_event() {
        let events = decode_all_sse(&["event: endpoint\ndata: /session/abc\n\n"]);
        assert_eq!(events.len(), 1);
        assert!(events[0].is_endpoint());
        assert_eq!(events[0].data, "/session/abc");
    }

    #[test]
    fn test_sse_split_chunks_and_crlf() {
        let events = decode_all_sse(&[
            "eve",
            "nt: endpoint\r\nda",
            "ta: /messages/?session_id=1\r\n",
            "\r\n",
            ": ping\r\n\r\n",
            "event: message\r\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\r\n\r\n",
        ]);
        assert_eq!(events.len(), 2);
        assert!(events[0].is_endpoint());
        assert_eq!(events[0].data, "/messages/?session_id=1");
        assert!(events[1].is_message());
        assert!(decode(&events[1].data).is_ok());
    }

    #[test]
    fn test_sse_multi_line_data_and_label_reset() {
        let events = decode_all_sse(&["event: custom\ndata: a\ndata: b\n\ndata: plain\n\n"]);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.as_deref(), Some("custom"));
        assert_eq!(events[0].data, "a\nb");
        assert_eq!(events[1].event, None);
        assert!(events[1].is_message());
    }

    #[test]
    fn test_sse_event_without_data_is_dropped() {
        let events = decode_all_sse(&["event: endpoint\n\ndata: x\n\n"]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, None);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn test_sse_flushes_pending_event_at_eof() {
        let events = decode_all_sse(&["event: message\ndata: tail"]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "tail");
    }
}
