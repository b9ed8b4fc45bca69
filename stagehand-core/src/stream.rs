//! Streaming primitives for session operations.
//!
//! Contract:
//! - A stream carries 0..n `log` events interleaved with `system` status events.
//! - Exactly one terminal `system` event (`finished` or `error`) is expected.
//! - Events after the terminal one carry no meaning for the caller.
//!
//! Wire frames look like `data: {"id":"…","type":"system","data":{"status":"finished","result":…}}`.
//! Decoding peeks the `type` discriminator first and then parses `data` as the
//! matching variant, so key order never matters.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreResult, StagehandError};
use crate::http_client::SseStream;
use crate::model::Operation;
use crate::sse::FrameDecoder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    System,
    Log,
}

/// Lifecycle state reported by `system` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemStatus {
    Starting,
    Connected,
    Running,
    Finished,
    Error,
    /// Any status this client does not know; never terminal.
    #[serde(other)]
    Unknown,
}

impl SystemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Connected => "connected",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemEventData {
    pub status: SystemStatus,
    /// Operation result, present when `status` is `finished`. JSON null is `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error message, present when `status` is `error`. May be empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Structured log record as emitted by the Stagehand server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
    /// Named extra values, each usually shaped `{"value": "...", "type": "..."}`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub auxiliary: BTreeMap<String, Value>,
}

impl LogRecord {
    /// The string `value` of an auxiliary entry.
    pub fn auxiliary_value(&self, name: &str) -> Option<&str> {
        self.auxiliary.get(name)?.get("value")?.as_str()
    }
}

/// A log message is plain text, a structured record, or anything else kept raw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogMessage {
    Text(String),
    Record(LogRecord),
    Other(Value),
}

impl Default for LogMessage {
    fn default() -> Self {
        Self::Other(Value::Null)
    }
}

impl LogMessage {
    /// Human-readable text of the message, if it has one.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Record(r) => Some(&r.message),
            Self::Other(_) => None,
        }
    }

    pub fn as_record(&self) -> Option<&LogRecord> {
        match self {
            Self::Record(r) => Some(r),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEventData {
    /// Missing on some server builds; decodes as `Other(Null)`.
    #[serde(default)]
    pub message: LogMessage,
    /// Always `running` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Payload of a [`StreamEvent`], discriminated by the event `type`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEventData {
    System(SystemEventData),
    Log(LogEventData),
}

/// One decoded event. Immutable once read off the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub id: String,
    pub data: StreamEventData,
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(default)]
    id: String,
    #[serde(rename = "type")]
    kind: EventType,
    #[serde(default)]
    data: Value,
}

impl StreamEvent {
    /// Decode one frame payload.
    pub fn from_json(s: &str) -> CoreResult<Self> {
        let raw: RawEvent = serde_json::from_str(s)
            .map_err(|e| StagehandError::Decode(format!("invalid stream event: {e}")))?;
        let data = match raw.kind {
            EventType::System => StreamEventData::System(
                serde_json::from_value(raw.data)
                    .map_err(|e| StagehandError::Decode(format!("invalid system event: {e}")))?,
            ),
            EventType::Log => StreamEventData::Log(
                serde_json::from_value(raw.data)
                    .map_err(|e| StagehandError::Decode(format!("invalid log event: {e}")))?,
            ),
        };
        Ok(Self { id: raw.id, data })
    }

    pub fn event_type(&self) -> EventType {
        match self.data {
            StreamEventData::System(_) => EventType::System,
            StreamEventData::Log(_) => EventType::Log,
        }
    }

    pub fn as_system(&self) -> Option<&SystemEventData> {
        match &self.data {
            StreamEventData::System(s) => Some(s),
            StreamEventData::Log(_) => None,
        }
    }

    pub fn as_log(&self) -> Option<&LogEventData> {
        match &self.data {
            StreamEventData::Log(l) => Some(l),
            StreamEventData::System(_) => None,
        }
    }

    /// Returns true for `system` events with status `finished` or `error`.
    pub fn is_terminal(&self) -> bool {
        self.as_system().is_some_and(|s| s.status.is_terminal())
    }
}

/// Typed event stream over an open streaming response.
///
/// Owns the response body. The body is released when the stream ends, on the
/// first error, on [`EventStream::close`], or on drop, whichever comes first.
/// Once released the stream yields `None` forever.
pub struct EventStream {
    frames: FrameDecoder,
    operation: Option<Operation>,
}

impl EventStream {
    pub fn from_lines(lines: SseStream) -> Self {
        Self {
            frames: FrameDecoder::new(lines),
            operation: None,
        }
    }

    pub(crate) fn for_operation(lines: SseStream, operation: Operation) -> Self {
        Self {
            frames: FrameDecoder::new(lines),
            operation: Some(operation),
        }
    }

    pub fn operation(&self) -> Option<Operation> {
        self.operation
    }

    /// Release the underlying response. Returns `true` only for the call that
    /// actually released it.
    pub fn close(&mut self) -> bool {
        let released = self.frames.close();
        if released {
            tracing::trace!(operation = ?self.operation, "event stream closed");
        }
        released
    }

    pub fn is_closed(&self) -> bool {
        self.frames.is_closed()
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("operation", &self.operation)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Stream for EventStream {
    type Item = CoreResult<StreamEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.frames).poll_next(cx) {
            Poll::Ready(Some(Ok(frame))) => match StreamEvent::from_json(&frame.data) {
                Ok(ev) => Poll::Ready(Some(Ok(ev))),
                Err(e) => {
                    self.close();
                    Poll::Ready(Some(Err(e)))
                }
            },
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::SseLine;
    use futures_util::{StreamExt, stream};
    use serde_json::json;

    #[test]
    fn decodes_system_finished_with_result() {
        let ev = StreamEvent::from_json(
            r#"{"id":"e2","type":"system","data":{"status":"finished","result":[{"description":"click link","selector":"a.top"}]}}"#,
        )
        .unwrap();
        assert_eq!(ev.id, "e2");
        assert_eq!(ev.event_type(), EventType::System);
        assert!(ev.is_terminal());
        let sys = ev.as_system().unwrap();
        assert_eq!(sys.status, SystemStatus::Finished);
        assert_eq!(
            sys.result,
            Some(json!([{"description":"click link","selector":"a.top"}]))
        );
    }

    #[test]
    fn key_order_does_not_matter() {
        let ev = StreamEvent::from_json(
            r#"{"data":{"error":"boom","status":"error"},"type":"system","id":"x"}"#,
        )
        .unwrap();
        let sys = ev.as_system().unwrap();
        assert_eq!(sys.status, SystemStatus::Error);
        assert_eq!(sys.error.as_deref(), Some("boom"));
    }

    #[test]
    fn null_result_is_none() {
        let ev = StreamEvent::from_json(
            r#"{"id":"e","type":"system","data":{"status":"finished","result":null}}"#,
        )
        .unwrap();
        assert_eq!(ev.as_system().unwrap().result, None);
    }

    #[test]
    fn decodes_plain_and_structured_logs() {
        let ev = StreamEvent::from_json(
            r#"{"id":"e1","type":"log","data":{"message":"start","status":"running"}}"#,
        )
        .unwrap();
        assert!(!ev.is_terminal());
        let log = ev.as_log().unwrap();
        assert_eq!(log.message.text(), Some("start"));
        assert_eq!(log.status.as_deref(), Some("running"));

        let ev = StreamEvent::from_json(
            r#"{"id":"e3","type":"log","data":{"status":"running","message":{"category":"extraction","message":"done","level":1,"auxiliary":{"result":{"value":"{\"a\":1}","type":"object"}}}}}"#,
        )
        .unwrap();
        let record = ev.as_log().unwrap().message.as_record().unwrap();
        assert_eq!(record.category.as_deref(), Some("extraction"));
        assert_eq!(record.auxiliary_value("result"), Some("{\"a\":1}"));
        assert_eq!(record.auxiliary_value("missing"), None);
    }

    #[test]
    fn odd_log_shapes_are_kept_raw() {
        let ev = StreamEvent::from_json(r#"{"id":"e","type":"log","data":{"message":[1,2]}}"#)
            .unwrap();
        let log = ev.as_log().unwrap();
        assert_eq!(log.message, LogMessage::Other(json!([1, 2])));
        assert_eq!(log.message.text(), None);
    }

    #[test]
    fn unknown_type_or_bad_json_is_decode_error() {
        let err = StreamEvent::from_json(r#"{"id":"e","type":"debug","data":{}}"#).unwrap_err();
        assert!(matches!(err, StagehandError::Decode(_)));
        let err = StreamEvent::from_json(r#"{"id":"e","type":"system""#).unwrap_err();
        assert!(matches!(err, StagehandError::Decode(_)));
    }

    #[test]
    fn unknown_status_and_missing_message_are_tolerated() {
        let ev = StreamEvent::from_json(
            r#"{"id":"e","type":"system","data":{"status":"initializing"}}"#,
        )
        .unwrap();
        assert_eq!(ev.as_system().unwrap().status, SystemStatus::Unknown);
        assert!(!ev.is_terminal());

        let ev = StreamEvent::from_json(r#"{"id":"l","type":"log","data":{"status":"running"}}"#)
            .unwrap();
        let log = ev.as_log().unwrap();
        assert_eq!(log.message, LogMessage::Other(Value::Null));
        assert_eq!(log.message.text(), None);
    }

    fn lines(ls: &[&str]) -> SseStream {
        let items: Vec<CoreResult<SseLine>> = ls
            .iter()
            .map(|l| Ok(SseLine { line: l.to_string() }))
            .collect();
        Box::pin(stream::iter(items))
    }

    #[tokio::test]
    async fn event_stream_decodes_frames_and_fuses() {
        let mut s = EventStream::from_lines(lines(&[
            r#"data: {"id":"1","type":"system","data":{"status":"starting"}}"#,
            "",
            r#"data: {"id":"2","type":"system","data":{"status":"finished"}}"#,
            "",
        ]));
        assert_eq!(s.next().await.unwrap().unwrap().id, "1");
        assert_eq!(s.next().await.unwrap().unwrap().id, "2");
        assert!(s.next().await.is_none());
        assert!(s.is_closed());
        assert!(s.next().await.is_none());
    }

    #[tokio::test]
    async fn bad_frame_closes_stream() {
        let mut s = EventStream::from_lines(lines(&["data: not json", "", "data: {}", ""]));
        assert!(matches!(s.next().await, Some(Err(StagehandError::Decode(_)))));
        assert!(s.is_closed());
        assert!(s.next().await.is_none());
        assert!(!s.close());
    }
}
