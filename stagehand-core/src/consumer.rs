//! Drives an [`EventStream`] to its final outcome.
//!
//! Rules:
//! - `log` events go to the caller's sink only; they never end the stream
//! - `system/finished` records the result and stops (unless draining)
//! - `system/error` stops immediately with the remote message
//! - any other system status, known or not, is progress only
//! - a transport or decode error wins over anything seen before it
//!
//! The stream is closed on every exit path. Nothing is retried.

use std::future::Future;
use std::time::Instant;

use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing_futures::Instrument;

use crate::error::{CoreResult, StagehandError};
use crate::model::Operation;
use crate::stream::{EventStream, StreamEvent, StreamEventData, SystemStatus};
use crate::telemetry::{self, StreamSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeOptions {
    /// Fail with `IncompleteStream` when no result arrives.
    pub require_result: bool,
    /// Keep reading after `finished` until the body ends. Events read while
    /// draining are discarded.
    pub drain_after_finish: bool,
}

impl Default for ConsumeOptions {
    fn default() -> Self {
        Self {
            require_result: true,
            drain_after_finish: false,
        }
    }
}

impl ConsumeOptions {
    pub fn for_operation(op: Operation) -> Self {
        Self {
            require_result: op.requires_result(),
            ..Self::default()
        }
    }

    pub fn optional_result() -> Self {
        Self {
            require_result: false,
            ..Self::default()
        }
    }

    pub fn drain_after_finish(mut self, drain: bool) -> Self {
        self.drain_after_finish = drain;
        self
    }
}

/// Observes every event the consumer decodes, up to and including the terminal one.
pub trait EventSink {
    fn on_event(&mut self, event: &StreamEvent);
}

impl<F: FnMut(&StreamEvent)> EventSink for F {
    fn on_event(&mut self, event: &StreamEvent) {
        self(event)
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn on_event(&mut self, _event: &StreamEvent) {}
}

/// Logs through `tracing`: log events at debug, status changes at trace.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_event(&mut self, event: &StreamEvent) {
        match &event.data {
            StreamEventData::Log(log) => {
                let category = log
                    .message
                    .as_record()
                    .and_then(|r| r.category.as_deref())
                    .unwrap_or("");
                match log.message.text() {
                    Some(text) => tracing::debug!(event.id = %event.id, category, "{text}"),
                    None => tracing::debug!(event.id = %event.id, message = ?log.message, "log"),
                }
            }
            StreamEventData::System(sys) => {
                tracing::trace!(event.id = %event.id, status = sys.status.as_str(), "status");
            }
        }
    }
}

#[derive(Default)]
struct Tally {
    events: u32,
    log_events: u32,
    terminal: Option<SystemStatus>,
}

/// Consume until the terminal event. See the module docs for the rules.
pub async fn consume<S>(
    stream: &mut EventStream,
    opts: ConsumeOptions,
    sink: &mut S,
) -> CoreResult<Option<Value>>
where
    S: EventSink + ?Sized,
{
    consume_until(stream, opts, sink, std::future::pending::<()>()).await
}

/// Like [`consume`], but gives up with `Cancelled` as soon as `cancel` resolves.
pub async fn consume_until<S, C>(
    stream: &mut EventStream,
    opts: ConsumeOptions,
    sink: &mut S,
    cancel: C,
) -> CoreResult<Option<Value>>
where
    S: EventSink + ?Sized,
    C: Future<Output = ()>,
{
    let started = Instant::now();
    let operation = stream.operation();
    let span = tracing::debug_span!(
        "stagehand.consume",
        stagehand.operation = operation.map(Operation::name).unwrap_or(""),
        stream.events = tracing::field::Empty,
        stream.terminal = tracing::field::Empty,
    );

    let mut tally = Tally::default();
    let outcome = {
        let run = drive(stream, opts, sink, &mut tally).instrument(span.clone());
        tokio::select! {
            biased;
            _ = cancel => Err(StagehandError::Cancelled),
            r = run => r,
        }
    };
    stream.close();

    span.record("stream.events", tally.events);
    if let Some(status) = tally.terminal {
        span.record("stream.terminal", status.as_str());
    }
    if let Err(e) = &outcome {
        tracing::debug!(parent: &span, error.kind = e.kind(), "stream consumption failed: {e}");
    }

    telemetry::emit_stream(StreamSummary {
        operation: operation.map(|o| o.name().to_string()),
        events: tally.events,
        log_events: tally.log_events,
        terminal_status: tally.terminal.map(|s| s.as_str().to_string()),
        result_present: matches!(outcome, Ok(Some(_))),
        elapsed_ms: started.elapsed().as_millis() as u64,
        error_kind: outcome.as_ref().err().map(|e| e.kind().to_string()),
        error_message: outcome.as_ref().err().map(|e| e.to_string()),
    });
    outcome
}

/// Consume and deserialize the final result.
pub async fn consume_as<T, S>(
    stream: &mut EventStream,
    opts: ConsumeOptions,
    sink: &mut S,
) -> CoreResult<Option<T>>
where
    T: DeserializeOwned,
    S: EventSink + ?Sized,
{
    consume(stream, opts, sink)
        .await?
        .map(|v| {
            serde_json::from_value(v)
                .map_err(|e| StagehandError::Decode(format!("unexpected result shape: {e}")))
        })
        .transpose()
}

async fn drive<S>(
    stream: &mut EventStream,
    opts: ConsumeOptions,
    sink: &mut S,
    tally: &mut Tally,
) -> CoreResult<Option<Value>>
where
    S: EventSink + ?Sized,
{
    let mut result = None;
    while let Some(item) = stream.next().await {
        let event = item?;
        if tally.terminal.is_some() {
            // draining
            continue;
        }
        tally.events += 1;
        sink.on_event(&event);

        let sys = match event.data {
            StreamEventData::Log(_) => {
                tally.log_events += 1;
                continue;
            }
            StreamEventData::System(sys) => sys,
        };
        match sys.status {
            SystemStatus::Finished => {
                tally.terminal = Some(SystemStatus::Finished);
                result = sys.result;
                if !opts.drain_after_finish {
                    break;
                }
            }
            SystemStatus::Error => {
                tally.terminal = Some(SystemStatus::Error);
                return Err(StagehandError::remote(sys.error.unwrap_or_default()));
            }
            SystemStatus::Starting
            | SystemStatus::Connected
            | SystemStatus::Running
            | SystemStatus::Unknown => {}
        }
    }

    match result {
        Some(v) => Ok(Some(v)),
        None if opts.require_result => Err(StagehandError::IncompleteStream),
        None => Ok(None),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::http_client::{SseLine, SseStream};
    use crate::telemetry::test_sink;
    use futures_util::stream::{self, Stream};
    use serde_json::json;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};

    /// Line stream that counts how often it is dropped.
    pub(crate) struct Tracked {
        inner: SseStream,
        drops: Arc<AtomicUsize>,
    }

    impl Stream for Tracked {
        type Item = CoreResult<SseLine>;
        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.inner.as_mut().poll_next(cx)
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn frames(events: &[&str]) -> Vec<CoreResult<SseLine>> {
        events
            .iter()
            .flat_map(|e| {
                [
                    Ok(SseLine {
                        line: format!("data: {e}"),
                    }),
                    Ok(SseLine {
                        line: String::new(),
                    }),
                ]
            })
            .collect()
    }

    pub(crate) fn tracked_stream(
        items: Vec<CoreResult<SseLine>>,
        op: Option<Operation>,
    ) -> (EventStream, Arc<AtomicUsize>) {
        let drops = Arc::new(AtomicUsize::new(0));
        let lines: SseStream = Box::pin(Tracked {
            inner: Box::pin(stream::iter(items)),
            drops: drops.clone(),
        });
        let s = match op {
            Some(op) => EventStream::for_operation(lines, op),
            None => EventStream::from_lines(lines),
        };
        (s, drops)
    }

    /// Yields `items`, then never ends.
    pub(crate) fn stalled_stream(
        items: Vec<CoreResult<SseLine>>,
    ) -> (EventStream, Arc<AtomicUsize>) {
        let drops = Arc::new(AtomicUsize::new(0));
        let lines: SseStream = Box::pin(Tracked {
            inner: Box::pin(stream::iter(items).chain(stream::pending())),
            drops: drops.clone(),
        });
        (EventStream::from_lines(lines), drops)
    }

    const LOG_START: &str = r#"{"id":"e1","type":"log","data":{"message":"start","status":"running"}}"#;
    const FINISHED_ACTIONS: &str = r#"{"id":"e2","type":"system","data":{"status":"finished","result":[{"description":"click link","selector":"a.top"}]}}"#;

    #[tokio::test]
    async fn returns_result_after_logs() {
        let (mut s, drops) = tracked_stream(frames(&[LOG_START, FINISHED_ACTIONS]), None);
        let mut seen = Vec::new();
        let mut sink = |ev: &StreamEvent| seen.push(ev.id.clone());
        let out = consume(&mut s, ConsumeOptions::default(), &mut sink)
            .await
            .unwrap();
        assert_eq!(
            out,
            Some(json!([{"description":"click link","selector":"a.top"}]))
        );
        assert_eq!(seen, vec!["e1", "e2"]);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn many_logs_do_not_change_the_result() {
        let logs: Vec<String> = (0..50)
            .map(|i| format!(r#"{{"id":"l{i}","type":"log","data":{{"message":"step {i}"}}}}"#))
            .collect();
        let mut events: Vec<&str> = logs.iter().map(String::as_str).collect();
        events.push(r#"{"id":"s","type":"system","data":{"status":"running"}}"#);
        events.push(r#"{"id":"f","type":"system","data":{"status":"finished","result":{"n":1}}}"#);
        let (mut s, drops) = tracked_stream(frames(&events), None);
        let out = consume(&mut s, ConsumeOptions::default(), &mut NoopSink)
            .await
            .unwrap();
        assert_eq!(out, Some(json!({"n":1})));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn log_without_message_is_skipped() {
        let (mut s, _) = tracked_stream(
            frames(&[
                r#"{"id":"l","type":"log","data":{"status":"running"}}"#,
                r#"{"id":"f","type":"system","data":{"status":"finished","result":{"ok":1}}}"#,
            ]),
            None,
        );
        let mut seen = 0;
        let mut sink = |_: &StreamEvent| seen += 1;
        let out = consume(&mut s, ConsumeOptions::default(), &mut sink)
            .await
            .unwrap();
        assert_eq!(out, Some(json!({"ok":1})));
        assert_eq!(seen, 2);
    }

    #[tokio::test]
    async fn unrecognized_status_is_not_terminal() {
        let (mut s, drops) = tracked_stream(
            frames(&[
                r#"{"id":"s","type":"system","data":{"status":"initializing"}}"#,
                r#"{"id":"f","type":"system","data":{"status":"finished","result":{"ok":1}}}"#,
            ]),
            None,
        );
        let out = consume(&mut s, ConsumeOptions::default(), &mut NoopSink)
            .await
            .unwrap();
        assert_eq!(out, Some(json!({"ok":1})));
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        let (mut s, _) = tracked_stream(
            frames(&[r#"{"id":"s","type":"system","data":{"status":"initializing"}}"#]),
            None,
        );
        let err = consume(&mut s, ConsumeOptions::default(), &mut NoopSink)
            .await
            .unwrap_err();
        assert!(matches!(err, StagehandError::IncompleteStream));
    }

    #[tokio::test]
    async fn error_event_stops_with_message() {
        let (mut s, drops) = tracked_stream(
            frames(&[
                r#"{"id":"e1","type":"system","data":{"status":"error","error":"model timeout"}}"#,
                r#"{"id":"e2","type":"system","data":{"status":"finished","result":"late"}}"#,
            ]),
            None,
        );
        let mut seen = 0;
        let mut sink = |_: &StreamEvent| seen += 1;
        let err = consume(&mut s, ConsumeOptions::default(), &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, StagehandError::Remote(ref m) if m == "model timeout"));
        assert!(err.to_string().contains("model timeout"));
        assert_eq!(seen, 1);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_error_gets_placeholder() {
        for payload in [
            r#"{"id":"e","type":"system","data":{"status":"error","error":""}}"#,
            r#"{"id":"e","type":"system","data":{"status":"error"}}"#,
        ] {
            let (mut s, drops) = tracked_stream(frames(&[payload]), None);
            let err = consume(&mut s, ConsumeOptions::default(), &mut NoopSink)
                .await
                .unwrap_err();
            assert_eq!(err.to_string(), "stream error: unknown error");
            assert_eq!(drops.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn eof_without_terminal_depends_on_requirement() {
        let (mut s, drops) = tracked_stream(frames(&[LOG_START]), None);
        let err = consume(&mut s, ConsumeOptions::default(), &mut NoopSink)
            .await
            .unwrap_err();
        assert!(matches!(err, StagehandError::IncompleteStream));
        assert_eq!(err.to_string(), "stream finished without result");
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        let (mut s, drops) = tracked_stream(frames(&[LOG_START]), None);
        let out = consume(&mut s, ConsumeOptions::optional_result(), &mut NoopSink)
            .await
            .unwrap();
        assert_eq!(out, None);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn finished_with_null_result_is_absent() {
        let finished_null = r#"{"id":"f","type":"system","data":{"status":"finished","result":null}}"#;
        let (mut s, _) = tracked_stream(frames(&[finished_null]), Some(Operation::Navigate));
        let out = consume(
            &mut s,
            ConsumeOptions::for_operation(Operation::Navigate),
            &mut NoopSink,
        )
        .await
        .unwrap();
        assert_eq!(out, None);

        let (mut s, _) = tracked_stream(frames(&[finished_null]), Some(Operation::Observe));
        let err = consume(
            &mut s,
            ConsumeOptions::for_operation(Operation::Observe),
            &mut NoopSink,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StagehandError::IncompleteStream));
    }

    #[tokio::test]
    async fn second_consume_sees_no_events() {
        let (mut s, drops) = tracked_stream(frames(&[LOG_START, FINISHED_ACTIONS]), None);
        consume(&mut s, ConsumeOptions::default(), &mut NoopSink)
            .await
            .unwrap();

        let mut seen = 0;
        let mut sink = |_: &StreamEvent| seen += 1;
        let err = consume(&mut s, ConsumeOptions::default(), &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, StagehandError::IncompleteStream));
        assert_eq!(seen, 0);

        let out = consume(&mut s, ConsumeOptions::optional_result(), &mut NoopSink)
            .await
            .unwrap();
        assert_eq!(out, None);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transport_error_discards_partial_result() {
        let mut items = frames(&[FINISHED_ACTIONS]);
        items.push(Err(StagehandError::Transport("connection reset".into())));
        let (mut s, drops) = tracked_stream(items, None);
        let out = consume(
            &mut s,
            ConsumeOptions::default().drain_after_finish(true),
            &mut NoopSink,
        )
        .await;
        assert!(matches!(out, Err(StagehandError::Transport(ref m)) if m == "connection reset"));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn decode_error_is_surfaced() {
        let (mut s, drops) = tracked_stream(frames(&[LOG_START, "{not json"]), None);
        let err = consume(&mut s, ConsumeOptions::default(), &mut NoopSink)
            .await
            .unwrap_err();
        assert!(matches!(err, StagehandError::Decode(_)));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stops_at_finished_unless_draining() {
        let trailing = r#"{"id":"x","type":"log","data":{"message":"after"}}"#;
        let (mut s, _) = tracked_stream(frames(&[FINISHED_ACTIONS, trailing]), None);
        let mut seen = Vec::new();
        let mut sink = |ev: &StreamEvent| seen.push(ev.id.clone());
        consume(&mut s, ConsumeOptions::default(), &mut sink)
            .await
            .unwrap();
        assert_eq!(seen, vec!["e2"]);
        assert!(s.is_closed());

        let (mut s, drops) = tracked_stream(
            frames(&[
                FINISHED_ACTIONS,
                trailing,
                r#"{"id":"y","type":"system","data":{"status":"error","error":"ignored"}}"#,
            ]),
            None,
        );
        let mut seen = Vec::new();
        let mut sink = |ev: &StreamEvent| seen.push(ev.id.clone());
        let out = consume(
            &mut s,
            ConsumeOptions::default().drain_after_finish(true),
            &mut sink,
        )
        .await
        .unwrap();
        assert!(out.is_some());
        assert_eq!(seen, vec!["e2"]);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_wins_over_pending_stream() {
        let (mut s, drops) = stalled_stream(frames(&[LOG_START]));
        let mut seen = 0;
        let mut sink = |_: &StreamEvent| seen += 1;
        let err = consume_until(
            &mut s,
            ConsumeOptions::default(),
            &mut sink,
            tokio::time::sleep(std::time::Duration::from_millis(20)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StagehandError::Cancelled));
        assert_eq!(seen, 1);
        assert!(s.is_closed());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn consume_as_decodes_typed_result() {
        let (mut s, _) = tracked_stream(frames(&[LOG_START, FINISHED_ACTIONS]), None);
        let actions: Vec<crate::model::Action> =
            consume_as(&mut s, ConsumeOptions::default(), &mut NoopSink)
                .await
                .unwrap()
                .unwrap();
        assert_eq!(actions[0].selector, "a.top");

        let (mut s, _) = tracked_stream(frames(&[FINISHED_ACTIONS]), None);
        let err = consume_as::<u32, _>(&mut s, ConsumeOptions::default(), &mut NoopSink)
            .await
            .unwrap_err();
        assert!(matches!(err, StagehandError::Decode(_)));
    }

    #[tokio::test]
    async fn consume_span_records_counts() {
        let (spans, _guard) = crate::telemetry::test_span::install_capture();
        let (mut s, _) = tracked_stream(frames(&[LOG_START, FINISHED_ACTIONS]), Some(Operation::Act));
        consume(
            &mut s,
            ConsumeOptions::for_operation(Operation::Act),
            &mut NoopSink,
        )
        .await
        .unwrap();
        let span = spans
            .named(telemetry::SPAN_CONSUME)
            .into_iter()
            .find(|s| s.field(telemetry::KEY_OPERATION).as_deref() == Some("act"))
            .expect("consume span");
        assert_eq!(span.field(telemetry::KEY_EVENTS).as_deref(), Some("2"));
        assert_eq!(
            span.field(telemetry::KEY_TERMINAL_STATUS).as_deref(),
            Some("finished")
        );
    }

    #[tokio::test]
    async fn emits_stream_summary() {
        let sink = test_sink::capture();
        let (mut s, _) = tracked_stream(
            frames(&[LOG_START, FINISHED_ACTIONS]),
            Some(Operation::Extract),
        );
        consume(
            &mut s,
            ConsumeOptions::for_operation(Operation::Extract),
            &mut TracingSink,
        )
        .await
        .unwrap();

        let streams = sink.streams.lock().unwrap();
        let summary = streams
            .iter()
            .rev()
            .find(|s| s.operation.as_deref() == Some("extract") && s.log_events == 1)
            .expect("summary recorded");
        assert_eq!(summary.events, 2);
        assert_eq!(summary.terminal_status.as_deref(), Some("finished"));
        assert!(summary.result_present);
        assert!(summary.error_kind.is_none());
    }
}
