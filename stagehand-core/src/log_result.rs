//! Opt-in recovery of a result from structured log events.
//!
//! Some server versions report the useful payload only inside log records:
//! - observation: `{category:"observation", message:"found elements", auxiliary:{elements:{value:"<json>"}}}`
//! - anything else: `auxiliary.result.value`, parsed as JSON when possible, kept as a string otherwise
//!
//! The first mined value is kept. It is used only when the terminal event
//! carries no result; the core consumer never looks at logs.

use std::future::Future;

use serde_json::Value;

use crate::consumer::{self, ConsumeOptions, EventSink};
use crate::error::{CoreResult, StagehandError};
use crate::stream::{EventStream, LogRecord, StreamEvent};

const OBSERVATION_CATEGORY: &str = "observation";
const FOUND_ELEMENTS: &str = "found elements";

/// Extract a candidate result from one log record.
pub fn mine_record(record: &LogRecord) -> Option<Value> {
    if record.category.as_deref() == Some(OBSERVATION_CATEGORY)
        && record.message == FOUND_ELEMENTS
        && let Some(raw) = record.auxiliary_value("elements").filter(|v| !v.is_empty())
        && let Ok(elements) = serde_json::from_str(raw)
    {
        return Some(elements);
    }
    let raw = record.auxiliary_value("result").filter(|v| !v.is_empty())?;
    Some(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())))
}

/// Sink adapter that mines log events and forwards everything to `inner`.
pub struct LogResultMiner<'a, S: EventSink + ?Sized> {
    inner: &'a mut S,
    mined: Option<Value>,
}

impl<'a, S: EventSink + ?Sized> LogResultMiner<'a, S> {
    pub fn new(inner: &'a mut S) -> Self {
        Self { inner, mined: None }
    }

    pub fn mined(&self) -> Option<&Value> {
        self.mined.as_ref()
    }

    pub fn into_mined(self) -> Option<Value> {
        self.mined
    }
}

impl<S: EventSink + ?Sized> EventSink for LogResultMiner<'_, S> {
    fn on_event(&mut self, event: &StreamEvent) {
        if self.mined.is_none()
            && let Some(record) = event.as_log().and_then(|l| l.message.as_record())
        {
            self.mined = mine_record(record);
            if self.mined.is_some() {
                tracing::trace!(event.id = %event.id, "result recovered from log event");
            }
        }
        self.inner.on_event(event);
    }
}

/// Consume like [`consumer::consume`], falling back to a mined log result when
/// the terminal event has none. Errors are never replaced by a mined value.
pub async fn consume_with_fallback<S>(
    stream: &mut EventStream,
    opts: ConsumeOptions,
    sink: &mut S,
) -> CoreResult<Option<Value>>
where
    S: EventSink + ?Sized,
{
    consume_with_fallback_until(stream, opts, sink, std::future::pending::<()>()).await
}

/// [`consume_with_fallback`] that stops with `Cancelled` once `cancel` resolves.
/// A value mined before cancellation is dropped.
pub async fn consume_with_fallback_until<S, C>(
    stream: &mut EventStream,
    opts: ConsumeOptions,
    sink: &mut S,
    cancel: C,
) -> CoreResult<Option<Value>>
where
    S: EventSink + ?Sized,
    C: Future<Output = ()>,
{
    let mut miner = LogResultMiner::new(sink);
    let relaxed = ConsumeOptions {
        require_result: false,
        ..opts
    };
    let terminal = consumer::consume_until(stream, relaxed, &mut miner, cancel).await?;
    match terminal.or_else(|| miner.into_mined()) {
        Some(v) => Ok(Some(v)),
        None if opts.require_result => Err(StagehandError::IncompleteStream),
        None => Ok(None),
    }
}
