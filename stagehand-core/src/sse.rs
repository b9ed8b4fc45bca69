//! Server-Sent-Events framing on top of a line stream.
//!
//! Rules applied per line:
//! - empty line: dispatch the pending frame (if it carries data)
//! - `:` prefix: comment, ignored
//! - `field: value` or `field:value`; a single leading space of the value is dropped
//! - `data` lines accumulate, joined with `\n`; `event` and `id` are recorded
//! - `retry` and unknown fields are ignored
//!
//! A frame still pending when the line stream ends is dispatched as well.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::stream::Stream;

use crate::error::{CoreResult, StagehandError};
use crate::http_client::SseStream;

/// One dispatched SSE frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: String,
}

#[derive(Default)]
struct PendingFrame {
    event: Option<String>,
    id: Option<String>,
    data: Vec<String>,
}

impl PendingFrame {
    fn take(&mut self) -> Option<SseFrame> {
        let pending = std::mem::take(self);
        if pending.data.is_empty() {
            return None;
        }
        Some(SseFrame {
            event: pending.event,
            id: pending.id,
            data: pending.data.join("\n"),
        })
    }
}

/// Turns a [`SseStream`] of lines into a stream of [`SseFrame`]s.
///
/// A frame with `event: error` is surfaced as a `Transport` error carrying its data.
/// After the first error or end of input the decoder only returns `None`.
pub struct FrameDecoder {
    lines: Option<SseStream>,
    pending: PendingFrame,
}

impl FrameDecoder {
    pub fn new(lines: SseStream) -> Self {
        Self {
            lines: Some(lines),
            pending: PendingFrame::default(),
        }
    }

    /// Drop the underlying line stream. Returns `true` only for the call that
    /// actually released it.
    pub fn close(&mut self) -> bool {
        self.pending = PendingFrame::default();
        self.lines.take().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.lines.is_none()
    }

    fn apply_line(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "data" => self.pending.data.push(value.to_string()),
            "event" => self.pending.event = Some(value.to_string()),
            "id" => self.pending.id = Some(value.to_string()),
            _ => {}
        }
    }

    fn dispatch(frame: SseFrame) -> CoreResult<SseFrame> {
        if frame.event.as_deref() == Some("error") {
            return Err(StagehandError::Transport(frame.data));
        }
        Ok(frame)
    }
}

impl Stream for FrameDecoder {
    type Item = CoreResult<SseFrame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let Some(lines) = self.lines.as_mut() else {
                return Poll::Ready(None);
            };
            match lines.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(l))) => {
                    if l.line.is_empty() {
                        if let Some(frame) = self.pending.take() {
                            return Poll::Ready(Some(Self::dispatch(frame)));
                        }
                        continue;
                    }
                    self.apply_line(&l.line);
                }
                Poll::Ready(Some(Err(e))) => {
                    self.close();
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    let tail = self.pending.take();
                    self.close();
                    return Poll::Ready(tail.map(Self::dispatch));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
