//! Telemetry primitives for session calls and stream consumption.
//! Spans are always emitted through `tracing`; structured records reach a sink
//! only once one is installed via `set_telemetry_sink`.

pub mod keys;
pub mod types;
#[cfg(test)]
pub mod test_span;

pub use keys::*;
pub use types::*;

use std::sync::Arc;

use once_cell::sync::OnceCell;

/// Implement this to receive telemetry records.
///
/// Requirements:
/// - Implementations must be thread-safe (`Send + Sync`) and `'static`.
/// - `record` **may** be called from any thread; implementations should avoid panicking.
/// - Keep overhead minimal; this runs once per call and once per consumed stream.
pub trait TelemetrySink: Send + Sync + 'static {
    fn record(&self, trace: OperationTrace);

    /// Default no-op so sinks interested only in calls need not implement it.
    fn record_stream(&self, _summary: StreamSummary) {}
}

static TELEMETRY_SINK: OnceCell<Arc<dyn TelemetrySink>> = OnceCell::new();

// In tests, gate emission to only the calling test thread to avoid cross-test interference.
#[cfg(test)]
thread_local! {
    static TEST_CAPTURE: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Install a global telemetry sink. Returns `false` if a sink is already installed.
///
/// This is a write-once global for the process lifetime (backed by `OnceCell`).
pub fn set_telemetry_sink(sink: Arc<dyn TelemetrySink>) -> bool {
    TELEMETRY_SINK.set(sink).is_ok()
}

#[cfg(test)]
fn capture_enabled() -> bool {
    TEST_CAPTURE.with(|c| c.get())
}

#[cfg(not(test))]
#[inline]
fn capture_enabled() -> bool {
    true
}

/// Emit an operation trace if a sink is installed.
///
/// In tests, emission is suppressed unless enabled via `test_set_capture_enabled`.
#[inline]
pub(crate) fn emit(trace: OperationTrace) {
    if !capture_enabled() {
        return;
    }
    if let Some(sink) = TELEMETRY_SINK.get() {
        sink.record(trace);
    }
}

#[inline]
pub(crate) fn emit_stream(summary: StreamSummary) {
    if !capture_enabled() {
        return;
    }
    if let Some(sink) = TELEMETRY_SINK.get() {
        sink.record_stream(summary);
    }
}

#[cfg(test)]
/// Test-only helper: enable or disable capture for the current test thread.
///
/// `#[tokio::test]` runs on a current-thread runtime, so enabling capture at
/// the top of the test covers everything it awaits.
pub fn test_set_capture_enabled(enabled: bool) {
    TEST_CAPTURE.with(|c| c.set(enabled));
}
