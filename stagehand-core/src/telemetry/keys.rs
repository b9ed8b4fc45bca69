/// Span/Log attribute keys for session calls.
/// Keep these stable; changing them is a breaking change for dashboards.
pub const SPAN_REQUEST: &str = "stagehand.request";
pub const SPAN_CONSUME: &str = "stagehand.consume";

pub const KEY_OPERATION: &str = "stagehand.operation";
pub const KEY_SESSION_ID: &str = "session.id";
pub const KEY_STREAMING: &str = "stagehand.streaming";
pub const KEY_REQUEST_ID: &str = "req.id"; // caller-supplied X-Request-Id
pub const KEY_SERVER_REQUEST_ID: &str = "stagehand.req_id";

pub const KEY_LATENCY_MS: &str = "latency.ms";
pub const KEY_EVENTS: &str = "stream.events";
pub const KEY_TERMINAL_STATUS: &str = "stream.terminal";

/// Error-related (if applicable)
pub const KEY_ERROR_KIND: &str = "error.kind";
pub const KEY_ERROR_MESSAGE: &str = "error.message";
