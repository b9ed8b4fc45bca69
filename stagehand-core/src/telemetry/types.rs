use serde::{Deserialize, Serialize};

/// One record per session call (streaming or not), emitted once the HTTP
/// exchange has completed or failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OperationTrace {
    /// Operation name, e.g. "start", "observe".
    pub operation: Option<String>,

    pub session_id: Option<String>,

    /// Caller-supplied request id (sent as `X-Request-Id`).
    pub request_id: Option<String>,

    /// Request id echoed back by the server, if any.
    pub server_request_id: Option<String>,

    pub streaming: bool,

    /// Time to response headers for streaming calls, full round trip otherwise.
    pub latency_ms: Option<u64>,

    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl OperationTrace {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: Some(operation.to_string()),
            ..Default::default()
        }
    }
    pub fn session_id_opt(mut self, id: Option<&str>) -> Self {
        self.session_id = id.map(|s| s.to_string());
        self
    }
    pub fn request_id_opt(mut self, rid: Option<&str>) -> Self {
        self.request_id = rid.map(|s| s.to_string());
        self
    }
    pub fn server_request_id_opt<S: AsRef<str>>(mut self, rid: Option<S>) -> Self {
        self.server_request_id = rid.map(|s| s.as_ref().to_string());
        self
    }
    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }
    pub fn latency_ms(mut self, ms: u64) -> Self {
        self.latency_ms = Some(ms);
        self
    }
    pub fn error(mut self, err: &crate::error::StagehandError) -> Self {
        self.error_kind = Some(err.kind().to_string());
        self.error_message = Some(err.to_string());
        self
    }
}

/// Outcome of consuming one event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StreamSummary {
    pub operation: Option<String>,

    /// Decoded events, terminal included.
    pub events: u32,
    pub log_events: u32,

    /// Status of the terminal event ("finished" / "error"), if one arrived.
    pub terminal_status: Option<String>,
    pub result_present: bool,

    pub elapsed_ms: u64,

    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StagehandError;
    use serde_json::json;

    #[test]
    fn operation_trace_serializes() {
        let trace = OperationTrace::new("observe")
            .session_id_opt(Some("s-1"))
            .request_id_opt(Some("req-abc"))
            .server_request_id_opt(Some("srv-xyz"))
            .streaming(true)
            .latency_ms(42)
            .error(&StagehandError::remote("model timeout"));

        let as_json = serde_json::to_value(&trace).unwrap();
        assert_eq!(as_json["operation"], json!("observe"));
        assert_eq!(as_json["session_id"], json!("s-1"));
        assert_eq!(as_json["server_request_id"], json!("srv-xyz"));
        assert_eq!(as_json["streaming"], json!(true));
        assert_eq!(as_json["latency_ms"], json!(42));
        assert_eq!(as_json["error_kind"], json!("remote"));
        assert_eq!(as_json["error_message"], json!("stream error: model timeout"));
    }
}
