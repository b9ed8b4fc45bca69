use thiserror::Error;

/// Message used when the server reports an `error` status without text.
pub const UNKNOWN_REMOTE_ERROR: &str = "unknown error";

/// Core error type for the Stagehand client.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum StagehandError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("rate limited by stagehand api")]
    RateLimited { retry_after: Option<u64> },

    #[error("stagehand api unavailable: {reason}")]
    ServiceUnavailable { reason: String },

    #[error("api error: {code} {message}")]
    Api { code: String, message: String },

    /// Connection reset, malformed framing or any other failure while reading a stream.
    #[error("stream transport error: {0}")]
    Transport(String),

    /// A frame arrived but its payload is not a valid stream event.
    #[error("stream decode error: {0}")]
    Decode(String),

    #[error("request timed out")]
    Timeout,

    #[error("operation cancelled by caller")]
    Cancelled,

    /// The server ended the operation with an `error` system event.
    #[error("stream error: {0}")]
    Remote(String),

    /// The stream closed without a terminal event while a result was expected.
    #[error("stream finished without result")]
    IncompleteStream,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StagehandError {
    /// Build a remote error, substituting a placeholder for an empty message.
    pub fn remote(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.trim().is_empty() {
            Self::Remote(UNKNOWN_REMOTE_ERROR.to_string())
        } else {
            Self::Remote(message)
        }
    }

    /// Short, stable name of the variant for telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServiceUnavailable { .. } => "unavailable",
            Self::Api { .. } => "api",
            Self::Transport(_) => "transport",
            Self::Decode(_) => "decode",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Remote(_) => "remote",
            Self::IncompleteStream => "incomplete_stream",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, StagehandError>;
