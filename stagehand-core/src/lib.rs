//! Client SDK for the Stagehand browser-automation API.
//!
//! [`client::StagehandClient`] issues session calls; streaming variants return
//! an [`stream::EventStream`] that [`consumer::consume`] drives to a result.

pub mod client;
pub mod config;
pub mod consumer;
pub mod error;
pub mod http_client;
pub mod log_result;
pub mod model;
pub mod options;
pub mod session;
pub mod sse;
pub mod stream;
pub mod telemetry;

pub use client::StagehandClient;
pub use consumer::{ConsumeOptions, EventSink, consume, consume_as, consume_until};
pub use error::{CoreResult, StagehandError};
pub use options::RequestOptions;
pub use stream::{EventStream, StreamEvent};
