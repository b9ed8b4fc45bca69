//! Session operations: start, navigate, observe, act, extract, execute, end.
//!
//! Every operation comes in two forms. The plain form posts JSON and decodes
//! the `{success, data}` envelope. The `_streaming` form sets
//! `x-stream-response: true` plus `"streamResponse": true` in the body and
//! hands back an [`EventStream`] for [`crate::consumer`] to drive.

use std::time::Instant;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing_futures::Instrument;

use crate::config::DEFAULT_BASE_URL;
use crate::error::{CoreResult, StagehandError};
use crate::http_client::{HttpClient, RequestCtx};
use crate::model::{
    Operation, SessionActParams, SessionActResponse, SessionEndParams, SessionEndResponse,
    SessionExecuteParams, SessionExecuteResponse, SessionExtractParams, SessionExtractResponse,
    SessionNavigateParams, SessionNavigateResponse, SessionObserveParams, SessionObserveResponse,
    SessionParams, SessionStartParams, SessionStartResponse,
};
use crate::options::RequestOptions;
use crate::stream::EventStream;
use crate::telemetry::{self, OperationTrace};

pub const STREAM_HEADER: &str = "x-stream-response";
const STREAM_BODY_FLAG: &str = "streamResponse";
const MISSING_ID: &str = "missing required id parameter";

/// Issues session calls. Holds the client-level request defaults; per-call
/// options are merged on top of them for each request.
#[derive(Debug, Clone)]
pub struct SessionService {
    http: HttpClient,
    defaults: RequestOptions,
}

struct Prepared {
    url: String,
    opts: RequestOptions,
}

impl Prepared {
    fn headers(&self) -> Vec<(&str, &str)> {
        self.opts
            .headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }

    fn ctx(&self) -> RequestCtx<'_> {
        RequestCtx {
            request_id: self.opts.request_id.as_deref(),
            idempotency_key: self.opts.idempotency_key.as_deref(),
            timeout: self.opts.timeout,
        }
    }
}

impl SessionService {
    pub fn new(http: HttpClient, defaults: RequestOptions) -> Self {
        Self { http, defaults }
    }

    pub fn defaults(&self) -> &RequestOptions {
        &self.defaults
    }

    /// Create a new browser session.
    pub async fn start(
        &self,
        params: &SessionStartParams,
        opts: &RequestOptions,
    ) -> CoreResult<SessionStartResponse> {
        self.call(Operation::Start, None, params, opts).await
    }

    pub async fn start_streaming(
        &self,
        params: &SessionStartParams,
        opts: &RequestOptions,
    ) -> CoreResult<EventStream> {
        self.call_streaming(Operation::Start, None, params, opts).await
    }

    /// Navigate the session's page to a URL.
    pub async fn navigate(
        &self,
        id: &str,
        params: &SessionNavigateParams,
        opts: &RequestOptions,
    ) -> CoreResult<SessionNavigateResponse> {
        self.call(Operation::Navigate, Some(id), params, opts).await
    }

    pub async fn navigate_streaming(
        &self,
        id: &str,
        params: &SessionNavigateParams,
        opts: &RequestOptions,
    ) -> CoreResult<EventStream> {
        self.call_streaming(Operation::Navigate, Some(id), params, opts).await
    }

    /// Identify actionable elements on the page.
    pub async fn observe(
        &self,
        id: &str,
        params: &SessionObserveParams,
        opts: &RequestOptions,
    ) -> CoreResult<SessionObserveResponse> {
        self.call(Operation::Observe, Some(id), params, opts).await
    }

    pub async fn observe_streaming(
        &self,
        id: &str,
        params: &SessionObserveParams,
        opts: &RequestOptions,
    ) -> CoreResult<EventStream> {
        self.call_streaming(Operation::Observe, Some(id), params, opts).await
    }

    /// Perform one browser action from an instruction or an observed `Action`.
    pub async fn act(
        &self,
        id: &str,
        params: &SessionActParams,
        opts: &RequestOptions,
    ) -> CoreResult<SessionActResponse> {
        self.call(Operation::Act, Some(id), params, opts).await
    }

    pub async fn act_streaming(
        &self,
        id: &str,
        params: &SessionActParams,
        opts: &RequestOptions,
    ) -> CoreResult<EventStream> {
        self.call_streaming(Operation::Act, Some(id), params, opts).await
    }

    /// Extract structured data from the page.
    pub async fn extract(
        &self,
        id: &str,
        params: &SessionExtractParams,
        opts: &RequestOptions,
    ) -> CoreResult<SessionExtractResponse> {
        self.call(Operation::Extract, Some(id), params, opts).await
    }

    pub async fn extract_streaming(
        &self,
        id: &str,
        params: &SessionExtractParams,
        opts: &RequestOptions,
    ) -> CoreResult<EventStream> {
        self.call_streaming(Operation::Extract, Some(id), params, opts).await
    }

    /// Run an autonomous multi-step agent task.
    pub async fn execute(
        &self,
        id: &str,
        params: &SessionExecuteParams,
        opts: &RequestOptions,
    ) -> CoreResult<SessionExecuteResponse> {
        self.call(Operation::Execute, Some(id), params, opts).await
    }

    pub async fn execute_streaming(
        &self,
        id: &str,
        params: &SessionExecuteParams,
        opts: &RequestOptions,
    ) -> CoreResult<EventStream> {
        self.call_streaming(Operation::Execute, Some(id), params, opts).await
    }

    /// Terminate the session and release its browser.
    pub async fn end(
        &self,
        id: &str,
        params: &SessionEndParams,
        opts: &RequestOptions,
    ) -> CoreResult<SessionEndResponse> {
        self.call(Operation::End, Some(id), params, opts).await
    }

    pub async fn end_streaming(
        &self,
        id: &str,
        params: &SessionEndParams,
        opts: &RequestOptions,
    ) -> CoreResult<EventStream> {
        self.call_streaming(Operation::End, Some(id), params, opts).await
    }

    fn prepare(
        &self,
        op: Operation,
        id: Option<&str>,
        overrides: &RequestOptions,
    ) -> CoreResult<Prepared> {
        if let Some(id) = id
            && id.is_empty()
        {
            return Err(StagehandError::Validation(MISSING_ID.to_string()));
        }
        let opts = self.defaults.merged_with(overrides);
        let base = opts.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let url = format!("{}/{}", base.trim_end_matches('/'), op.path(id));
        Ok(Prepared { url, opts })
    }

    async fn call<P, R>(
        &self,
        op: Operation,
        id: Option<&str>,
        params: &P,
        overrides: &RequestOptions,
    ) -> CoreResult<R>
    where
        P: SessionParams,
        R: DeserializeOwned,
    {
        let mut prepared = self.prepare(op, id, overrides)?;
        if let Some(flag) = params.x_stream_response() {
            prepared.opts = prepared
                .opts
                .header(STREAM_HEADER, if flag { "true" } else { "false" });
        }
        let span = request_span(op, id, false, &prepared.opts);
        let trace = OperationTrace::new(op.name())
            .session_id_opt(id)
            .request_id_opt(prepared.opts.request_id.as_deref());

        let res = self
            .http
            .post_json::<P, R>(&prepared.url, params, &prepared.headers(), &prepared.ctx())
            .instrument(span.clone())
            .await;

        match res {
            Ok((body, server_request_id, latency_ms)) => {
                span.record("latency.ms", latency_ms);
                if let Some(rid) = server_request_id.as_deref() {
                    span.record("stagehand.req_id", rid);
                }
                telemetry::emit(
                    trace
                        .server_request_id_opt(server_request_id)
                        .latency_ms(latency_ms as u64),
                );
                Ok(body)
            }
            Err(e) => {
                fail(&span, trace, &e);
                Err(e)
            }
        }
    }

    async fn call_streaming<P>(
        &self,
        op: Operation,
        id: Option<&str>,
        params: &P,
        overrides: &RequestOptions,
    ) -> CoreResult<EventStream>
    where
        P: Serialize,
    {
        let mut prepared = self.prepare(op, id, overrides)?;
        prepared.opts = prepared.opts.header(STREAM_HEADER, "true");
        let body = streaming_body(params)?;
        let span = request_span(op, id, true, &prepared.opts);
        let trace = OperationTrace::new(op.name())
            .session_id_opt(id)
            .request_id_opt(prepared.opts.request_id.as_deref())
            .streaming(true);

        let started = Instant::now();
        let res = self
            .http
            .post_sse_lines(&prepared.url, &body, &prepared.headers(), &prepared.ctx())
            .instrument(span.clone())
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;
        span.record("latency.ms", latency_ms);

        match res {
            Ok(lines) => {
                telemetry::emit(trace.latency_ms(latency_ms));
                Ok(EventStream::for_operation(lines, op))
            }
            Err(e) => {
                fail(&span, trace.latency_ms(latency_ms), &e);
                Err(e)
            }
        }
    }
}

fn streaming_body<P: Serialize>(params: &P) -> CoreResult<Value> {
    let mut body = serde_json::to_value(params)
        .map_err(|e| StagehandError::Other(anyhow::anyhow!("serialize params: {e}")))?;
    match &mut body {
        Value::Object(map) => {
            map.insert(STREAM_BODY_FLAG.to_string(), Value::Bool(true));
        }
        other => {
            return Err(StagehandError::Validation(format!(
                "params must serialize to a JSON object, got {other}"
            )));
        }
    }
    Ok(body)
}

fn request_span(
    op: Operation,
    id: Option<&str>,
    streaming: bool,
    opts: &RequestOptions,
) -> tracing::Span {
    tracing::info_span!(
        "stagehand.request",
        stagehand.operation = op.name(),
        session.id = id.unwrap_or(""),
        stagehand.streaming = streaming,
        req.id = opts.request_id.as_deref().unwrap_or(""),
        stagehand.req_id = tracing::field::Empty,
        latency.ms = tracing::field::Empty,
        error.kind = tracing::field::Empty,
    )
}

fn fail(span: &tracing::Span, trace: OperationTrace, e: &StagehandError) {
    span.record("error.kind", e.kind());
    tracing::warn!(parent: span, error.kind = e.kind(), "stagehand request failed: {e}");
    telemetry::emit(trace.error(e));
}
