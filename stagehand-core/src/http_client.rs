use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::stream::{Stream, StreamExt};
use http::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Serialize};

use crate::config::HttpCfg;
use crate::error::{CoreResult, StagehandError};

/// Request context carries tracing IDs, idempotency key and per-call timeout.
#[derive(Clone, Copy, Default)]
pub struct RequestCtx<'a> {
    pub request_id: Option<&'a str>,
    pub idempotency_key: Option<&'a str>,
    pub timeout: Option<Duration>,
}

/// Represents a single Server-Sent-Event line (already split on `\n`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseLine {
    pub line: String,
}

/// A boxed stream of `SseLine` results.
pub type SseStream = Pin<Box<dyn Stream<Item = CoreResult<SseLine>> + Send>>;

/// A boxed stream of raw body chunks with errors already mapped.
pub type ByteStream = Pin<Box<dyn Stream<Item = CoreResult<Bytes>> + Send>>;

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new_default() -> CoreResult<Self> {
        Self::from_cfg(&HttpCfg::default())
    }

    pub fn from_cfg(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.request_timeout_ms));
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder.build().map_err(|e| {
            StagehandError::Other(anyhow::anyhow!("http client build failed: {e}"))
        })?;
        Ok(Self {
            inner,
            user_agent: concat!("stagehand-rs/", env!("CARGO_PKG_VERSION")).to_string(),
        })
    }

    fn post<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> RequestBuilder {
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header(USER_AGENT, &self.user_agent);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        if let Some(rid) = ctx.request_id {
            req = req.header("X-Request-Id", rid);
        }
        if let Some(ik) = ctx.idempotency_key {
            req = req.header("Idempotency-Key", ik);
        }
        if let Some(t) = ctx.timeout {
            req = req.timeout(t);
        }
        req
    }

    /// POST JSON and decode a JSON body. Returns the body, the server request id
    /// (if any) and the latency in milliseconds.
    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<(R, Option<String>, u32)> {
        let start = Instant::now();
        let resp = self
            .post(url, body, headers, ctx)
            .send()
            .await
            .map_err(map_send_error)?;

        let latency = start.elapsed().as_millis() as u32;
        let status = resp.status();
        let headers = resp.headers().clone();
        let server_request_id = extract_request_id(&headers);

        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let ra = parse_retry_after(&headers);
            return Err(map_http_error(status, ra, &text));
        }

        let parsed = resp.json::<R>().await.map_err(|e| StagehandError::Api {
            code: status.as_u16().to_string(),
            message: format!("json decode error: {e}"),
        })?;
        Ok((parsed, server_request_id, latency))
    }

    /// POST JSON and return an SSE (Server-Sent Events) line stream.
    /// Each yielded item is one raw line (trim not applied) from the SSE channel.
    /// A non-success status is returned as an error before any line is read.
    pub async fn post_sse_lines<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<SseStream> {
        let resp = self
            .post(url, body, headers, ctx)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(map_send_error)?;

        let status = resp.status();
        if !status.is_success() {
            let headers = resp.headers().clone();
            let ra = parse_retry_after(&headers);
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, ra, &body));
        }

        let bytes = resp.bytes_stream().map(|r| r.map_err(map_body_error));
        Ok(lines_from_bytes(Box::pin(bytes)))
    }
}

/// Split an arbitrary byte stream into SSE lines.
pub fn lines_from_bytes(bytes: ByteStream) -> SseStream {
    Box::pin(LineStream::new(bytes))
}

fn map_send_error(e: reqwest::Error) -> StagehandError {
    if e.is_timeout() {
        StagehandError::Timeout
    } else {
        StagehandError::ServiceUnavailable {
            reason: e.to_string(),
        }
    }
}

fn map_body_error(e: reqwest::Error) -> StagehandError {
    if e.is_timeout() {
        StagehandError::Timeout
    } else {
        StagehandError::Transport(e.to_string())
    }
}

fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    static CANDIDATES: [&str; 3] = ["x-request-id", "request-id", "x-stagehand-request-id"];
    for k in CANDIDATES {
        if let Some(v) = headers.get(k)
            && let Ok(s) = v.to_str()
        {
            return Some(s.to_string());
        }
    }
    None
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    if let Some(v) = headers.get("retry-after")
        && let Ok(s) = v.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Some(secs);
    }
    // HTTP-date forms are ignored.
    None
}

fn map_http_error(status: StatusCode, retry_after: Option<u64>, body: &str) -> StagehandError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => StagehandError::RateLimited { retry_after },
        s if s.is_server_error() => StagehandError::ServiceUnavailable {
            reason: format!("status {}", s.as_u16()),
        },
        s => StagehandError::Api {
            code: s.as_u16().to_string(),
            message: truncate(body, 300),
        },
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        let mut t = s[..end].to_string();
        t.push_str("...");
        t
    } else {
        s.to_string()
    }
}

/// Longest line accepted from a stream body, newline excluded.
pub const MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

/// Internal line splitter over a bytes stream; yields `SseLine`s separated by '\n'.
/// Bytes are buffered until a full line is available so multi-byte characters
/// split across chunks decode correctly. A line that is not UTF-8 or grows past
/// the limit ends the stream with a decode error.
struct LineStream {
    inner: ByteStream,
    buf: Vec<u8>,
    // bytes of `buf` already known to hold no '\n'
    scanned: usize,
    max_line: usize,
    done: bool,
}

impl LineStream {
    fn new(inner: ByteStream) -> Self {
        Self::with_limit(inner, MAX_LINE_BYTES)
    }

    fn with_limit(inner: ByteStream, max_line: usize) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            scanned: 0,
            max_line,
            done: false,
        }
    }

    fn take_line(&mut self, idx: usize) -> CoreResult<SseLine> {
        let mut raw: Vec<u8> = self.buf.drain(..=idx).collect();
        self.scanned = 0;
        raw.pop();
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
        decode_line(raw)
    }

    fn fail(&mut self, e: StagehandError) -> Poll<Option<CoreResult<SseLine>>> {
        self.done = true;
        self.buf.clear();
        self.scanned = 0;
        Poll::Ready(Some(Err(e)))
    }

    fn too_long(&self) -> StagehandError {
        StagehandError::Decode(format!("stream line exceeds {} bytes", self.max_line))
    }
}

fn decode_line(raw: Vec<u8>) -> CoreResult<SseLine> {
    String::from_utf8(raw)
        .map(|line| SseLine { line })
        .map_err(|e| StagehandError::Decode(format!("stream line is not valid UTF-8: {e}")))
}

impl Stream for LineStream {
    type Item = CoreResult<SseLine>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if self.done && self.buf.is_empty() {
                return Poll::Ready(None);
            }
            let from = self.scanned;
            match self.buf[from..].iter().position(|b| *b == b'\n') {
                Some(pos) if from + pos > self.max_line => {
                    let e = self.too_long();
                    return self.fail(e);
                }
                Some(pos) => {
                    return match self.take_line(from + pos) {
                        Ok(line) => Poll::Ready(Some(Ok(line))),
                        Err(e) => self.fail(e),
                    };
                }
                None => self.scanned = self.buf.len(),
            }
            if self.buf.len() > self.max_line {
                let e = self.too_long();
                return self.fail(e);
            }
            if self.done {
                // trailing line without a newline
                let mut rest = std::mem::take(&mut self.buf);
                self.scanned = 0;
                if rest.last() == Some(&b'\r') {
                    rest.pop();
                }
                return match decode_line(rest) {
                    Ok(line) => Poll::Ready(Some(Ok(line))),
                    Err(e) => self.fail(e),
                };
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.buf.extend_from_slice(&chunk);
                    continue;
                }
                Poll::Ready(Some(Err(e))) => return self.fail(e),
                Poll::Ready(None) => {
                    self.done = true;
                    continue;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
