//! The per-request state machine: [`Exchange`], its [`Stage`]s, the
//! middleware [`Handler`] chain, and the transport boundary that hands a
//! hardened [`Response`] off to the underlying HTTP/2 stream.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use chrono::{DateTime, Utc};

use siteforge_executor::{Signal, SignalWait};
use siteforge_media_type::{match_for_quality, parse_accept, MediaType};
use siteforge_path::ParsedRequestPath;

use crate::error::{ErrorKind, ExchangeError};
use crate::mime_map;
use crate::request::Request;
use crate::response::{Response, ResponseBody};

/// A future boxed for storage in a trait object or closure return position.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Lifecycle stage of an [`Exchange`]. Transitions only move forward:
/// `Ready` → `Responding` → `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Awaiting handler dispatch; body/headers may still be mutated.
    Ready,
    /// `respond`/`redirect`/`fail` has been called; headers are either
    /// already sent or about to be.
    Responding,
    /// The underlying stream has completed.
    Done,
}

/// Why an event-source (or other long-lived) stream is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCloseReason {
    /// The event source is shutting down: the transport sends an explicit
    /// `RST_STREAM` with the `STREAM_CLOSED` error code rather than a plain
    /// end-of-stream, so well-behaved clients recognize the server, not the
    /// peer, ended the exchange.
    EventSourceClosed,
}

/// The boundary between an [`Exchange`] and the real HTTP/2 stream it is
/// bound to. The exchange crate is protocol-agnostic; a server implements
/// this trait over its actual stream type.
pub trait ExchangeTransport: Send + Sync {
    /// Sends a complete, hardened response (headers and, unless the body
    /// is a file reference, its fully-resolved body) to the stream.
    fn deliver(&self, response: Response) -> BoxFuture<'static, Result<(), ExchangeError>>;

    /// Sends only `response`'s status and headers, leaving the stream open
    /// for subsequent [`ExchangeTransport::write_raw`] calls. `response`'s
    /// body is ignored. Used by long-lived responses (the event source).
    fn begin_streaming(&self, response: Response) -> BoxFuture<'static, Result<(), ExchangeError>>;

    /// Writes a raw chunk directly to the stream, bypassing response
    /// framing. Used by long-lived responses (notably the event source)
    /// after the initial headers have been sent.
    fn write_raw(&self, bytes: Bytes) -> BoxFuture<'static, Result<(), ExchangeError>>;

    /// Requests the underlying stream be closed.
    fn close_stream(&self, reason: StreamCloseReason) -> BoxFuture<'static, Result<(), ExchangeError>>;
}

/// A value handed to [`Exchange::prepare`], from which body and header
/// derivation follow the rules in the type's documentation.
pub enum PreparedValue {
    /// Clears any existing body, `content-length`, and `content-type`.
    Nil,
    /// A byte buffer; defaults to `application/octet-stream`.
    Bytes(Bytes),
    /// A text string; `text/html` if it opens with `<!DOCTYPE html>`
    /// (case-insensitive), otherwise `text/plain`.
    Text(String),
    /// A lazily-produced byte stream; no `content-length` is derived.
    Stream(futures::stream::BoxStream<'static, std::io::Result<Bytes>>),
    /// Serialized as JSON with `application/json; charset=UTF-8`.
    Json(serde_json::Value),
}

/// A middleware handler: `(exchange, next) -> completion`.
pub type Handler =
    Arc<dyn Fn(Arc<Exchange>, Next) -> BoxFuture<'static, Result<(), ExchangeError>> + Send + Sync>;

/// The `next` callback passed to a [`Handler`], advancing the chain by one
/// position. Calling it more than once from the same handler invocation is
/// reported as an [`ErrorKind::InternalServerError`].
#[derive(Clone)]
pub struct Next {
    chain: Arc<[Handler]>,
    index: usize,
    called: Arc<AtomicBool>,
}

impl Next {
    fn head(chain: Arc<[Handler]>) -> Self {
        Self {
            chain,
            index: 0,
            called: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Advances to the next handler in the chain, or completes the chain
    /// successfully if this was the last one.
    pub async fn call(&self, exchange: Arc<Exchange>) -> Result<(), ExchangeError> {
        if self.called.swap(true, Ordering::SeqCst) {
            return Err(ExchangeError::new(
                ErrorKind::InternalServerError,
                "next() invoked more than once by the same handler",
            ));
        }
        match self.chain.get(self.index) {
            Some(handler) => {
                let downstream = Next {
                    chain: self.chain.clone(),
                    index: self.index + 1,
                    called: Arc::new(AtomicBool::new(false)),
                };
                handler(exchange, downstream).await
            }
            None => Ok(()),
        }
    }
}

struct Inner {
    stage: Stage,
    response: Response,
}

enum ResolvedFile {
    Found {
        path: PathBuf,
        len: u64,
        modified: DateTime<Utc>,
    },
    NotModified,
    PreconditionFailed,
}

/// A single request/response interaction bound to one HTTP/2 stream.
///
/// Constructing an `Exchange` eagerly sanitizes the request path; a
/// malformed path pre-arms a `BadRequest` status on the response but the
/// exchange remains fully dispatchable — handlers may still run and decide
/// what to do about it.
pub struct Exchange {
    origin: String,
    production: bool,
    request: Request,
    parsed_path: Result<ParsedRequestPath, ExchangeError>,
    transport: Arc<dyn ExchangeTransport>,
    inner: Mutex<Inner>,
    did_respond: Signal,
}

impl Exchange {
    /// Builds a new exchange bound to `transport` for the given `request`.
    /// `origin` is the scheme+authority used to build absolute redirect
    /// targets and CORS-for-fonts headers.
    pub fn new(
        origin: impl Into<String>,
        request: Request,
        transport: Arc<dyn ExchangeTransport>,
        production: bool,
    ) -> Arc<Self> {
        let parsed_path = siteforge_path::parse_request_path(request.raw_path()).map_err(ExchangeError::from);

        let mut response = Response::new();
        if let Err(err) = &parsed_path {
            response.set_status(err.kind().status());
        }

        Arc::new(Self {
            origin: origin.into(),
            production,
            request,
            parsed_path,
            transport,
            inner: Mutex::new(Inner {
                stage: Stage::Ready,
                response,
            }),
            did_respond: Signal::new(),
        })
    }

    /// The inbound request.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The sanitized request path, or the validation error that pre-armed
    /// this exchange's response status.
    pub fn parsed_path(&self) -> Result<&ParsedRequestPath, &ExchangeError> {
        self.parsed_path.as_ref()
    }

    /// The scheme+authority this exchange was constructed with.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// The current lifecycle stage.
    pub fn stage(&self) -> Stage {
        self.inner.lock().expect("exchange mutex poisoned").stage
    }

    /// Resolves once this exchange reaches [`Stage::Done`].
    pub fn on_responded(&self) -> SignalWait {
        self.did_respond.waiter()
    }

    /// Mutates the in-progress response headers before `respond`/`redirect`/
    /// `fail` sends them. A no-op past the `Ready` stage's header-setting
    /// window is the caller's responsibility to avoid; this type does not
    /// re-check the stage on every header write.
    pub fn with_response_headers(&self, f: impl FnOnce(&mut crate::headers::Headers)) {
        let mut inner = self.inner.lock().expect("exchange mutex poisoned");
        f(inner.response.headers_mut());
    }

    /// Runs `handlers` left to right. After the chain completes — whether
    /// by reaching its end or because a handler never called `next` — the
    /// engine calls [`Exchange::respond`] if nothing else has already
    /// advanced the stage. A handler error is turned into a [`Exchange::fail`]
    /// response.
    pub async fn handle_with(self: &Arc<Self>, handlers: Vec<Handler>) {
        let chain: Arc<[Handler]> = handlers.into();
        let next = Next::head(chain);

        if let Err(err) = next.call(self.clone()).await {
            self.fail(Some(err.kind().status()), Some(anyhow::anyhow!(err.to_string())))
                .await;
        }

        if self.stage() == Stage::Ready {
            self.respond().await;
        }
    }

    /// Sets the response body, deriving `content-type` and `content-length`
    /// per [`PreparedValue`]'s rules unless those headers are already set.
    ///
    /// # Panics
    /// Panics if called outside [`Stage::Ready`] — setting a body after
    /// headers are in flight is a programmer error, not a recoverable one.
    pub fn prepare(&self, value: PreparedValue) {
        let mut inner = self.inner.lock().expect("exchange mutex poisoned");
        assert_eq!(
            inner.stage,
            Stage::Ready,
            "prepare() called outside the Ready stage"
        );

        match value {
            PreparedValue::Nil => {
                inner.response.set_body(ResponseBody::None);
                inner.response.headers_mut().remove("content-length");
                inner.response.headers_mut().remove("content-type");
            }
            PreparedValue::Bytes(bytes) => {
                let len = bytes.len();
                inner
                    .response
                    .headers_mut()
                    .insert_if_absent("content-type", "application/octet-stream");
                inner.response.headers_mut().insert_if_absent("content-length", len.to_string());
                inner.response.set_body(ResponseBody::Bytes(bytes));
            }
            PreparedValue::Text(text) => {
                let content_type = if starts_with_doctype_html(&text) {
                    "text/html; charset=UTF-8"
                } else {
                    "text/plain; charset=UTF-8"
                };
                let len = text.len();
                inner.response.headers_mut().insert_if_absent("content-type", content_type);
                inner.response.headers_mut().insert_if_absent("content-length", len.to_string());
                inner.response.set_body(ResponseBody::Bytes(Bytes::from(text)));
            }
            PreparedValue::Stream(stream) => {
                inner
                    .response
                    .headers_mut()
                    .insert_if_absent("content-type", "application/octet-stream");
                inner.response.headers_mut().remove("content-length");
                inner.response.set_body(ResponseBody::Stream(stream));
            }
            PreparedValue::Json(value) => {
                let bytes = serde_json::to_vec(&value).expect("serde_json::Value always serializes");
                inner
                    .response
                    .headers_mut()
                    .insert_if_absent("content-type", "application/json; charset=UTF-8");
                inner
                    .response
                    .headers_mut()
                    .insert_if_absent("content-length", bytes.len().to_string());
                inner.response.set_body(ResponseBody::Bytes(Bytes::from(bytes)));
            }
        }
    }

    /// Convenience wrapper over [`PreparedValue::Json`] for any
    /// [`serde::Serialize`] value.
    ///
    /// # Panics
    /// Panics if serialization fails or if called outside [`Stage::Ready`]
    /// (see [`Exchange::prepare`]).
    pub fn prepare_json<T: serde::Serialize>(&self, value: &T) {
        let json = serde_json::to_value(value).expect("value must serialize to JSON");
        self.prepare(PreparedValue::Json(json));
    }

    /// Marks a file on disk as the response body; `respond()` performs
    /// cool-URL resolution against it.
    ///
    /// # Panics
    /// Panics if called outside [`Stage::Ready`].
    pub fn prepare_file(&self, path: impl Into<PathBuf>) {
        let mut inner = self.inner.lock().expect("exchange mutex poisoned");
        assert_eq!(
            inner.stage,
            Stage::Ready,
            "prepare_file() called outside the Ready stage"
        );
        inner.response.set_body(ResponseBody::File(path.into()));
    }

    /// Redirects the client. `status` must fall in `[300, 399]` and
    /// defaults to `301`. Idempotent after the first `respond`/`redirect`/
    /// `fail` call.
    pub async fn redirect(self: &Arc<Self>, location: &str, status: Option<u16>) {
        if !self.begin_responding() {
            return;
        }

        let status = status.unwrap_or(301);
        assert!(
            (300..=399).contains(&status),
            "redirect status must be in [300, 399], got {status}"
        );

        let target = self.resolve_redirect_target(location);
        let display = target.to_string();

        let mut response = Response::new();
        response.set_status(status);
        response.headers_mut().insert("location", display.clone());
        let body = format!(
            "<!DOCTYPE html><html><head><title>Redirecting</title></head><body>Redirecting to <a href=\"{href}\">{text}</a>.</body></html>",
            href = escape_html(&display),
            text = escape_html(&display),
        );
        response.headers_mut().insert("content-type", "text/html; charset=UTF-8");
        response.headers_mut().insert("content-length", body.len().to_string());
        response.set_body(ResponseBody::Bytes(Bytes::from(body)));

        self.finish(response).await;
    }

    /// Responds with a failure. Absent `status` defaults to `500`; never
    /// supply both a non-default status and expect the default to also
    /// apply — the two are mutually exclusive.
    ///
    /// In non-production mode, when the client's `accept` header permits
    /// HTML, the body is an HTML error page with a request-header table and
    /// the error's display text; otherwise it is a plain-text
    /// `"<status> <reason>"`.
    pub async fn fail(self: &Arc<Self>, status: Option<u16>, error: Option<anyhow::Error>) {
        if !self.begin_responding() {
            return;
        }

        let status = status.unwrap_or(500);
        let reason = reason_phrase(status);

        let (content_type, body) = if !self.production && self.accept_admits_html() {
            (
                "text/html; charset=UTF-8",
                render_html_error_page(status, reason, &self.request, error.as_ref()),
            )
        } else {
            ("text/plain; charset=UTF-8", format!("{status} {reason}"))
        };

        let mut response = Response::new();
        response.set_status(status);
        response.headers_mut().insert("content-type", content_type);
        response.headers_mut().insert("content-length", body.len().to_string());
        response.set_body(ResponseBody::Bytes(Bytes::from(body)));

        self.finish(response).await;
    }

    /// Sends the currently-prepared response, performing cool-URL file
    /// resolution and conditional-GET handling if the body is a file
    /// reference.
    pub async fn respond(self: &Arc<Self>) {
        if !self.begin_responding() {
            return;
        }

        let mut response = {
            let mut inner = self.inner.lock().expect("exchange mutex poisoned");
            std::mem::replace(&mut inner.response, Response::new())
        };

        if let ResponseBody::File(path) = response.body() {
            let path = path.clone();
            match self.resolve_cool_url(&path).await {
                Ok(ResolvedFile::NotModified) => {
                    response.set_status(304);
                    response.set_body(ResponseBody::None);
                    response.headers_mut().remove("content-length");
                    response.headers_mut().remove("content-type");
                }
                Ok(ResolvedFile::PreconditionFailed) => {
                    response.set_status(412);
                    response.set_body(ResponseBody::None);
                    response.headers_mut().remove("content-length");
                    response.headers_mut().remove("content-type");
                }
                Ok(ResolvedFile::Found { path, len, modified }) => {
                    response.headers_mut().insert("content-length", len.to_string());
                    response
                        .headers_mut()
                        .insert_if_absent("content-type", mime_map::media_type_for_path(&path));
                    response.headers_mut().insert("last-modified", crate::date::format_http_date(modified));
                    response.set_body(ResponseBody::File(path));
                }
                Err(err) => {
                    self.finish_failure(err, None).await;
                    return;
                }
            }
        }

        self.finish(response).await;
    }

    /// Begins a long-lived response (the event-source path): transitions
    /// `Ready` → `Responding`, sends `response`'s hardened status and
    /// headers without ending the stream, and hands back the transport so
    /// the caller can [`ExchangeTransport::write_raw`] directly. Returns
    /// `None` if the exchange was already past `Ready` or if sending the
    /// headers failed (in which case the exchange is marked `Done`).
    pub async fn begin_streaming(self: &Arc<Self>, mut response: Response) -> Option<Arc<dyn ExchangeTransport>> {
        if !self.begin_responding() {
            return None;
        }
        apply_hardening(&mut response, &self.origin);
        match self.transport.begin_streaming(response).await {
            Ok(()) => Some(self.transport.clone()),
            Err(err) => {
                tracing::warn!(error = %err, "failed beginning streaming response");
                self.mark_done();
                None
            }
        }
    }

    /// Marks a long-lived response as finished, transitioning to
    /// [`Stage::Done`] and fulfilling [`Exchange::on_responded`]. A no-op if
    /// already `Done`.
    pub fn mark_done(&self) {
        let mut inner = self.inner.lock().expect("exchange mutex poisoned");
        if inner.stage != Stage::Done {
            inner.stage = Stage::Done;
            drop(inner);
            self.did_respond.fulfill();
        }
    }

    fn begin_responding(&self) -> bool {
        let mut inner = self.inner.lock().expect("exchange mutex poisoned");
        if inner.stage == Stage::Ready {
            inner.stage = Stage::Responding;
            true
        } else {
            false
        }
    }

    async fn finish(self: &Arc<Self>, mut response: Response) {
        apply_hardening(&mut response, &self.origin);
        if let Err(err) = self.transport.deliver(response).await {
            tracing::warn!(error = %err, "failed delivering exchange response");
        }
        self.mark_done();
    }

    async fn finish_failure(self: &Arc<Self>, err: ExchangeError, cause: Option<anyhow::Error>) {
        let status = err.kind().status();
        let reason = reason_phrase(status);
        let fallback_cause = anyhow::anyhow!(err.to_string());
        let (content_type, body) = if !self.production && self.accept_admits_html() {
            (
                "text/html; charset=UTF-8",
                render_html_error_page(status, reason, &self.request, Some(cause.as_ref().unwrap_or(&fallback_cause))),
            )
        } else {
            ("text/plain; charset=UTF-8", format!("{status} {reason}"))
        };
        let mut response = Response::new();
        response.set_status(status);
        response.headers_mut().insert("content-type", content_type);
        response.headers_mut().insert("content-length", body.len().to_string());
        response.set_body(ResponseBody::Bytes(Bytes::from(body)));
        self.finish(response).await;
    }

    fn accept_admits_html(&self) -> bool {
        match self.request.headers().get("accept") {
            None => true,
            Some(raw) => {
                let target = MediaType::parse_one("text/html").expect("literal media type always parses");
                let ranges = parse_accept(raw);
                match_for_quality(&target, &ranges) > 0.0
            }
        }
    }

    fn resolve_redirect_target(&self, location: &str) -> url::Url {
        if let Ok(base) = url::Url::parse(&self.origin) {
            if let Ok(joined) = base.join(location) {
                return joined;
            }
        }
        url::Url::parse(location).unwrap_or_else(|_| {
            url::Url::parse(&format!("{}{}", self.origin.trim_end_matches('/'), location))
                .expect("redirect location must resolve against the configured origin")
        })
    }

    async fn resolve_cool_url(&self, original: &Path) -> Result<ResolvedFile, ExchangeError> {
        match tokio::fs::metadata(original).await {
            Ok(meta) if meta.is_dir() => self.stat_candidate(&original.join("index.html")).await,
            Ok(meta) => Ok(self.finish_stat(original.to_path_buf(), &meta)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                self.stat_candidate(&append_extension(original, "html")).await
            }
            Err(_) => Err(ExchangeError::new(
                ErrorKind::InternalServerError,
                "failed to stat static file",
            )),
        }
    }

    async fn stat_candidate(&self, candidate: &Path) -> Result<ResolvedFile, ExchangeError> {
        match tokio::fs::metadata(candidate).await {
            Ok(meta) if meta.is_dir() => {
                Err(ExchangeError::new(ErrorKind::NotFound, "cool-url fallback resolved to a directory"))
            }
            Ok(meta) => Ok(self.finish_stat(candidate.to_path_buf(), &meta)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(ExchangeError::new(ErrorKind::NotFound, "no file matches the requested path"))
            }
            Err(_) => Err(ExchangeError::new(
                ErrorKind::InternalServerError,
                "failed to stat static file",
            )),
        }
    }

    fn finish_stat(&self, path: PathBuf, meta: &std::fs::Metadata) -> ResolvedFile {
        let modified = meta.modified().ok().map(DateTime::<Utc>::from);
        if let Some(modified) = modified {
            let not_modified = self
                .request
                .headers()
                .get("if-modified-since")
                .and_then(crate::date::parse_http_date)
                .is_some_and(|validator| modified <= validator);
            if not_modified {
                return ResolvedFile::NotModified;
            }

            let precondition_failed = self
                .request
                .headers()
                .get("if-unmodified-since")
                .and_then(crate::date::parse_http_date)
                .is_some_and(|validator| modified > validator);
            if precondition_failed {
                return ResolvedFile::PreconditionFailed;
            }
        }
        ResolvedFile::Found {
            path,
            len: meta.len(),
            modified: modified.unwrap_or_else(Utc::now),
        }
    }
}

fn append_extension(path: &Path, extension: &str) -> PathBuf {
    let mut owned = path.as_os_str().to_owned();
    owned.push(".");
    owned.push(extension);
    PathBuf::from(owned)
}

fn starts_with_doctype_html(text: &str) -> bool {
    const LITERAL: &str = "<!DOCTYPE html>";
    text.get(..LITERAL.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(LITERAL))
}

fn reason_phrase(status: u16) -> &'static str {
    http::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or("Unknown Status")
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn render_html_error_page(status: u16, reason: &str, request: &Request, error: Option<&anyhow::Error>) -> String {
    let mut rows = String::new();
    for (name, value) in request.headers().iter() {
        rows.push_str("<tr><td>");
        rows.push_str(&escape_html(name));
        rows.push_str("</td><td>");
        rows.push_str(&escape_html(value));
        rows.push_str("</td></tr>");
    }
    let trace = match error {
        Some(err) => format!("Error: {err}"),
        None => format!("Error: {reason}"),
    };
    format!(
        "<!DOCTYPE html><html><head><title>{status} {reason}</title></head><body><h1>{status} {reason}</h1><table>{rows}</table><pre>{trace}</pre></body></html>",
        status = status,
        reason = escape_html(reason),
        rows = rows,
        trace = escape_html(&trace),
    )
}

const HSTS_MAX_AGE_SECONDS: u64 = 60 * 60 * 24 * 365 * 2;

fn apply_hardening(response: &mut Response, origin: &str) {
    response
        .headers_mut()
        .insert_if_absent("strict-transport-security", format!("max-age={HSTS_MAX_AGE_SECONDS}"));
    response.headers_mut().insert_if_absent("x-content-type-options", "nosniff");
    response
        .headers_mut()
        .insert_if_absent("x-permitted-cross-domain-policies", "none");

    let content_type = response.headers().get("content-type").map(str::to_string);
    if let Some(content_type) = content_type {
        if content_type.starts_with("text/html") {
            response
                .headers_mut()
                .insert_if_absent("referrer-policy", "origin-when-cross-origin");
            response.headers_mut().insert_if_absent("x-frame-options", "DENY");
            response
                .headers_mut()
                .insert_if_absent("x-xss-protection", "1; mode=block");
        }
        if content_type.starts_with("font/") {
            response
                .headers_mut()
                .insert_if_absent("access-control-allow-origin", origin);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::Headers;
    use std::sync::Mutex as StdMutex;

    struct RecordingTransport {
        delivered: StdMutex<Vec<Response>>,
    }

    impl RecordingTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                delivered: StdMutex::new(Vec::new()),
            })
        }
    }

    impl ExchangeTransport for RecordingTransport {
        fn deliver(&self, response: Response) -> BoxFuture<'static, Result<(), ExchangeError>> {
            self.delivered.lock().unwrap().push(response);
            Box::pin(async { Ok(()) })
        }

        fn begin_streaming(&self, response: Response) -> BoxFuture<'static, Result<(), ExchangeError>> {
            self.delivered.lock().unwrap().push(response);
            Box::pin(async { Ok(()) })
        }

        fn write_raw(&self, _bytes: Bytes) -> BoxFuture<'static, Result<(), ExchangeError>> {
            Box::pin(async { Ok(()) })
        }

        fn close_stream(&self, _reason: StreamCloseReason) -> BoxFuture<'static, Result<(), ExchangeError>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn request_with_path(path: &str) -> Request {
        let mut headers = Headers::new();
        headers.insert(":method", "GET");
        headers.insert(":path", path);
        Request::new(headers, None)
    }

    struct FailingTransport;

    impl ExchangeTransport for FailingTransport {
        fn deliver(&self, _response: Response) -> BoxFuture<'static, Result<(), ExchangeError>> {
            Box::pin(async { Err(ExchangeError::new(ErrorKind::InternalServerError, "write failed")) })
        }

        fn begin_streaming(&self, _response: Response) -> BoxFuture<'static, Result<(), ExchangeError>> {
            Box::pin(async { Ok(()) })
        }

        fn write_raw(&self, _bytes: Bytes) -> BoxFuture<'static, Result<(), ExchangeError>> {
            Box::pin(async { Ok(()) })
        }

        fn close_stream(&self, _reason: StreamCloseReason) -> BoxFuture<'static, Result<(), ExchangeError>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn finish_logs_a_warning_when_delivery_fails() {
        let exchange = Exchange::new("https://example.test", request_with_path("/"), Arc::new(FailingTransport), true);
        exchange.respond().await;
        assert!(logs_contain("failed delivering exchange response"));
        assert_eq!(exchange.stage(), Stage::Done);
    }

    #[tokio::test]
    async fn prepare_json_derives_content_type_and_length() {
        let transport = RecordingTransport::new();
        let exchange = Exchange::new("https://example.test", request_with_path("/answer"), transport.clone(), true);

        exchange.prepare_json(&serde_json::json!({"answer": 42}));
        exchange.respond().await;

        let delivered = transport.delivered.lock().unwrap();
        let response = &delivered[0];
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers().get("content-type"), Some("application/json; charset=UTF-8"));
        assert_eq!(response.headers().get("content-length"), Some("13"));
    }

    #[tokio::test]
    async fn redirect_builds_absolute_location_with_security_headers() {
        let transport = RecordingTransport::new();
        let exchange = Exchange::new("https://example.test", request_with_path("/some/page/"), transport.clone(), true);

        exchange.redirect("/some/page", None).await;

        let delivered = transport.delivered.lock().unwrap();
        let response = &delivered[0];
        assert_eq!(response.status(), 301);
        assert_eq!(response.headers().get("location"), Some("https://example.test/some/page"));
        assert!(response.headers().contains("strict-transport-security"));
    }

    #[tokio::test]
    async fn respond_redirect_fail_are_idempotent() {
        let transport = RecordingTransport::new();
        let exchange = Exchange::new("https://example.test", request_with_path("/"), transport.clone(), true);

        exchange.respond().await;
        exchange.redirect("/elsewhere", None).await;
        exchange.fail(Some(418), None).await;

        assert_eq!(transport.delivered.lock().unwrap().len(), 1);
        assert_eq!(exchange.stage(), Stage::Done);
    }

    #[tokio::test]
    async fn fail_renders_html_with_header_table_outside_production() {
        let transport = RecordingTransport::new();
        let exchange = Exchange::new("https://example.test", request_with_path("/"), transport.clone(), false);

        exchange.fail(Some(418), Some(anyhow::anyhow!("boo!"))).await;

        let delivered = transport.delivered.lock().unwrap();
        let response = &delivered[0];
        assert_eq!(response.status(), 418);
        let ResponseBody::Bytes(body) = response.body() else {
            panic!("expected a buffered body");
        };
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("418 I'm a Teapot"));
        assert!(text.contains(":path"));
        assert!(text.contains("Error: boo!"));
    }

    #[tokio::test]
    async fn handle_with_detects_double_next_invocation() {
        let transport = RecordingTransport::new();
        let exchange = Exchange::new("https://example.test", request_with_path("/"), transport.clone(), true);

        let double_call: Handler = Arc::new(|exchange, next| {
            Box::pin(async move {
                next.call(exchange.clone()).await?;
                next.call(exchange).await
            })
        });

        exchange.handle_with(vec![double_call]).await;

        let delivered = transport.delivered.lock().unwrap();
        assert_eq!(delivered[0].status(), 500);
    }

    fn request_with_path_and_header(path: &str, name: &str, value: &str) -> Request {
        let mut headers = Headers::new();
        headers.insert(":method", "GET");
        headers.insert(":path", path);
        headers.insert(name, value);
        Request::new(headers, None)
    }

    #[tokio::test]
    async fn cool_url_falls_back_to_dot_html() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("page.html"), b"hi").unwrap();

        let transport = RecordingTransport::new();
        let exchange = Exchange::new("https://example.test", request_with_path("/page"), transport.clone(), true);
        exchange.prepare_file(dir.path().join("page"));
        exchange.respond().await;

        let delivered = transport.delivered.lock().unwrap();
        let response = &delivered[0];
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers().get("content-length"), Some("2"));
    }

    #[tokio::test]
    async fn cool_url_falls_back_to_directory_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("section")).unwrap();
        std::fs::write(dir.path().join("section/index.html"), b"index").unwrap();

        let transport = RecordingTransport::new();
        let exchange = Exchange::new("https://example.test", request_with_path("/section"), transport.clone(), true);
        exchange.prepare_file(dir.path().join("section"));
        exchange.respond().await;

        let delivered = transport.delivered.lock().unwrap();
        assert_eq!(delivered[0].status(), 200);
        assert_eq!(delivered[0].headers().get("content-length"), Some("5"));
    }

    #[tokio::test]
    async fn missing_file_yields_not_found() {
        let dir = tempfile::tempdir().unwrap();

        let transport = RecordingTransport::new();
        let exchange = Exchange::new("https://example.test", request_with_path("/missing"), transport.clone(), true);
        exchange.prepare_file(dir.path().join("missing"));
        exchange.respond().await;

        let delivered = transport.delivered.lock().unwrap();
        assert_eq!(delivered[0].status(), 404);
    }

    #[tokio::test]
    async fn if_modified_since_in_the_future_short_circuits_304() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("page.html");
        std::fs::write(&file, b"hi").unwrap();

        let far_future = "Mon, 01 Jan 2999 00:00:00 GMT";
        let transport = RecordingTransport::new();
        let exchange = Exchange::new(
            "https://example.test",
            request_with_path_and_header("/page.html", "if-modified-since", far_future),
            transport.clone(),
            true,
        );
        exchange.prepare_file(file);
        exchange.respond().await;

        let delivered = transport.delivered.lock().unwrap();
        assert_eq!(delivered[0].status(), 304);
        assert!(matches!(delivered[0].body(), ResponseBody::None));
    }

    #[tokio::test]
    async fn if_unmodified_since_in_the_past_yields_412() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("page.html");
        std::fs::write(&file, b"hi").unwrap();

        let long_ago = "Mon, 01 Jan 2001 00:00:00 GMT";
        let transport = RecordingTransport::new();
        let exchange = Exchange::new(
            "https://example.test",
            request_with_path_and_header("/page.html", "if-unmodified-since", long_ago),
            transport.clone(),
            true,
        );
        exchange.prepare_file(file);
        exchange.respond().await;

        let delivered = transport.delivered.lock().unwrap();
        assert_eq!(delivered[0].status(), 412);
    }
}
