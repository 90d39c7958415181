//! The [`siteforge_exchange::ExchangeTransport`] implementation over a real
//! HTTP/2 stream, plus the conversions between `h2`/`http` types and the
//! exchange crate's protocol-agnostic [`siteforge_exchange::Request`] and
//! [`siteforge_exchange::Headers`].

use std::sync::Arc;

use bytes::Bytes;
use h2::server::SendResponse;
use h2::SendStream;
use http::{HeaderMap, HeaderName, HeaderValue, Response as HttpResponse, StatusCode};
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex as AsyncMutex;

use siteforge_exchange::{BoxFuture, ErrorKind, ExchangeError, ExchangeTransport, Headers, Response, ResponseBody, StreamCloseReason};

const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// The lifecycle of an h2 stream's response half: before headers are sent
/// we hold the [`SendResponse`] handle; after, the [`SendStream`] it
/// produced. Writes past a close attempt are rejected.
enum State {
    AwaitingResponse(SendResponse<Bytes>),
    Streaming(SendStream<Bytes>),
    Closed,
}

/// An [`ExchangeTransport`] backed by one HTTP/2 stream.
pub struct H2Transport {
    state: Arc<AsyncMutex<State>>,
}

impl H2Transport {
    /// Wraps the `SendResponse` half of a freshly-accepted h2 stream.
    pub fn new(respond: SendResponse<Bytes>) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(AsyncMutex::new(State::AwaitingResponse(respond))),
        })
    }
}

fn internal_error(err: impl std::fmt::Display) -> ExchangeError {
    ExchangeError::new(ErrorKind::InternalServerError, err.to_string())
}

fn headers_to_http_map(headers: &Headers) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers.iter() {
        if name.starts_with(':') {
            continue;
        }
        let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) else {
            tracing::warn!(name, value, "dropping header that does not round-trip through http::HeaderMap");
            continue;
        };
        map.append(name, value);
    }
    map
}

fn build_http_response(status: u16, headers: &Headers) -> Result<HttpResponse<()>, ExchangeError> {
    let status = StatusCode::from_u16(status).map_err(internal_error)?;
    let mut builder = HttpResponse::builder().status(status);
    *builder.headers_mut().expect("builder not yet finished") = headers_to_http_map(headers);
    builder.body(()).map_err(internal_error)
}

impl ExchangeTransport for H2Transport {
    fn deliver(&self, response: Response) -> BoxFuture<'static, Result<(), ExchangeError>> {
        let state = self.state.clone();
        Box::pin(async move {
            let (status, headers, body) = response.into_parts();
            let http_response = build_http_response(status, &headers)?;
            let end_of_stream = matches!(body, ResponseBody::None);

            let mut guard = state.lock().await;
            let State::AwaitingResponse(respond) = &mut *guard else {
                return Err(internal_error("deliver() called after headers were already sent"));
            };
            let mut send_stream = respond.send_response(http_response, end_of_stream).map_err(internal_error)?;
            drop(guard);

            match body {
                ResponseBody::None => {}
                ResponseBody::Bytes(bytes) => {
                    send_stream.send_data(bytes, true).map_err(internal_error)?;
                }
                ResponseBody::Stream(mut stream) => {
                    use futures::StreamExt;
                    while let Some(chunk) = stream.next().await {
                        send_stream.send_data(chunk.map_err(internal_error)?, false).map_err(internal_error)?;
                    }
                    send_stream.send_data(Bytes::new(), true).map_err(internal_error)?;
                }
                ResponseBody::File(path) => {
                    stream_file(&mut send_stream, &path).await?;
                }
            }

            *state.lock().await = State::Closed;
            Ok(())
        })
    }

    fn begin_streaming(&self, response: Response) -> BoxFuture<'static, Result<(), ExchangeError>> {
        let state = self.state.clone();
        Box::pin(async move {
            let (status, headers, _body) = response.into_parts();
            let http_response = build_http_response(status, &headers)?;

            let mut guard = state.lock().await;
            let State::AwaitingResponse(respond) = &mut *guard else {
                return Err(internal_error("begin_streaming() called after headers were already sent"));
            };
            let send_stream = respond.send_response(http_response, false).map_err(internal_error)?;
            *guard = State::Streaming(send_stream);
            Ok(())
        })
    }

    fn write_raw(&self, bytes: Bytes) -> BoxFuture<'static, Result<(), ExchangeError>> {
        let state = self.state.clone();
        Box::pin(async move {
            let mut guard = state.lock().await;
            match &mut *guard {
                State::Streaming(send_stream) => send_stream.send_data(bytes, false).map_err(internal_error),
                State::AwaitingResponse(_) => Err(internal_error("write_raw() called before headers were sent")),
                State::Closed => Err(internal_error("write_raw() called on a closed stream")),
            }
        })
    }

    fn close_stream(&self, reason: StreamCloseReason) -> BoxFuture<'static, Result<(), ExchangeError>> {
        let state = self.state.clone();
        Box::pin(async move {
            let mut guard = state.lock().await;
            if let State::Streaming(send_stream) = &mut *guard {
                match reason {
                    StreamCloseReason::EventSourceClosed => send_stream.send_reset(h2::Reason::STREAM_CLOSED),
                }
            }
            *guard = State::Closed;
            Ok(())
        })
    }
}

async fn stream_file(send_stream: &mut SendStream<Bytes>, path: &std::path::Path) -> Result<(), ExchangeError> {
    let mut file = tokio::fs::File::open(path).await.map_err(internal_error)?;
    let mut buffer = vec![0u8; STREAM_CHUNK_SIZE];
    loop {
        let read = file.read(&mut buffer).await.map_err(internal_error)?;
        if read == 0 {
            send_stream.send_data(Bytes::new(), true).map_err(internal_error)?;
            return Ok(());
        }
        send_stream
            .send_data(Bytes::copy_from_slice(&buffer[..read]), false)
            .map_err(internal_error)?;
    }
}

/// Converts an inbound h2 request (pseudo-headers plus regular ones) and its
/// fully-buffered body into an exchange [`siteforge_exchange::Request`].
pub fn exchange_request_from_parts(parts: &http::request::Parts, body: Option<Bytes>) -> siteforge_exchange::Request {
    let mut headers = Headers::new();
    headers.insert(":method", parts.method.as_str());
    headers.insert(":path", parts.uri.path_and_query().map_or("/", |pq| pq.as_str()));
    headers.insert(":scheme", parts.uri.scheme_str().unwrap_or("https"));
    if let Some(authority) = parts.uri.authority() {
        headers.insert(":authority", authority.as_str());
    }
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str(), value);
        }
    }
    siteforge_exchange::Request::new(headers, body)
}

/// Reads a full h2 request body into a single buffer, releasing flow-control
/// capacity as chunks arrive.
pub async fn buffer_request_body(mut body: h2::RecvStream) -> Result<Option<Bytes>, h2::Error> {
    let mut collected = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk?;
        let _ = body.flow_control().release_capacity(chunk.len());
        collected.extend_from_slice(&chunk);
    }
    if collected.is_empty() {
        Ok(None)
    } else {
        Ok(Some(Bytes::from(collected)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_to_http_map_skips_pseudo_headers() {
        let mut headers = Headers::new();
        headers.insert(":path", "/a");
        headers.insert("content-type", "text/plain");
        let map = headers_to_http_map(&headers);
        assert!(!map.contains_key(":path"));
        assert_eq!(map.get("content-type").unwrap(), "text/plain");
    }
}
