//! The inbound half of an [`crate::Exchange`].

use bytes::Bytes;

use crate::headers::Headers;
use crate::macros::field_method;

/// A single HTTP/2 request: pseudo- and regular headers plus an optional
/// fully-buffered body.
#[derive(Debug, Clone)]
pub struct Request {
    headers: Headers,
    body: Option<Bytes>,
}

impl Request {
    /// Builds a request from its headers and an optional body.
    pub fn new(headers: Headers, body: Option<Bytes>) -> Self {
        Self { headers, body }
    }

    field_method!(headers, headers, Headers);

    /// The request body, if one was sent.
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// The request method, read from the `:method` pseudo-header.
    pub fn method(&self) -> &str {
        self.headers.method().unwrap_or("GET")
    }

    /// The raw, not-yet-sanitized request path from the `:path`
    /// pseudo-header.
    pub fn raw_path(&self) -> &str {
        self.headers.path().unwrap_or("/")
    }
}
