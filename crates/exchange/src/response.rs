//! The outbound half of an [`crate::Exchange`].

use std::path::PathBuf;

use bytes::Bytes;
use futures::stream::BoxStream;

use crate::headers::Headers;
use crate::macros::field_method_as_mut;

/// The shape of a response body. Setting one via [`crate::Exchange::prepare`]
/// derives `content-length`/`content-type` unless already present.
pub enum ResponseBody {
    /// No body at all (e.g. `304 Not Modified`).
    None,
    /// A fully-buffered byte payload.
    Bytes(Bytes),
    /// A lazily-produced byte stream; no `content-length` is derivable.
    Stream(BoxStream<'static, std::io::Result<Bytes>>),
    /// A reference to a file on disk, resolved by `respond()`'s cool-URL
    /// logic rather than read eagerly.
    File(PathBuf),
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseBody::None => write!(f, "ResponseBody::None"),
            ResponseBody::Bytes(bytes) => write!(f, "ResponseBody::Bytes({} bytes)", bytes.len()),
            ResponseBody::Stream(_) => write!(f, "ResponseBody::Stream(..)"),
            ResponseBody::File(path) => write!(f, "ResponseBody::File({})", path.display()),
        }
    }
}

/// An outbound HTTP/2 response under construction.
#[derive(Debug)]
pub struct Response {
    status: u16,
    headers: Headers,
    body: ResponseBody,
}

impl Response {
    /// A `200 OK` with no body and no headers, the starting point for every
    /// Exchange.
    pub fn new() -> Self {
        Self {
            status: 200,
            headers: Headers::new(),
            body: ResponseBody::None,
        }
    }

    field_method_as_mut!(headers_mut, headers, Headers);

    /// The response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Sets the status code.
    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    /// The response body.
    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    /// Replaces the response body, leaving header derivation to the caller
    /// (see [`crate::Exchange::prepare`] for the policy that normally drives
    /// this).
    pub fn set_body(&mut self, body: ResponseBody) {
        self.body = body;
    }

    /// Consumes the response, handing back its parts. Transports use this
    /// to move the body onto the wire without cloning it.
    pub fn into_parts(self) -> (u16, Headers, ResponseBody) {
        (self.status, self.headers, self.body)
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}
