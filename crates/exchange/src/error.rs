//! The error taxonomy a core-aware caller must distinguish.

use thiserror::Error;

/// Classifies why a request could not be served normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed request path, malformed Accept header, or malformed date.
    BadRequest,
    /// Stat returned not-found after cool-URL fallback exhausted.
    NotFound,
    /// Event-source preconditions: method not GET/HEAD.
    MethodNotAllowed,
    /// Event-source preconditions: Accept does not admit `text/event-stream`.
    NotAcceptable,
    /// A handler threw, or an unexpected file-system error occurred.
    InternalServerError,
    /// The server is shutting down but still accepted a connection.
    ServiceUnavailable,
}

impl ErrorKind {
    /// The HTTP status code conventionally associated with this kind.
    pub fn status(self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::MethodNotAllowed => 405,
            ErrorKind::NotAcceptable => 406,
            ErrorKind::InternalServerError => 500,
            ErrorKind::ServiceUnavailable => 503,
        }
    }
}

/// An error surfaced while processing an [`crate::Exchange`].
#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct ExchangeError {
    kind: ErrorKind,
    message: String,
}

impl ExchangeError {
    /// Builds an error of the given kind with a human-readable message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The error's taxonomy kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<siteforge_path::PathError> for ExchangeError {
    fn from(err: siteforge_path::PathError) -> Self {
        ExchangeError::new(ErrorKind::BadRequest, err.to_string())
    }
}
