//! Session-level errors: a whole HTTP/2 connection failing, as opposed to a
//! single stream's exchange failing (which `fail()` turns into a response
//! and never surfaces here). A session error destroys that session only;
//! it is logged and never reaches another session.

/// Where in a session's lifetime the failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionErrorStage {
    /// The h2 handshake (settings exchange) failed.
    Handshake,
    /// The connection-level accept loop returned an error.
    Connection,
}

#[derive(Debug)]
pub struct SessionError {
    stage: SessionErrorStage,
    source: h2::Error,
}

impl SessionError {
    pub fn new(stage: SessionErrorStage, source: h2::Error) -> Self {
        Self { stage, source }
    }

    pub fn stage(&self) -> SessionErrorStage {
        self.stage
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl core::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} failed: {}", self.stage, self.source)
    }
}
