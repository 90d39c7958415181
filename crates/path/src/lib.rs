//! Request-path sanitization: turns a raw HTTP/2 `:path` pseudo-header into
//! a normalized, traversal-free path and query pair.

mod decode;

use thiserror::Error;

/// A sanitized request path produced by [`parse_request_path`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequestPath {
    path: String,
    query: String,
    trailing_slash: bool,
}

impl ParsedRequestPath {
    /// The normalized, decoded path. Always absolute, never contains a `.`
    /// or `..` segment, and never contains a literal `%`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The query string including its leading `?`, or empty if none was
    /// present.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Whether the raw input path ended in `/`. Kept separate from `path`
    /// so callers can decide on redirect behavior without re-deriving it.
    pub fn had_trailing_slash(&self) -> bool {
        self.trailing_slash
    }
}

/// All validation failures are reported as `BadRequest`: a malformed path
/// has no recoverable structure worth distinguishing further.
#[derive(Debug, Error)]
pub enum PathError {
    /// The raw path was empty, relative, attempted traversal above the
    /// root, encoded a `/` inside a segment, or contained a dotfile
    /// segment outside the `/.well-known` exception.
    #[error("bad request path: {0}")]
    BadRequest(String),
}

impl From<decode::DecodeError> for PathError {
    fn from(err: decode::DecodeError) -> Self {
        PathError::BadRequest(err.to_string())
    }
}

/// Sanitizes a raw `:path` value into a [`ParsedRequestPath`].
///
/// Steps: drop the fragment; split off the query; reject paths that are
/// empty, non-absolute, or contain an encoded slash; percent-decode; split
/// into segments, dropping empty and `.` segments and resolving `..` by
/// popping; reject any remaining dotfile segment other than a lone leading
/// `.well-known`; rejoin with a `/` prefix, tracking the original trailing
/// slash separately.
pub fn parse_request_path(raw: &str) -> Result<ParsedRequestPath, PathError> {
    let without_fragment = raw.split('#').next().unwrap_or("");

    let (raw_path, query) = match without_fragment.find('?') {
        Some(idx) => (&without_fragment[..idx], without_fragment[idx..].to_string()),
        None => (without_fragment, String::new()),
    };

    if raw_path.is_empty() || !raw_path.starts_with('/') {
        return Err(PathError::BadRequest("path is empty or not absolute".into()));
    }
    if raw_path.to_ascii_lowercase().contains("%2f") {
        return Err(PathError::BadRequest("encoded slash in path segment".into()));
    }

    let decoded = decode::percent_decode(raw_path)?;
    let trailing_slash = decoded.len() > 1 && decoded.ends_with('/');

    let mut stack: Vec<String> = Vec::new();
    let mut position = 0usize;

    for segment in decoded.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        if segment == ".." {
            stack.pop();
            position += 1;
            continue;
        }
        if segment.starts_with('.') {
            if position == 0 && segment == ".well-known" {
                stack.push(segment.to_string());
                position += 1;
                continue;
            }
            return Err(PathError::BadRequest(format!(
                "dotfile segment '{segment}' is not allowed"
            )));
        }
        stack.push(segment.to_string());
        position += 1;
    }

    let mut path = format!("/{}", stack.join("/"));
    if trailing_slash && !path.ends_with('/') {
        path.push('/');
    }

    Ok(ParsedRequestPath {
        path,
        query,
        trailing_slash,
    })
}
