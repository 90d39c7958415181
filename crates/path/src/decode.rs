//! Percent-decoding for request paths.

use thiserror::Error;

/// Percent-decoding failed: an incomplete or non-hexadecimal escape.
#[derive(Debug, Error)]
#[error("invalid percent-encoding in request path")]
pub struct DecodeError;

/// Decodes `%XX` escapes in `input`. Fails if a `%` is not followed by two
/// hex digits.
pub(crate) fn percent_decode(input: &str) -> Result<String, DecodeError> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = bytes.get(i + 1..i + 3).ok_or(DecodeError)?;
                let value = std::str::from_utf8(hex)
                    .ok()
                    .and_then(|s| u8::from_str_radix(s, 16).ok())
                    .ok_or(DecodeError)?;
                out.push(value);
                i += 3;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }

    String::from_utf8(out).map_err(|_| DecodeError)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_escapes() {
        assert_eq!(percent_decode("%2e%2e").unwrap(), "..");
    }

    #[test]
    fn rejects_incomplete_escape() {
        assert!(percent_decode("%2").is_err());
    }

    #[test]
    fn rejects_non_hex_escape() {
        assert!(percent_decode("%zz").is_err());
    }

    #[test]
    fn passes_through_plain_text() {
        assert_eq!(percent_decode("/a/b.html").unwrap(), "/a/b.html");
    }
}
