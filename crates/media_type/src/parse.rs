//! Media-type grammar: `type "/" subtype *( ";" OWS name "=" value )`.

use std::collections::BTreeMap;

use crate::MediaType;

const HTTP_WHITESPACE: [char; 4] = ['\t', '\n', '\r', ' '];

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '!' | '#'
                | '$'
                | '%'
                | '&'
                | '\''
                | '*'
                | '+'
                | '-'
                | '.'
                | '^'
                | '_'
                | '`'
                | '|'
                | '~'
        )
}

fn trim_http_whitespace(s: &str) -> &str {
    s.trim_matches(|c| HTTP_WHITESPACE.contains(&c))
}

fn take_token(s: &str) -> (&str, &str) {
    let end = s.find(|c: char| !is_token_char(c)).unwrap_or(s.len());
    (&s[..end], &s[end..])
}

pub(crate) fn parse_one(input: &str, position: usize) -> Option<MediaType> {
    let trimmed = trim_http_whitespace(input);

    let (type_, rest) = take_token(trimmed);
    if type_.is_empty() {
        return None;
    }
    let rest = rest.strip_prefix('/')?;

    let (subtype, mut rest) = take_token(rest);
    if subtype.is_empty() {
        return None;
    }

    let type_ = type_.to_ascii_lowercase();
    let subtype = subtype.to_ascii_lowercase();
    if type_ == "*" && subtype != "*" {
        return None;
    }

    let mut parameters = BTreeMap::new();
    let mut q = MediaType::Q_SCALE;
    let mut q_seen = false;

    while let Some(after_semi) = rest.strip_prefix(';') {
        rest = after_semi.trim_start_matches(|c: char| HTTP_WHITESPACE.contains(&c));

        let (name, after_name) = take_token(rest);
        if name.is_empty() {
            // Malformed parameter: skip to the next `;` (or end) rather than erroring.
            rest = skip_to_next_param(after_name);
            continue;
        }
        let Some(after_eq) = after_name.strip_prefix('=') else {
            rest = skip_to_next_param(after_name);
            continue;
        };

        let (value, remainder) = if after_eq.starts_with('"') {
            parse_quoted_string(after_eq)
        } else {
            let (token_value, remainder) = take_token(after_eq);
            (token_value.to_string(), remainder)
        };
        rest = remainder;

        let name_lower = name.to_ascii_lowercase();
        if name_lower == "q" {
            if !q_seen {
                if let Some(parsed) = parse_quality(&value) {
                    q = parsed;
                    q_seen = true;
                }
            }
            continue;
        }

        parameters.entry(name_lower).or_insert(value);
    }

    Some(MediaType {
        type_,
        subtype,
        parameters,
        q,
        position,
    })
}

/// Parses a quoted-string parameter value starting at the opening `"`.
/// Accepts backslash escapes and tolerates an unterminated string by taking
/// everything through the end of input as the value.
fn parse_quoted_string(s: &str) -> (String, &str) {
    let mut chars = s.char_indices().skip(1);
    let mut value = String::new();
    let mut end = s.len();

    while let Some((idx, c)) = chars.next() {
        match c {
            '\\' => {
                if let Some((_, escaped)) = chars.next() {
                    value.push(escaped);
                } else {
                    end = s.len();
                    break;
                }
            }
            '"' => {
                end = idx + 1;
                break;
            }
            other => value.push(other),
        }
    }

    (value, &s[end.min(s.len())..])
}

fn skip_to_next_param(s: &str) -> &str {
    s.find(';').map_or("", |idx| &s[idx..])
}

/// Validates `q` against `0(\.\d{0,3})?|1(\.0{0,3})?` and returns the value
/// scaled to thousandths. Malformed weights are reported as `None`, leaving
/// the caller's already-set default of `1000` untouched.
fn parse_quality(raw: &str) -> Option<u16> {
    let raw = raw.trim();
    if let Some(fraction) = raw.strip_prefix("0.") {
        if fraction.len() > 3 || fraction.is_empty() || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let mut padded = fraction.to_string();
        while padded.len() < 3 {
            padded.push('0');
        }
        return padded.parse::<u16>().ok();
    }
    if raw == "0" {
        return Some(0);
    }
    if raw == "1" {
        return Some(1000);
    }
    if let Some(fraction) = raw.strip_prefix("1.") {
        if !fraction.is_empty() && fraction.bytes().all(|b| b == b'0') && fraction.len() <= 3 {
            return Some(1000);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_parameter_values_unescape() {
        let mt = parse_one(r#"text/plain; name="a\"b""#, 0).unwrap();
        assert_eq!(mt.parameters().get("name").unwrap(), "a\"b");
    }

    #[test]
    fn first_occurrence_of_a_parameter_wins() {
        let mt = parse_one("text/plain; charset=UTF-8; charset=ascii", 0).unwrap();
        assert_eq!(mt.parameters().get("charset").unwrap(), "UTF-8");
    }

    #[test]
    fn malformed_parameter_is_skipped_not_an_error() {
        let mt = parse_one("text/plain; ;;; charset=UTF-8", 0).unwrap();
        assert_eq!(mt.parameters().get("charset").unwrap(), "UTF-8");
    }

    #[test]
    fn unterminated_quoted_string_takes_remainder() {
        let mt = parse_one(r#"text/plain; name="unterminated"#, 0).unwrap();
        assert_eq!(mt.parameters().get("name").unwrap(), "unterminated");
    }

    #[test]
    fn rejects_bare_wildcard_type_with_concrete_subtype() {
        assert!(parse_one("*/html", 0).is_none());
    }

    #[test]
    fn quality_parsing_accepts_up_to_three_fractional_digits() {
        assert_eq!(parse_quality("0.5"), Some(500));
        assert_eq!(parse_quality("0.001"), Some(1));
        assert_eq!(parse_quality("1.000"), Some(1000));
        assert_eq!(parse_quality("0.5000"), None);
        assert_eq!(parse_quality("2"), None);
    }
}
