//! Media-type parsing and Accept-header content negotiation.
//!
//! Implements the MIME-Sniffing-standard grammar for a single media type
//! ([`MediaType::parse_one`]) and RFC 7231 `Accept` header ranges
//! ([`parse_accept`]), plus the matching rules used to decide whether a
//! representation satisfies a requested range.

mod accept;
mod parse;

use std::collections::BTreeMap;
use std::fmt;

pub use accept::{match_for_quality, parse_accept};

/// An immutable, parsed media type such as `text/html; charset=UTF-8`.
///
/// `type_` and `subtype` are always lowercase tokens or the wildcard `*`.
/// Parameter names are lowercased; values preserve their original case.
/// `q` is the Accept-header weight expressed in thousandths (`1000` means a
/// weight of `1.0`, the default for a bare media type with no `q`
/// parameter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    type_: String,
    subtype: String,
    parameters: BTreeMap<String, String>,
    q: u16,
    /// Position of this entry within the Accept header it was parsed from,
    /// used only to break sorting ties. Zero for a type parsed in isolation.
    position: usize,
}

impl MediaType {
    /// Weight denominator: `q` values are stored as thousandths.
    pub const Q_SCALE: u16 = 1000;

    /// Parses a single media type, e.g. `"text/html; charset=UTF-8"`.
    ///
    /// Returns `None` on malformed input; the grammar never distinguishes
    /// classes of malformedness, matching the source algorithm's behaviour
    /// of returning `undefined`.
    pub fn parse_one(input: &str) -> Option<MediaType> {
        parse::parse_one(input, 0)
    }

    /// The primary type, e.g. `"text"` or `"*"`.
    pub fn type_(&self) -> &str {
        &self.type_
    }

    /// The subtype, e.g. `"html"` or `"*"`.
    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    /// Parameters keyed by lowercase name, with original-case values.
    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    /// The Accept weight as a float in `[0, 1]`.
    pub fn quality(&self) -> f64 {
        f64::from(self.q) / f64::from(Self::Q_SCALE)
    }

    /// The Accept weight in thousandths, exact and comparison-friendly.
    pub fn quality_thousandths(&self) -> u16 {
        self.q
    }

    /// True if either side is a bare `*/*`, `type/*`, or fully concrete type.
    fn is_wildcard_type(&self) -> bool {
        self.type_ == "*"
    }

    fn is_wildcard_subtype(&self) -> bool {
        self.subtype == "*"
    }

    /// Number of parameters, used as a specificity tiebreaker when sorting
    /// Accept ranges.
    fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    /// Lexicographically sorted, joined parameter names — a stable identity
    /// used as a sort tiebreaker ahead of original input position.
    fn parameter_identity(&self) -> String {
        self.parameters.keys().cloned().collect::<Vec<_>>().join(",")
    }

    /// Decides whether `self` (a candidate representation) satisfies the
    /// range described by `range` (typically parsed from an Accept header).
    ///
    /// A `*` on either side of `type`/`subtype` matches anything in the
    /// corresponding position on the other side. For two concrete (non-
    /// wildcard) types every parameter present on the more specific side
    /// must be present with an equal value on the other side; wildcards
    /// never require parameter agreement.
    pub fn matches(&self, range: &MediaType) -> bool {
        let type_ok = range.is_wildcard_type() || self.is_wildcard_type() || self.type_ == range.type_;
        if !type_ok {
            return false;
        }

        let subtype_ok =
            range.is_wildcard_subtype() || self.is_wildcard_subtype() || self.subtype == range.subtype;
        if !subtype_ok {
            return false;
        }

        if range.is_wildcard_type() || range.is_wildcard_subtype() || self.is_wildcard_type() || self.is_wildcard_subtype() {
            return true;
        }

        range
            .parameters
            .iter()
            .all(|(name, value)| self.parameters.get(name) == Some(value))
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.type_, self.subtype)?;
        for (name, value) in &self.parameters {
            write!(f, ";{name}={value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_bare_type() {
        let mt = MediaType::parse_one("text/html").unwrap();
        assert_eq!(mt.type_(), "text");
        assert_eq!(mt.subtype(), "html");
        assert_eq!(mt.quality_thousandths(), 1000);
    }

    #[test]
    fn wildcard_type_matches_anything() {
        let any = MediaType::parse_one("*/*").unwrap();
        let concrete = MediaType::parse_one("application/json").unwrap();
        assert!(concrete.matches(&any));
    }

    #[test]
    fn concrete_match_requires_shared_parameters() {
        let candidate = MediaType::parse_one("text/plain; charset=UTF-8").unwrap();
        let range = MediaType::parse_one("text/plain; charset=UTF-8").unwrap();
        assert!(candidate.matches(&range));

        let mismatched = MediaType::parse_one("text/plain; charset=ascii").unwrap();
        assert!(!candidate.matches(&mismatched));
    }
}
