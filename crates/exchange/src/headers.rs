//! Case-insensitive header storage that also carries HTTP/2 pseudo-headers
//! (`:method`, `:scheme`, `:authority`, `:path`) alongside regular ones.
//!
//! `http::HeaderMap` rejects names starting with `:`, so pseudo-headers are
//! kept in a plain string-keyed map instead; regular header names are
//! lowercased on insertion to give case-insensitive lookup.

use std::collections::BTreeMap;

/// A single-valued, case-insensitive header collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    values: BTreeMap<String, String>,
}

impl Headers {
    /// An empty header collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites a header. Names are lowercased; pseudo-header
    /// names (`:method` etc.) pass through lowercased but otherwise intact.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into().to_ascii_lowercase(), value.into());
    }

    /// Inserts a header only if it is not already present.
    pub fn insert_if_absent(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values
            .entry(name.into().to_ascii_lowercase())
            .or_insert_with(|| value.into());
    }

    /// Looks up a header by name, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// True if the header is present.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(&name.to_ascii_lowercase())
    }

    /// Removes a header, returning its prior value if present.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.values.remove(&name.to_ascii_lowercase())
    }

    /// Iterates headers in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The `:method` pseudo-header.
    pub fn method(&self) -> Option<&str> {
        self.get(":method")
    }

    /// The `:path` pseudo-header.
    pub fn path(&self) -> Option<&str> {
        self.get(":path")
    }

    /// The `:scheme` pseudo-header.
    pub fn scheme(&self) -> Option<&str> {
        self.get(":scheme")
    }

    /// The `:authority` pseudo-header.
    pub fn authority(&self) -> Option<&str> {
        self.get(":authority")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/plain");
        assert_eq!(headers.get("content-type"), Some("text/plain"));
    }

    #[test]
    fn pseudo_headers_round_trip() {
        let mut headers = Headers::new();
        headers.insert(":path", "/a/b");
        assert_eq!(headers.path(), Some("/a/b"));
    }

    #[test]
    fn insert_if_absent_does_not_override() {
        let mut headers = Headers::new();
        headers.insert("x-frame-options", "SAMEORIGIN");
        headers.insert_if_absent("x-frame-options", "DENY");
        assert_eq!(headers.get("x-frame-options"), Some("SAMEORIGIN"));
    }
}
