//! Route pattern matching: exact, prefix-tree, and wildcard.

/// How a route's pattern is matched against a normalized request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Exact equality after trailing-slash stripping.
    Path,
    /// Prefix match at a segment boundary (pattern ended in `/*`).
    Tree,
    /// Matches every path.
    All,
}

/// A registered route: how to match a path, and what pattern to match it
/// against (ignored for [`MatchKind::All`]).
#[derive(Debug, Clone)]
pub struct RoutePattern {
    kind: MatchKind,
    prefix: String,
}

fn strip_trailing_slash(path: &str) -> &str {
    if path.len() > 1 {
        path.strip_suffix('/').unwrap_or(path)
    } else {
        path
    }
}

impl RoutePattern {
    /// Parses a route registration pattern: `*` or an empty string becomes
    /// [`MatchKind::All`]; a pattern ending in `/*` becomes
    /// [`MatchKind::Tree`] over the preceding prefix; anything else is an
    /// exact [`MatchKind::Path`] match after normalization.
    pub fn parse(pattern: &str) -> Self {
        if pattern.is_empty() || pattern == "*" {
            return Self {
                kind: MatchKind::All,
                prefix: String::new(),
            };
        }
        if let Some(prefix) = pattern.strip_suffix("/*") {
            return Self {
                kind: MatchKind::Tree,
                prefix: strip_trailing_slash(prefix).to_string(),
            };
        }
        Self {
            kind: MatchKind::Path,
            prefix: strip_trailing_slash(pattern).to_string(),
        }
    }

    /// The match discipline this pattern uses.
    pub fn kind(&self) -> MatchKind {
        self.kind
    }

    /// Whether `path` (already normalized) satisfies this pattern.
    pub fn matches(&self, path: &str) -> bool {
        let path = strip_trailing_slash(path);
        match self.kind {
            MatchKind::All => true,
            MatchKind::Path => path == self.prefix,
            MatchKind::Tree => {
                path == self.prefix
                    || path
                        .strip_prefix(&self.prefix)
                        .is_some_and(|rest| rest.starts_with('/'))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_ignores_trailing_slash() {
        let route = RoutePattern::parse("/answer");
        assert!(route.matches("/answer"));
        assert!(route.matches("/answer/"));
        assert!(!route.matches("/answer/more"));
    }

    #[test]
    fn tree_match_requires_segment_boundary() {
        let route = RoutePattern::parse("/static/*");
        assert!(route.matches("/static"));
        assert!(route.matches("/static/app.js"));
        assert!(route.matches("/static/nested/app.js"));
        assert!(!route.matches("/staticfoo"));
    }

    #[test]
    fn wildcard_matches_everything() {
        let route = RoutePattern::parse("*");
        assert!(route.matches("/anything"));
        assert_eq!(route.kind(), MatchKind::All);
    }
}
