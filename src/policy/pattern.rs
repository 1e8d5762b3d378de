//! Resource path normalization and pattern matching.
//!
//! | Pattern | Semantics |
//! |---------|-----------|
//! | `"*"`, `"/*"` | matches every path |
//! | `"/api/items/*"` | prefix match on `"/api/items/"` |
//! | `"/api/items"` | exact match |
//!
//! Patterns without a leading slash get one (`"api/items"` → `"/api/items"`).

use std::fmt;

/// A compiled resource pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    /// Matches every resource path.
    Any,
    /// Matches paths starting with the stored prefix.
    Prefix(String),
    /// Matches exactly the stored path.
    Exact(String),
}

impl PathPattern {
    /// Compile a raw pattern string. Blank input yields `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed == "*" || trimmed == "/*" {
            return Some(Self::Any);
        }

        let rooted = if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        };

        Some(match rooted.strip_suffix('*') {
            Some(prefix) => Self::Prefix(prefix.to_string()),
            None => Self::Exact(rooted),
        })
    }

    /// Whether this pattern grants `path` (already normalized).
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Prefix(prefix) => path.starts_with(prefix.as_str()),
            Self::Exact(exact) => path == exact,
        }
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Prefix(prefix) => write!(f, "{prefix}*"),
            Self::Exact(exact) => f.write_str(exact),
        }
    }
}

/// Normalize a relative resource path: exactly one leading slash, duplicate
/// slashes collapsed. The empty path becomes `"/"`.
#[must_use]
pub fn normalize_path(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 1);
    out.push('/');
    for segment in raw.split('/').filter(|s| !s.is_empty()) {
        if !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(segment);
    }
    if raw.len() > 1 && raw.ends_with('/') && !out.ends_with('/') {
        out.push('/');
    }
    out
}

/// Whether `path` has a `.` or `..` segment. Such paths resolve elsewhere
/// downstream and are never evaluated.
#[must_use]
pub fn has_dot_segment(path: &str) -> bool {
    path.split(['/', '\\']).any(|segment| segment == "." || segment == "..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_and_slash_star_are_wildcards() {
        assert_eq!(PathPattern::parse("*"), Some(PathPattern::Any));
        assert_eq!(PathPattern::parse("/*"), Some(PathPattern::Any));
        assert_eq!(PathPattern::parse(" * "), Some(PathPattern::Any));
    }

    #[test]
    fn blank_pattern_is_unusable() {
        assert_eq!(PathPattern::parse(""), None);
        assert_eq!(PathPattern::parse("   "), None);
    }

    #[test]
    fn missing_leading_slash_is_added() {
        assert_eq!(
            PathPattern::parse("api/items"),
            Some(PathPattern::Exact("/api/items".into()))
        );
        assert_eq!(
            PathPattern::parse("api/items/*"),
            Some(PathPattern::Prefix("/api/items/".into()))
        );
    }

    #[test]
    fn wildcard_matches_everything() {
        let p = PathPattern::Any;
        assert!(p.matches("/"));
        assert!(p.matches("/api/anything/at/all"));
    }

    #[test]
    fn prefix_pattern_matches_descendants_only() {
        // GIVEN: "/api/customers/*"
        let p = PathPattern::parse("/api/customers/*").unwrap();
        // THEN: children match, siblings do not
        assert!(p.matches("/api/customers/5"));
        assert!(p.matches("/api/customers/5/orders"));
        assert!(!p.matches("/api/other"));
        assert!(!p.matches("/api/customers"));
    }

    #[test]
    fn exact_pattern_requires_equality() {
        let p = PathPattern::parse("/api/items").unwrap();
        assert!(p.matches("/api/items"));
        assert!(!p.matches("/api/items/1"));
        assert!(!p.matches("/api/item"));
    }

    #[test]
    fn display_round_trips_pattern_text() {
        assert_eq!(PathPattern::parse("/a/*").unwrap().to_string(), "/a/*");
        assert_eq!(PathPattern::Any.to_string(), "*");
    }

    #[test]
    fn normalize_adds_leading_slash_and_collapses() {
        assert_eq!(normalize_path("api/items/42"), "/api/items/42");
        assert_eq!(normalize_path("//api///items//42"), "/api/items/42");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/"), "/");
    }

    #[test]
    fn normalize_keeps_single_trailing_slash() {
        assert_eq!(normalize_path("/api/items//"), "/api/items/");
    }

    #[test]
    fn dot_segments_are_detected() {
        assert!(has_dot_segment("/api/items/../admin"));
        assert!(has_dot_segment("/api/./items"));
        assert!(has_dot_segment("/api/items/.."));
        assert!(has_dot_segment("/api/items/..\\admin"));
        assert!(!has_dot_segment("/api/items/..42"));
        assert!(!has_dot_segment("/api/.well-known/x"));
        assert!(!has_dot_segment("/"));
    }
}
