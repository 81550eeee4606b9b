//! Path and method pattern matching for RESTful rules.

use dashmap::DashMap;
use regex::Regex;
use tracing::warn;

/// Match a request path against a rule pattern, segment by segment.
///
/// `*`, `:name` and `{name}` each match exactly one non-empty segment; every
/// other segment must be equal. Segment counts must agree, so `/users/*`
/// matches `/users/123` but neither `/users` nor `/users/123/orders`. A query
/// string on `path` is ignored.
pub fn path_matches(pattern: &str, path: &str) -> bool {
    let path = path.split_once('?').map_or(path, |(p, _)| p);
    let mut pattern_segments = segments(pattern);
    let mut path_segments = segments(path);
    loop {
        match (pattern_segments.next(), path_segments.next()) {
            (None, None) => return true,
            (Some(p), Some(s)) => {
                let ok = if is_placeholder(p) {
                    !s.is_empty()
                } else {
                    p == s
                };
                if !ok {
                    return false;
                }
            }
            _ => return false,
        }
    }
}

fn segments(s: &str) -> std::str::Split<'_, char> {
    s.strip_prefix('/').unwrap_or(s).split('/')
}

fn is_placeholder(segment: &str) -> bool {
    segment == "*"
        || (segment.len() > 1 && segment.starts_with(':'))
        || (segment.len() > 2 && segment.starts_with('{') && segment.ends_with('}'))
}

/// Compile a method pattern into an anchored, case-insensitive regex.
pub fn compile_method_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("(?i)^(?:{})$", pattern.trim()))
}

/// Method pattern matcher with a compiled-regex cache.
#[derive(Debug, Default)]
pub struct MethodMatcher {
    cache: DashMap<String, Option<Regex>>,
}

impl MethodMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// `*` matches any method. Patterns that fail to compile match nothing.
    pub fn matches(&self, pattern: &str, method: &str) -> bool {
        if pattern.trim() == "*" {
            return true;
        }
        let compiled = match self.cache.get(pattern) {
            Some(entry) => entry.value().clone(),
            None => {
                let compiled = match compile_method_pattern(pattern) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!(pattern, error = %e, "ignoring rule with invalid method pattern");
                        None
                    }
                };
                self.cache.insert(pattern.to_string(), compiled.clone());
                compiled
            }
        };
        compiled.is_some_and(|re| re.is_match(method))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_exactly_one_segment() {
        assert!(path_matches("/users/*", "/users/123"));
        assert!(!path_matches("/users/*", "/users/123/orders"));
        assert!(!path_matches("/users/*", "/users"));
        assert!(!path_matches("/users/*", "/users/"));
    }

    #[test]
    fn named_placeholders() {
        assert!(path_matches("/users/:id/orders", "/users/7/orders"));
        assert!(path_matches("/users/{id}/orders/{order}", "/users/7/orders/9"));
        assert!(!path_matches("/users/:id/orders", "/users/7/invoices"));
    }

    #[test]
    fn literal_paths_and_query_strings() {
        assert!(path_matches("/reports", "/reports"));
        assert!(path_matches("/reports", "/reports?page=2"));
        assert!(!path_matches("/reports", "/report"));
        assert!(path_matches("/", "/"));
    }

    #[test]
    fn method_patterns() {
        let m = MethodMatcher::new();
        assert!(m.matches("*", "DELETE"));
        assert!(m.matches("GET", "get"));
        assert!(m.matches("GET|POST", "POST"));
        assert!(!m.matches("GET|POST", "PUT"));
        // Anchored: "GET" must not match "GETX".
        assert!(!m.matches("GET", "GETX"));
        assert!(!m.matches("(", "GET"));
    }
}
