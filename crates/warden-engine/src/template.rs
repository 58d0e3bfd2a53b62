use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};

// ---------------------------------------------------------------------------
// UriTemplate — literal path matching with greedy variable capture
//
// A template is literal text interleaved with `{variable}` placeholders,
// e.g. `/site/{site_id}/asset/{asset_id}`. A variable captures a
// non-empty sub-path eagerly: it swallows as much of the URI as it can
// while still leaving the following literal chunk to match.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Variable(String),
}

#[derive(Debug, Clone)]
pub struct UriTemplate {
    source: String,
    parts: Vec<Part>,
    /// Parts of the canonicalized template text, used by the matcher's
    /// canonicalization-insensitive comparison.
    canonical_parts: Vec<Part>,
}

impl UriTemplate {
    pub fn parse(source: &str) -> EngineResult<Self> {
        let parts = parse_parts(source)?;
        let canonical_parts = parse_parts(&canonicalize(source))?;
        Ok(Self {
            source: source.to_string(),
            parts,
            canonical_parts,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Strict match: segments compare exactly, including empty segments
    /// and trailing slashes. `/asset` does not match `/asset/`.
    pub fn matches(&self, uri: &str) -> bool {
        match_parts(&self.parts, uri).is_some()
    }

    /// Canonicalizing match: both template and URI have `.`/`..` and
    /// empty segments resolved and a trailing slash appended before the
    /// comparison, so `/asset`, `/asset/`, and `/asset//` all match an
    /// `/asset` template.
    pub fn canonical_matches(&self, uri: &str) -> bool {
        match_parts(&self.canonical_parts, &canonicalize(uri)).is_some()
    }

    /// Extract the named variable from a URI, canonicalizing first.
    /// Returns `None` when the URI does not match or the template has
    /// no such variable.
    pub fn extract(&self, name: &str, uri: &str) -> Option<String> {
        let vars = match_parts(&self.canonical_parts, &canonicalize(uri))?;
        vars.get(name).cloned()
    }

    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|p| match p {
            Part::Variable(name) => Some(name.as_str()),
            Part::Literal(_) => None,
        })
    }
}

/// Resolve `.` and `..` segments, drop empty segments, and append a
/// trailing slash: `/a/b/../c//` becomes `/a/c/`.
pub fn canonicalize(uri: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in uri.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    let mut out = String::from("/");
    for segment in segments {
        out.push_str(segment);
        out.push('/');
    }
    out
}

fn parse_parts(source: &str) -> EngineResult<Vec<Part>> {
    if source.is_empty() {
        return Err(EngineError::Template("template is empty".to_string()));
    }

    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut seen: Vec<&str> = Vec::new();
    let mut rest = source;

    while let Some(open) = rest.find('{') {
        let (before, after_open) = rest.split_at(open);
        literal.push_str(before);

        let close = after_open.find('}').ok_or_else(|| {
            EngineError::Template(format!("unclosed '{{' in template '{}'", source))
        })?;
        let name = &after_open[1..close];
        if name.is_empty() {
            return Err(EngineError::Template(format!(
                "empty variable name in template '{}'",
                source
            )));
        }
        if name.contains(['{', '/']) {
            return Err(EngineError::Template(format!(
                "invalid variable name '{}' in template '{}'",
                name, source
            )));
        }
        if seen.contains(&name) {
            return Err(EngineError::Template(format!(
                "duplicate variable '{}' in template '{}'",
                name, source
            )));
        }

        if literal.is_empty() && matches!(parts.last(), Some(Part::Variable(_))) {
            return Err(EngineError::Template(format!(
                "adjacent variables in template '{}'",
                source
            )));
        }
        if !literal.is_empty() {
            parts.push(Part::Literal(std::mem::take(&mut literal)));
        }
        parts.push(Part::Variable(name.to_string()));
        seen.push(name);
        rest = &after_open[close + 1..];
    }

    if rest.contains('}') {
        return Err(EngineError::Template(format!(
            "'}}' without '{{' in template '{}'",
            source
        )));
    }
    literal.push_str(rest);
    if !literal.is_empty() {
        parts.push(Part::Literal(literal));
    }
    Ok(parts)
}

/// Match a part sequence against a URI, returning captured variables.
/// Variables capture eagerly: up to the last occurrence of the next
/// literal chunk, or the entire remainder when the variable is final.
/// Captures must be non-empty.
fn match_parts(parts: &[Part], uri: &str) -> Option<HashMap<String, String>> {
    let mut vars = HashMap::new();
    let mut rest = uri;
    let mut iter = parts.iter().peekable();

    while let Some(part) = iter.next() {
        match part {
            Part::Literal(lit) => {
                rest = rest.strip_prefix(lit.as_str())?;
            }
            Part::Variable(name) => match iter.peek() {
                None => {
                    if rest.is_empty() {
                        return None;
                    }
                    vars.insert(name.clone(), rest.to_string());
                    rest = "";
                }
                Some(Part::Literal(next)) => {
                    let pos = rest.rfind(next.as_str())?;
                    if pos == 0 {
                        return None;
                    }
                    vars.insert(name.clone(), rest[..pos].to_string());
                    rest = &rest[pos..];
                }
                // Adjacent variables are rejected at parse time.
                Some(Part::Variable(_)) => return None,
            },
        }
    }

    if rest.is_empty() {
        Some(vars)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(source: &str) -> UriTemplate {
        UriTemplate::parse(source).unwrap()
    }

    // -- strict (raw) matching ------------------------------------------------

    #[test]
    fn test_literal_exact_match() {
        let t = template("/asset");
        assert!(t.matches("/asset"));
        assert!(!t.matches("/asset/"));
        assert!(!t.matches("/other"));
    }

    #[test]
    fn test_strict_match_rejects_double_slash() {
        let t = template("/asset");
        assert!(!t.matches("/asset//"));
    }

    #[test]
    fn test_strict_match_rejects_dot_segments() {
        let t = template("/a/c");
        assert!(!t.matches("/a/b/../c"));
    }

    #[test]
    fn test_variable_captures_single_segment() {
        let t = template("/site/{site_id}");
        assert!(t.matches("/site/42"));
        assert!(!t.matches("/site/"));
        assert!(!t.matches("/site"));
    }

    #[test]
    fn test_variable_capture_is_eager() {
        // The variable swallows everything up to the *last* occurrence
        // of the next literal chunk.
        let t = template("/a/{x}/b");
        let vars = match_parts(&t.parts, "/a/1/b/2/b").unwrap();
        assert_eq!(vars["x"], "1/b/2");
    }

    #[test]
    fn test_trailing_variable_captures_subpath() {
        let t = template("/v1{path}");
        let vars = match_parts(&t.parts, "/v1/site/42").unwrap();
        assert_eq!(vars["path"], "/site/42");
    }

    #[test]
    fn test_two_variables() {
        let t = template("/site/{site_id}/asset/{asset_id}");
        let vars = match_parts(&t.parts, "/site/1/asset/2").unwrap();
        assert_eq!(vars["site_id"], "1");
        assert_eq!(vars["asset_id"], "2");
    }

    #[test]
    fn test_empty_capture_rejected() {
        let t = template("/site/{site_id}/asset");
        assert!(!t.matches("/site//asset"));
    }

    // -- canonicalizing matching ---------------------------------------------

    #[test]
    fn test_canonical_match_trailing_slash_insensitive() {
        assert!(template("/asset/").canonical_matches("/asset"));
        assert!(template("/asset").canonical_matches("/asset/"));
    }

    #[test]
    fn test_canonical_match_accepts_double_slash() {
        assert!(template("/asset").canonical_matches("/asset//"));
    }

    #[test]
    fn test_canonical_match_resolves_dot_segments() {
        let t = template("/a/c");
        assert!(t.canonical_matches("/a/b/../c"));
        assert!(t.canonical_matches("/a/./c"));
    }

    #[test]
    fn test_canonical_match_variable() {
        let t = template("/site/{site_id}");
        assert!(t.canonical_matches("/site/42/"));
        assert!(t.canonical_matches("/site/42"));
        assert!(!t.canonical_matches("/other/42"));
    }

    #[test]
    fn test_canonicalize() {
        assert_eq!(canonicalize("/asset"), "/asset/");
        assert_eq!(canonicalize("/asset/"), "/asset/");
        assert_eq!(canonicalize("/asset//"), "/asset/");
        assert_eq!(canonicalize("/a/b/../c"), "/a/c/");
        assert_eq!(canonicalize("/a/./b"), "/a/b/");
        assert_eq!(canonicalize("/"), "/");
        assert_eq!(canonicalize("/../a"), "/a/");
    }

    // -- extraction -----------------------------------------------------------

    #[test]
    fn test_extract_segment_variable() {
        let t = template("/site/{site_id}");
        assert_eq!(t.extract("site_id", "/site/42").as_deref(), Some("42"));
        assert_eq!(t.extract("site_id", "/site/42/").as_deref(), Some("42"));
        assert!(t.extract("site_id", "/other/42").is_none());
        assert!(t.extract("nope", "/site/42").is_none());
    }

    #[test]
    fn test_extract_subpath_variable() {
        let t = template("/v1{path}");
        assert_eq!(t.extract("path", "/v1/site/42").as_deref(), Some("/site/42"));
    }

    #[test]
    fn test_variable_names() {
        let t = template("/site/{site_id}/asset/{asset_id}");
        let names: Vec<_> = t.variable_names().collect();
        assert_eq!(names, vec!["site_id", "asset_id"]);
    }

    // -- parse errors ---------------------------------------------------------

    #[test]
    fn test_parse_rejects_empty_template() {
        assert!(UriTemplate::parse("").is_err());
    }

    #[test]
    fn test_parse_rejects_unclosed_brace() {
        assert!(UriTemplate::parse("/site/{site_id").is_err());
    }

    #[test]
    fn test_parse_rejects_empty_variable() {
        assert!(UriTemplate::parse("/site/{}").is_err());
    }

    #[test]
    fn test_parse_rejects_adjacent_variables() {
        assert!(UriTemplate::parse("/site/{a}{b}").is_err());
    }

    #[test]
    fn test_parse_rejects_duplicate_variable() {
        assert!(UriTemplate::parse("/{a}/x/{a}").is_err());
    }

    #[test]
    fn test_parse_rejects_stray_close_brace() {
        assert!(UriTemplate::parse("/site/a}").is_err());
    }
}
