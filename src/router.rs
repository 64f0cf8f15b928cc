//! Endpoint routing by method and path pattern.
//!
//! Patterns are split on `/`. A segment is a literal, a named parameter
//! (`:id` or `{id}`), or a trailing catch-all (`*` or `*rest`). Endpoints
//! are tried in declaration order and the first hit wins.

use crate::config::Endpoint;
use std::collections::HashMap;

/// A matched endpoint and the path parameters captured for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    /// Index into the configured endpoint list
    pub index: usize,
    pub params: HashMap<String, String>,
}

/// Compiled path patterns, one per endpoint in declaration order.
#[derive(Debug, Clone)]
pub struct Router {
    patterns: Vec<PathPattern>,
}

/// Compiled path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    CatchAll(Option<String>),
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Self {
        let parts: Vec<&str> = split_path(pattern).collect();
        let last = parts.len().saturating_sub(1);

        let segments = parts
            .iter()
            .enumerate()
            .map(|(i, part)| {
                if let Some(name) = part.strip_prefix(':') {
                    Segment::Param(name.to_string())
                } else if let Some(name) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}'))
                {
                    Segment::Param(name.to_string())
                } else if i == last && part.starts_with('*') {
                    let name = &part[1..];
                    Segment::CatchAll((!name.is_empty()).then(|| name.to_string()))
                } else {
                    Segment::Literal(part.to_string())
                }
            })
            .collect();

        Self { segments }
    }

    /// Match a request path, returning the captured parameters.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = split_path(path).collect();
        let mut params = HashMap::new();

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::CatchAll(name) => {
                    if let Some(name) = name {
                        let rest = parts.get(i..).unwrap_or_default().join("/");
                        params.insert(name.clone(), rest);
                    }
                    return Some(params);
                }
                Segment::Literal(lit) => {
                    if parts.get(i) != Some(&lit.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = parts.get(i)?;
                    params.insert(name.clone(), (*value).to_string());
                }
            }
        }

        // Must consume entire path
        if parts.len() == self.segments.len() {
            Some(params)
        } else {
            None
        }
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

impl Router {
    pub fn new(endpoints: &[Endpoint]) -> Self {
        let patterns = endpoints.iter().map(|e| PathPattern::parse(&e.path)).collect();
        Self { patterns }
    }

    /// First endpoint accepting `method` whose pattern matches `path`.
    ///
    /// `endpoints` must be the slice the router was built from.
    pub fn find(&self, endpoints: &[Endpoint], method: &str, path: &str) -> Option<RouteMatch> {
        // Query strings never take part in routing
        let path = path.split('?').next().unwrap_or(path);

        endpoints
            .iter()
            .zip(&self.patterns)
            .enumerate()
            .find_map(|(index, (endpoint, pattern))| {
                if !endpoint.accepts_method(method) {
                    return None;
                }
                pattern.matches(path).map(|params| RouteMatch { index, params })
            })
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
