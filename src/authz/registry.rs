//! Route permission registry.
//!
//! An ordered list of [`RouteRule`]s assembled once at startup from the
//! per-feature route lists. Lookup walks the list and the first rule whose
//! method and path template match wins.

use std::fmt;

use axum::http::Method;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// Path template such as `/enquiry/:id/cancel`, matched segment by segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Self {
        let segments = split_path(pattern)
            .map(|seg| match seg.strip_prefix(':') {
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Literal(seg.to_string()),
            })
            .collect();

        Self {
            raw: pattern.to_string(),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, path: &str) -> bool {
        self.captures(path).is_some()
    }

    /// Named parameters bound by `path`, or `None` when it does not match.
    pub fn captures<'p>(&self, path: &'p str) -> Option<Vec<(&str, &'p str)>> {
        let parts: Vec<&str> = split_path(path).collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut bound = Vec::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(lit) if lit == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => bound.push((name.as_str(), part)),
            }
        }
        Some(bound)
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|seg| !seg.is_empty())
}

/// Permissions a caller needs to invoke a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequiredPermissions {
    /// `*`: any resolved identity is enough.
    Any,
    /// At least one of these codes must be granted.
    AnyOf(Vec<String>),
}

impl RequiredPermissions {
    pub fn any_of(codes: &[&str]) -> Self {
        Self::AnyOf(codes.iter().map(|c| c.to_string()).collect())
    }
}

impl fmt::Display for RequiredPermissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequiredPermissions::Any => f.write_str("*"),
            RequiredPermissions::AnyOf(codes) => f.write_str(&codes.join(",")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteRule {
    pub pattern: PathPattern,
    pub method: Method,
    pub permissions: RequiredPermissions,
    /// When false the route is mounted outside the authorization layer.
    pub authenticate: bool,
    /// When false identity is resolved but no permission check runs.
    pub authorize: bool,
    /// Secondary capability tag checked by the slug gate.
    pub slug: Option<String>,
}

impl RouteRule {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            pattern: PathPattern::parse(path),
            method,
            permissions: RequiredPermissions::Any,
            authenticate: true,
            authorize: true,
            slug: None,
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: &str) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: &str) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: &str) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: &str) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn permissions(mut self, codes: &[&str]) -> Self {
        self.permissions = RequiredPermissions::any_of(codes);
        self
    }

    pub fn any_permission(mut self) -> Self {
        self.permissions = RequiredPermissions::Any;
        self
    }

    pub fn public(mut self) -> Self {
        self.authenticate = false;
        self.authorize = false;
        self
    }

    pub fn skip_authorization(mut self) -> Self {
        self.authorize = false;
        self
    }

    pub fn slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    /// HEAD requests are served by GET routes, so they share GET rules.
    pub fn applies_to(&self, path: &str, method: &Method) -> bool {
        let method_ok = self.method == *method || (*method == Method::HEAD && self.method == Method::GET);
        method_ok && self.pattern.matches(path)
    }
}

/// Immutable, ordered rule table. First match wins.
#[derive(Debug, Clone, Default)]
pub struct RouteRegistry {
    rules: Vec<RouteRule>,
}

impl RouteRegistry {
    pub fn new(rules: impl IntoIterator<Item = RouteRule>) -> Self {
        Self {
            rules: rules.into_iter().collect(),
        }
    }

    /// Concatenates feature route lists in the order given.
    pub fn from_features(features: &[fn() -> Vec<RouteRule>]) -> Self {
        Self::new(features.iter().flat_map(|feature| feature()))
    }

    pub fn match_route(&self, path: &str, method: &Method) -> Option<&RouteRule> {
        self.rules.iter().find(|rule| rule.applies_to(path, method))
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
