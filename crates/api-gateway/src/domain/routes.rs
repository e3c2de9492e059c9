//! Route patterns and most-specific-first route resolution.
//!
//! A route is a (method, pattern) pair mapped to an access rule and a
//! handler. Patterns are `/`-separated segments; a segment is a literal, a
//! `{name}` parameter, or a trailing `{*name}` catch-all.
//!
//! Resolution walks routes in specificity order and returns the first one
//! whose method and pattern both match, so `/players/{id}/inventory/give`
//! is always tried before a broader pattern that could also match it.

use crate::domain::error::{ApiError, ApiResult};
use crate::ports::outbound::HostRequest;
use axum::http::Method;
use std::cmp::Reverse;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    CatchAll(String),
}

/// Parsed path pattern such as `/worlds/{id}/blocks/{x}/{y}/{z}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
}

impl RoutePattern {
    /// Parse a pattern. A `{*name}` segment anywhere but last is treated as a
    /// literal.
    pub fn parse(pattern: &str) -> Self {
        let parts: Vec<&str> = split_path(pattern).collect();
        let last = parts.len().saturating_sub(1);

        let segments = parts
            .iter()
            .enumerate()
            .map(|(i, part)| match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                Some(name) if i == last && name.starts_with('*') && name.len() > 1 => {
                    Segment::CatchAll(name[1..].to_string())
                }
                Some(name) if !name.is_empty() && !name.starts_with('*') => {
                    Segment::Param(name.to_string())
                }
                _ => Segment::Literal((*part).to_string()),
            })
            .collect();

        Self {
            raw: pattern.to_string(),
            segments,
        }
    }

    /// The pattern as written. Used as the rate-limit endpoint id.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Match a concrete request path, capturing parameters.
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        let parts: Vec<&str> = split_path(path).collect();
        let mut params = PathParams::default();

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(lit) => {
                    if parts.get(i) != Some(&lit.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    params.push(name, parts.get(i)?);
                }
                Segment::CatchAll(name) => {
                    if parts.len() <= i {
                        return None;
                    }
                    params.push(name, &parts[i..].join("/"));
                    return Some(params);
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(params)
    }

    /// Sort key, most specific first: no catch-all, more segments, more literals.
    fn specificity(&self) -> (bool, Reverse<usize>, Reverse<usize>) {
        let catch_all = matches!(self.segments.last(), Some(Segment::CatchAll(_)));
        let literals = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count();
        (catch_all, Reverse(self.segments.len()), Reverse(literals))
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Parameters captured from a matched path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(Vec<(String, String)>);

impl PathParams {
    fn push(&mut self, name: &str, value: &str) {
        self.0.push((name.to_string(), value.to_string()));
    }

    /// A captured parameter. Absence means the route and its handler disagree.
    pub fn get(&self, name: &str) -> ApiResult<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .ok_or_else(|| ApiError::missing_field(name))
    }

    /// A parameter that must be an integer block coordinate.
    pub fn coordinate(&self, name: &str) -> ApiResult<i64> {
        self.get(name)?.parse().map_err(|_| {
            ApiError::invalid_coordinates(format!("Coordinate '{}' must be an integer", name))
        })
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Who may call a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// No credential; rate limited by client address
    Public,
    /// Bearer token holding this permission
    Requires(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    Command,
    Kick,
    Ban,
    Broadcast,
}

impl AdminAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Kick => "kick",
            Self::Ban => "ban",
            Self::Broadcast => "broadcast",
        }
    }
}

/// Builds a validated host request from path parameters and the raw body.
pub type HostBinder = fn(&PathParams, &[u8]) -> ApiResult<HostRequest>;

/// What a matched route runs.
#[derive(Clone, Copy)]
pub enum RouteHandler {
    Health,
    IssueToken,
    Admin(AdminAction),
    Host(HostBinder),
}

impl fmt::Debug for RouteHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Health => f.write_str("Health"),
            Self::IssueToken => f.write_str("IssueToken"),
            Self::Admin(action) => f.debug_tuple("Admin").field(action).finish(),
            Self::Host(_) => f.write_str("Host"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Route {
    pub method: Method,
    pub pattern: RoutePattern,
    pub access: Access,
    pub handler: RouteHandler,
}

impl Route {
    pub fn new(method: Method, pattern: &str, access: Access, handler: RouteHandler) -> Self {
        Self {
            method,
            pattern: RoutePattern::parse(pattern),
            access,
            handler,
        }
    }

    pub fn is_public(&self) -> bool {
        self.access == Access::Public
    }
}

/// Routes held in specificity order.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Build a table. Registration order only breaks ties between equally
    /// specific patterns.
    pub fn new(mut routes: Vec<Route>) -> Self {
        routes.sort_by_key(|r| r.pattern.specificity());
        Self { routes }
    }

    /// First route matching both method and path. A path that matches only
    /// under another method resolves to `None`.
    pub fn resolve(&self, method: &Method, path: &str) -> Option<(&Route, PathParams)> {
        self.routes
            .iter()
            .filter(|r| r.method == *method)
            .find_map(|r| r.pattern.matches(path).map(|params| (r, params)))
    }

    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
