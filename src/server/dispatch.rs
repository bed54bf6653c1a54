//! Front Controller
//!
//! Classifies each parsed request. Pure: looks only at the request line and
//! headers.

use crate::http::request::{Method, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    HealthCheck,
    Stats,
    HttpForward,
    WebSocketUpgrade,
    NotFound,
}

pub fn dispatch(request: &Request, prefix: &str) -> RouteDecision {
    let path = request.path_only();
    let local = matches!(request.method, Method::GET | Method::HEAD);

    if local && path == "/" {
        return RouteDecision::HealthCheck;
    }
    if local && path == "/stats" {
        return RouteDecision::Stats;
    }

    if !matches_prefix(path, prefix) {
        return RouteDecision::NotFound;
    }

    if request.is_websocket_upgrade() {
        RouteDecision::WebSocketUpgrade
    } else {
        RouteDecision::HttpForward
    }
}

/// Whether `path` is `prefix` itself or lies below it.
///
/// `/ws`, `/ws/` and `/ws/echo` match prefix `/ws`; `/wsx` does not.
pub fn matches_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }

    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
