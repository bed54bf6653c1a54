//! Cross-origin resource sharing
//!
//! Applied uniformly to responses the proxy controls, before routing.
//! Tunnelled bytes (the 101 handshake and everything after it) are never
//! touched.

use crate::config::CorsConfig;
use crate::http::headers::Headers;
use crate::http::request::{Method, Request};
use crate::http::response::{Response, ResponseBuilder, StatusCode};

#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allowed_origin: String,
    allowed_methods: String,
    allow_credentials: bool,
}

impl CorsPolicy {
    pub fn from_config(cfg: &CorsConfig) -> Self {
        Self {
            allowed_origin: cfg.allowed_origin.clone(),
            allowed_methods: cfg.allowed_methods.join(","),
            allow_credentials: cfg.allow_credentials,
        }
    }

    /// Whether `req` is a CORS preflight that should be answered here.
    pub fn is_preflight(req: &Request) -> bool {
        req.method == Method::OPTIONS
            && req.header("Origin").is_some()
            && req.header("Access-Control-Request-Method").is_some()
    }

    /// Answer a preflight request with `204 No Content`.
    pub fn preflight(&self, req: &Request) -> Response {
        let mut builder = ResponseBuilder::new(StatusCode::NO_CONTENT)
            .header("Access-Control-Allow-Methods", self.allowed_methods.clone());

        if let Some(requested) = req.header("Access-Control-Request-Headers") {
            builder = builder
                .header("Access-Control-Allow-Headers", requested)
                .header("Vary", "Access-Control-Request-Headers");
        }

        let mut response = builder.header("Content-Length", "0").build();
        self.apply(&mut response.headers);
        response
    }

    /// Add the origin headers unless the response already carries them.
    pub fn apply(&self, headers: &mut Headers) {
        if headers.contains("Access-Control-Allow-Origin") {
            return;
        }

        headers.insert("Access-Control-Allow-Origin", self.allowed_origin.clone());
        if self.allowed_origin != "*" {
            headers.append("Vary", "Origin");
        }
        if self.allow_credentials {
            headers.insert("Access-Control-Allow-Credentials", "true");
        }
    }
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self::from_config(&CorsConfig::default())
    }
}
