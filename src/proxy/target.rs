//! Backend target descriptor
//!
//! The single backend every session is proxied to. Built once at startup
//! from the configured URL and never mutated afterwards.

use serde::Deserialize;
use url::{Host, Url};

use crate::error::ConfigError;

/// URL scheme of the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Ws,
    Wss,
    Http,
    Https,
}

impl Scheme {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "ws" => Some(Scheme::Ws),
            "wss" => Some(Scheme::Wss),
            "http" => Some(Scheme::Http),
            "https" => Some(Scheme::Https),
            _ => None,
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Scheme::Wss | Scheme::Https)
    }

    pub fn default_port(&self) -> u16 {
        if self.is_tls() { 443 } else { 80 }
    }

    /// The HTTP scheme used in `Origin` headers for this backend.
    pub fn http_scheme(&self) -> &'static str {
        if self.is_tls() { "https" } else { "http" }
    }
}

/// How request paths are rewritten before being sent to the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathRewrite {
    #[default]
    Identity,
    /// Remove the proxy prefix from the front of the path
    StripPrefix,
    /// Replace a leading `from` with `to`
    Replace { from: String, to: String },
}

impl PathRewrite {
    pub fn apply(&self, path: &str, prefix: &str) -> String {
        let rewritten = match self {
            PathRewrite::Identity => return path.to_string(),
            PathRewrite::StripPrefix => match path.strip_prefix(prefix) {
                Some(rest) => rest.to_string(),
                None => path.to_string(),
            },
            PathRewrite::Replace { from, to } => match path.strip_prefix(from.as_str()) {
                Some(rest) => format!("{to}{rest}"),
                None => path.to_string(),
            },
        };

        if rewritten.starts_with('/') {
            rewritten
        } else {
            format!("/{rewritten}")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTarget {
    pub scheme: Scheme,
    /// Host name or IP literal, without IPv6 brackets
    pub host: String,
    pub port: u16,
    /// Path component of the backend URL; "" when the URL has none
    pub base_path: String,
    pub path_rewrite: PathRewrite,
    pub change_origin: bool,
    ipv6: bool,
}

impl BackendTarget {
    /// Validate and build a target from a URL such as `wss://backend.example.com`.
    pub fn from_url(
        raw: &str,
        path_rewrite: PathRewrite,
        change_origin: bool,
    ) -> Result<Self, ConfigError> {
        let url = Url::parse(raw)
            .map_err(|e| ConfigError::Invalid(format!("invalid backend URL '{raw}': {e}")))?;

        let scheme = Scheme::parse(url.scheme()).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "unsupported backend scheme '{}': expected ws, wss, http or https",
                url.scheme()
            ))
        })?;

        let (host, ipv6) = match url.host() {
            Some(Host::Domain(d)) if !d.is_empty() => (d.to_string(), false),
            Some(Host::Ipv4(addr)) => (addr.to_string(), false),
            Some(Host::Ipv6(addr)) => (addr.to_string(), true),
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "backend URL '{raw}' has no host"
                )));
            }
        };

        let port = url.port().unwrap_or_else(|| scheme.default_port());
        let base_path = url.path().trim_end_matches('/').to_string();

        Ok(Self {
            scheme,
            host,
            port,
            base_path,
            path_rewrite,
            change_origin,
            ipv6,
        })
    }

    pub fn is_tls(&self) -> bool {
        self.scheme.is_tls()
    }

    /// `host:port` for socket address resolution.
    pub fn socket_addr(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }

    /// Value for the `Host` header; the port is omitted when it is the scheme default.
    pub fn authority(&self) -> String {
        let host = if self.ipv6 {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };

        if self.port == self.scheme.default_port() {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }

    /// Value for a rewritten `Origin` header.
    pub fn origin(&self) -> String {
        format!("{}://{}", self.scheme.http_scheme(), self.authority())
    }

    /// Request target sent to the backend for an inbound `path` under `prefix`.
    pub fn outbound_path(&self, path: &str, prefix: &str) -> String {
        let rewritten = self.path_rewrite.apply(path, prefix);
        if self.base_path.is_empty() {
            rewritten
        } else {
            format!("{}{}", self.base_path, rewritten)
        }
    }
}

impl std::fmt::Display for BackendTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = match self.scheme {
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
            Scheme::Http => "http",
            Scheme::Https => "https",
        };
        write!(f, "{}://{}{}", scheme, self.authority(), self.base_path)
    }
}
