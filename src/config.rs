//! Runtime configuration.
//!
//! Values come from built-in defaults, an optional YAML file named by
//! `WSGATE_CONFIG`, and finally environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::proxy::target::{BackendTarget, PathRewrite};

pub const CONFIG_PATH_ENV: &str = "WSGATE_CONFIG";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub proxy: ProxyConfig,
    pub cors: CorsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub keepalive_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            keepalive_timeout_secs: 5,
            shutdown_grace_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend URL, e.g. `wss://backend.example.com`
    pub url: String,
    pub connect_timeout_ms: u64,
    pub response_timeout_secs: u64,
    /// Rewrite `Host` (and `Origin`, when present) to the backend's
    pub change_origin: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080".to_string(),
            connect_timeout_ms: 5000,
            response_timeout_secs: 30,
            change_origin: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub prefix: String,
    pub path_rewrite: PathRewrite,
    pub idle_timeout_secs: Option<u64>,
    pub max_session_secs: Option<u64>,
    pub drain_grace_ms: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            prefix: "/ws".to_string(),
            path_rewrite: PathRewrite::Identity,
            idle_timeout_secs: None,
            max_session_secs: None,
            drain_grace_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origin: String,
    pub allowed_methods: Vec<String>,
    pub allow_credentials: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origin: "*".to_string(),
            allowed_methods: vec!["GET".to_string(), "POST".to_string()],
            allow_credentials: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl Config {
    /// Load configuration from the optional YAML file and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::Read { path, source })?;
                Self::from_yaml_str(&raw)?
            }
            Err(_) => Self::default(),
        };

        cfg.apply_env(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply environment overrides, reading variables through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen) = lookup("LISTEN") {
            self.server.listen_addr = listen;
        }

        if let Some(port) = lookup("PORT") {
            let port: u16 = parse_var("PORT", &port)?;
            let host = self
                .server
                .listen_addr
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            self.server.listen_addr = format!("{host}:{port}");
        }

        if let Some(v) = lookup("KEEPALIVE_TIMEOUT_SECS") {
            self.server.keepalive_timeout_secs = parse_var("KEEPALIVE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("SHUTDOWN_GRACE_SECS") {
            self.server.shutdown_grace_secs = parse_var("SHUTDOWN_GRACE_SECS", &v)?;
        }
        if let Some(v) = lookup("BACKEND_URL") {
            self.backend.url = v;
        }
        if let Some(v) = lookup("CONNECT_TIMEOUT_MS") {
            self.backend.connect_timeout_ms = parse_var("CONNECT_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("RESPONSE_TIMEOUT_SECS") {
            self.backend.response_timeout_secs = parse_var("RESPONSE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("CHANGE_ORIGIN") {
            self.backend.change_origin = parse_var("CHANGE_ORIGIN", &v)?;
        }
        if let Some(v) = lookup("PROXY_PREFIX") {
            self.proxy.prefix = v;
        }
        if let Some(v) = lookup("WS_IDLE_TIMEOUT_SECS") {
            self.proxy.idle_timeout_secs = Some(parse_var("WS_IDLE_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("WS_MAX_SESSION_SECS") {
            self.proxy.max_session_secs = Some(parse_var("WS_MAX_SESSION_SECS", &v)?);
        }
        if let Some(v) = lookup("DRAIN_GRACE_MS") {
            self.proxy.drain_grace_ms = parse_var("DRAIN_GRACE_MS", &v)?;
        }
        if let Some(v) = lookup("CORS_ORIGIN") {
            self.cors.allowed_origin = v;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("LOG_FORMAT") {
            self.logging.format = match v.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "invalid LOG_FORMAT '{other}': must be 'json' or 'pretty'"
                    )));
                }
            };
        }

        Ok(())
    }

    /// Check cross-field constraints. Called by [`Config::load`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;
        self.backend_target()?;

        if !self.proxy.prefix.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "proxy prefix '{}' must start with '/'",
                self.proxy.prefix
            )));
        }
        if self.backend.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid("connect timeout must be non-zero".into()));
        }
        if self.backend.response_timeout_secs == 0 {
            return Err(ConfigError::Invalid("response timeout must be non-zero".into()));
        }
        if self.proxy.idle_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid("idle timeout must be non-zero when set".into()));
        }
        if self.proxy.max_session_secs == Some(0) {
            return Err(ConfigError::Invalid("max session must be non-zero when set".into()));
        }

        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server.listen_addr.parse().map_err(|e| {
            ConfigError::Invalid(format!(
                "invalid listen address '{}': {e}",
                self.server.listen_addr
            ))
        })
    }

    /// Build the immutable backend descriptor shared by all sessions.
    pub fn backend_target(&self) -> Result<BackendTarget, ConfigError> {
        BackendTarget::from_url(
            &self.backend.url,
            self.proxy.path_rewrite.clone(),
            self.backend.change_origin,
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.backend.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.response_timeout_secs)
    }

    pub fn keepalive_timeout(&self) -> Duration {
        Duration::from_secs(self.server.keepalive_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_grace_secs)
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("invalid {key} '{value}': {e}")))
}
