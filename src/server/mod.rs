//! Listener, front controller and the locally answered endpoints.

pub mod dispatch;
pub mod listener;
pub mod status;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::error::ConfigError;
use crate::http::cors::CorsPolicy;
use crate::proxy::connector::BackendConnector;
use crate::proxy::forwarder::HttpForwarder;
use crate::proxy::splicer::{SpliceSettings, UpgradeSplicer};

pub use listener::Server;

/// Immutable state shared by every connection.
pub struct AppContext {
    pub prefix: String,
    pub cors: CorsPolicy,
    pub forwarder: HttpForwarder,
    pub splicer: UpgradeSplicer,
    pub started_at: Instant,
    pub keepalive_timeout: Duration,
}

impl AppContext {
    pub fn from_config(cfg: &Config) -> Result<Self, ConfigError> {
        let target = Arc::new(cfg.backend_target()?);
        let connector = BackendConnector::new(&target, cfg.connect_timeout());
        let cors = CorsPolicy::from_config(&cfg.cors);

        let forwarder = HttpForwarder::new(
            Arc::clone(&target),
            connector.clone(),
            cfg.proxy.prefix.clone(),
            cfg.response_timeout(),
            cors.clone(),
        );

        let settings = SpliceSettings {
            prefix: cfg.proxy.prefix.clone(),
            response_timeout: cfg.response_timeout(),
            idle_timeout: cfg.proxy.idle_timeout_secs.map(Duration::from_secs),
            max_session: cfg.proxy.max_session_secs.map(Duration::from_secs),
            drain_grace: Duration::from_millis(cfg.proxy.drain_grace_ms),
        };
        let splicer = UpgradeSplicer::new(target, connector, settings, cors.clone());

        Ok(Self {
            prefix: cfg.proxy.prefix.clone(),
            cors,
            forwarder,
            splicer,
            started_at: Instant::now(),
            keepalive_timeout: cfg.keepalive_timeout(),
        })
    }
}
