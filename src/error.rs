//! Error types shared across the proxy.

use std::io;
use std::time::Duration;

/// Failure to open a connection to the backend.
///
/// These are reported to the caller and never retried here.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("DNS resolution failed for {host}: {reason}")]
    Dns { host: String, reason: String },

    #[error("connection refused by {addr}")]
    Refused { addr: String },

    #[error("TLS handshake with {host} failed: {reason}")]
    Handshake { host: String, reason: String },

    #[error("connect to {addr} timed out after {after:?}")]
    Timeout { addr: String, after: Duration },

    #[error("connect to {addr} failed: {source}")]
    Io {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// Failures of a single proxied request or upgrade session.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("backend unreachable: {0}")]
    BackendUnreachable(#[from] ConnectError),

    #[error("client disconnected")]
    ClientDisconnected,

    #[error("upstream reset: {0}")]
    UpstreamReset(String),

    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error("backend did not respond within {0:?}")]
    ResponseTimeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
