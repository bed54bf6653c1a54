//! Reverse proxy functionality
//!
//! Components, leaf first: the Backend Connector opens outbound
//! connections, the HTTP Forwarder relays plain requests, and the Upgrade
//! Splicer tunnels WebSocket connections.

pub mod connector;
pub mod forwarder;
pub mod rewrite;
pub mod session;
pub mod splicer;
pub mod target;

pub use connector::{BackendConnector, BackendStream};
pub use forwarder::HttpForwarder;
pub use session::{ProxySession, SessionState, TerminationReason};
pub use splicer::{SpliceSettings, UpgradeSplicer};
pub use target::{BackendTarget, PathRewrite, Scheme};
