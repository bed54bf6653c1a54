//! wsgate - WebSocket-aware reverse proxy
//!
//! Forwards HTTP requests and WebSocket upgrades under a path prefix to a
//! single backend, and answers health and stats requests itself.

pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod proxy;
pub mod server;
