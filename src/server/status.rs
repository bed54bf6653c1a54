//! Health and stats endpoints. Neither touches the backend.

use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::http::response::{Response, StatusCode};

const HEALTH_MESSAGE: &str = "WebSocket proxy server is running";

/// Assumed page size for `/proc/self/statm`.
const PAGE_SIZE: u64 = 4096;

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub message: &'static str,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct StatsReport {
    /// Seconds since the server started
    pub uptime: f64,
    pub memory: MemoryUsage,
    pub timestamp: String,
}

/// Point-in-time process memory, in bytes. `None` where the platform
/// does not expose it.
#[derive(Debug, Serialize)]
pub struct MemoryUsage {
    pub rss: Option<u64>,
    #[serde(rename = "virtual")]
    pub virtual_size: Option<u64>,
}

impl MemoryUsage {
    pub fn snapshot() -> Self {
        let statm = std::fs::read_to_string("/proc/self/statm").ok();
        let mut fields = statm
            .as_deref()
            .unwrap_or("")
            .split_whitespace()
            .map(|f| f.parse::<u64>().ok());

        let virtual_size = fields.next().flatten().map(|pages| pages * PAGE_SIZE);
        let rss = fields.next().flatten().map(|pages| pages * PAGE_SIZE);

        Self { rss, virtual_size }
    }
}

pub fn health() -> Response {
    Response::json(
        StatusCode::OK,
        &HealthReport {
            status: "healthy",
            message: HEALTH_MESSAGE,
            timestamp: timestamp(),
        },
    )
}

pub fn stats(started_at: Instant) -> Response {
    Response::json(
        StatusCode::OK,
        &StatsReport {
            uptime: started_at.elapsed().as_secs_f64(),
            memory: MemoryUsage::snapshot(),
            timestamp: timestamp(),
        },
    )
}

/// Current UTC time, RFC 3339 with millisecond precision.
fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
