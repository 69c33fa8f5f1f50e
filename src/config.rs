//! Runtime configuration, built once in `main` and passed down by reference

use crate::topics::TopicSet;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_BIND: &str = "0.0.0.0:8000";
pub const DEFAULT_PREFIX: &str = "/api";

/// Notification hub tuning
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Frames queued per connection before publishes to it start failing
    pub outbound_buffer: usize,
    pub ping_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: 64,
            ping_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Path prefix for every API route except `/health`
    pub prefix: String,
    pub topics: TopicSet,
    pub hub: HubConfig,
}

impl ServerConfig {
    /// Normalize a prefix to `/segment` form; `""` and `"/"` mean no prefix
    pub fn normalize_prefix(prefix: &str) -> String {
        let trimmed = prefix.trim().trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{}", trimmed)
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            prefix: DEFAULT_PREFIX.to_string(),
            topics: TopicSet::default(),
            hub: HubConfig::default(),
        }
    }
}
