//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::http::headers::InjectedHeaders;
use crate::net::io::LineLimits;

/// Root configuration for the forward proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Worker pool sizing.
    pub workers: WorkerConfig,

    /// Response cache limits.
    pub cache: CacheConfig,

    /// Request/response processing settings.
    pub http: HttpConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:15213").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:15213".to_string(),
        }
    }
}

/// Worker pool configuration.
///
/// The supervisor keeps the number of idle workers between `min_spare`
/// and `max_spare`, never running more than `max_workers` in total.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Workers spawned at startup.
    pub start_workers: usize,

    /// Spawn more workers when fewer than this many are idle.
    pub min_spare: usize,

    /// Retire workers when more than this many are idle.
    pub max_spare: usize,

    /// Hard cap on live workers.
    pub max_workers: usize,

    /// Accepted connections waiting for a worker.
    pub queue_depth: usize,

    /// How often the supervisor evaluates the scaling rule.
    pub supervisor_interval_ms: u64,

    /// How long shutdown waits for active connections.
    pub shutdown_grace_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            start_workers: 16,
            min_spare: 4,
            max_spare: 64,
            max_workers: 128,
            queue_depth: 256,
            supervisor_interval_ms: 1000,
            shutdown_grace_secs: 5,
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Store responses at all.
    pub enabled: bool,

    /// Total bytes across all cached responses.
    pub capacity_bytes: usize,

    /// Largest single response that will be cached.
    pub max_object_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity_bytes: 1_049_000,
            max_object_bytes: 102_400,
        }
    }
}

/// HTTP processing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Injected `User-Agent` value.
    pub user_agent: String,

    /// Injected `Accept` value.
    pub accept: String,

    /// Injected `Accept-Encoding` value.
    pub accept_encoding: String,

    /// Longest request/status/header line accepted.
    pub max_line_length: usize,

    /// Bytes peeked per attempt while looking for a line end.
    pub segment_length: usize,

    /// Largest single read when relaying bodies.
    pub read_chunk_size: usize,

    /// Reverse-resolve client addresses for logging.
    pub resolve_peer_names: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64; rv:10.0.3) Gecko/20120305 Firefox/10.0.3"
                .to_string(),
            accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
            accept_encoding: "gzip, deflate".to_string(),
            max_line_length: 128 * 1024,
            segment_length: 512,
            read_chunk_size: 96 * 1024,
            resolve_peer_names: false,
        }
    }
}

impl HttpConfig {
    pub fn line_limits(&self) -> LineLimits {
        LineLimits {
            segment_length: self.segment_length,
            max_line_length: self.max_line_length,
        }
    }

    pub fn injected_headers(&self) -> InjectedHeaders {
        InjectedHeaders {
            user_agent: self.user_agent.clone(),
            accept: self.accept.clone(),
            accept_encoding: self.accept_encoding.clone(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
