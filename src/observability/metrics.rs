//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (connections, cache hits/misses, bytes relayed)
//! - Expose a Prometheus-compatible endpoint when enabled
//! - Keep in-process counters that tests and shutdown logging can read
//!
//! # Metrics
//! - `proxy_connections_total` (counter): accepted client connections
//! - `proxy_requests_total{outcome}` (counter): finished connections by outcome
//! - `proxy_cache_hits_total` / `proxy_cache_misses_total` (counter)
//! - `proxy_cache_evictions_total` (counter), `proxy_cache_bytes` (gauge)
//! - `proxy_origin_bytes_sent_total` / `proxy_client_bytes_sent_total` (counter)
//! - `proxy_idle_workers` / `proxy_active_workers` (gauge)

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connection() {
    counter!("proxy_connections_total").increment(1);
}

pub fn record_outcome(outcome: &'static str) {
    counter!("proxy_requests_total", "outcome" => outcome).increment(1);
}

pub fn record_cache_store(used_bytes: usize, evicted: usize) {
    gauge!("proxy_cache_bytes").set(used_bytes as f64);
    if evicted > 0 {
        counter!("proxy_cache_evictions_total").increment(evicted as u64);
    }
}

pub fn record_workers(idle: usize, total: usize) {
    gauge!("proxy_idle_workers").set(idle as f64);
    gauge!("proxy_active_workers").set(total as f64);
}

/// Counters shared by every connection of one server.
#[derive(Debug, Default)]
pub struct ProxyStats {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    origin_connections: AtomicU64,
    origin_bytes_sent: AtomicU64,
    client_bytes_sent: AtomicU64,
}

/// Point-in-time copy of [`ProxyStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub origin_connections: u64,
    pub origin_bytes_sent: u64,
    pub client_bytes_sent: u64,
}

impl ProxyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        counter!("proxy_cache_hits_total").increment(1);
    }

    pub fn cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        counter!("proxy_cache_misses_total").increment(1);
    }

    pub fn origin_connected(&self) {
        self.origin_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn origin_bytes(&self, n: usize) {
        self.origin_bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
        counter!("proxy_origin_bytes_sent_total").increment(n as u64);
    }

    pub fn client_bytes(&self, n: usize) {
        self.client_bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
        counter!("proxy_client_bytes_sent_total").increment(n as u64);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            origin_connections: self.origin_connections.load(Ordering::Relaxed),
            origin_bytes_sent: self.origin_bytes_sent.load(Ordering::Relaxed),
            client_bytes_sent: self.client_bytes_sent.load(Ordering::Relaxed),
        }
    }
}
