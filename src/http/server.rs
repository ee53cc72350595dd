//! Proxy server: shared context and the accept loop.
//!
//! # Responsibilities
//! - Build the shared `ProxyContext` from configuration
//! - Accept client sockets and queue them on the worker pool
//! - Stop accepting on shutdown and drain in-flight connections

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::broadcast;

use crate::cache::ObjectCache;
use crate::config::ProxyConfig;
use crate::dispatch::{Handler, JobFuture, PoolSettings, WorkerPool};
use crate::http::headers::InjectedHeaders;
use crate::http::processor;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::Listener;
use crate::net::io::LineLimits;
use crate::net::resolve::PeerResolver;
use crate::observability::metrics::ProxyStats;

/// State shared by every connection of one server.
#[derive(Debug)]
pub struct ProxyContext {
    /// `None` when caching is disabled.
    pub cache: Option<ObjectCache>,
    pub injected: InjectedHeaders,
    pub limits: LineLimits,
    pub read_chunk_size: usize,
    pub tracker: ConnectionTracker,
    pub stats: ProxyStats,
    pub resolver: Option<PeerResolver>,
}

impl ProxyContext {
    pub fn new(config: &ProxyConfig) -> Self {
        Self {
            cache: config
                .cache
                .enabled
                .then(|| ObjectCache::from_config(&config.cache)),
            injected: config.http.injected_headers(),
            limits: config.http.line_limits(),
            read_chunk_size: config.http.read_chunk_size,
            tracker: ConnectionTracker::new(),
            stats: ProxyStats::new(),
            resolver: config.http.resolve_peer_names.then(PeerResolver::from_system),
        }
    }
}

/// The forward caching proxy.
pub struct ProxyServer {
    config: ProxyConfig,
    context: Arc<ProxyContext>,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig) -> Self {
        let context = Arc::new(ProxyContext::new(&config));
        Self { config, context }
    }

    /// Shared state, for inspection while the server runs.
    pub fn context(&self) -> Arc<ProxyContext> {
        Arc::clone(&self.context)
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Accept connections until `shutdown` fires, then drain.
    ///
    /// Shutdown is also observed while waiting for room in a full queue.
    pub async fn run(self, listener: Listener, mut shutdown: broadcast::Receiver<()>) -> std::io::Result<()> {
        let local_addr = listener.local_addr()?;
        let ctx = Arc::clone(&self.context);
        let handler: Handler<(TcpStream, SocketAddr)> = Arc::new(move |(stream, peer): (TcpStream, SocketAddr)| {
            Box::pin(processor::serve(Arc::clone(&ctx), stream, peer)) as JobFuture
        });
        let pool = WorkerPool::start(PoolSettings::from(&self.config.workers), handler);

        tracing::info!(
            address = %local_addr,
            cache_enabled = self.context.cache.is_some(),
            "Proxy accepting connections"
        );

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, stopping accept loop");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        continue;
                    }
                },
            };

            tracing::trace!(peer = %peer, "Queueing connection");
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    tracing::info!(peer = %peer, "Shutdown before the connection was queued, dropping it");
                    break;
                }
                submitted = pool.submit((stream, peer)) => {
                    if submitted.is_err() {
                        tracing::error!("Worker pool closed, stopping accept loop");
                        break;
                    }
                }
            }
        }

        drop(listener);
        let grace = Duration::from_secs(self.config.workers.shutdown_grace_secs);
        let workers_done = pool.shutdown(grace).await;
        let drained = self.context.tracker.drain(grace).await;

        let stats = self.context.stats.snapshot();
        tracing::info!(
            workers_done,
            drained,
            active = self.context.tracker.active_count(),
            cache_hits = stats.cache_hits,
            cache_misses = stats.cache_misses,
            origin_connections = stats.origin_connections,
            "Proxy stopped"
        );
        Ok(())
    }
}
