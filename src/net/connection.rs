//! Per-connection state and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Own everything one client connection needs (sockets, buffers, parsed metadata)
//! - Count live connections so shutdown can wait for them
//!
//! # Design Decisions
//! - `Connection::close` consumes the connection, so teardown happens once
//! - Dropping a connection on an error path releases the same resources

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::http::request::ProtocolVersion;
use crate::net::buffer::ByteBuffer;
use crate::net::io;
use crate::net::resolve::{PeerResolver, UNKNOWN_PEER};

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Tracks active connections for graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until all connections are closed.
    pub async fn wait_for_shutdown(&self) {
        while self.active_count.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Wait at most `grace` for connections to close. Returns true if they did.
    pub async fn drain(&self, grace: Duration) -> bool {
        tokio::time::timeout(grace, self.wait_for_shutdown()).await.is_ok()
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection_id = %self.id, "Connection released");
    }
}

/// Textual forms of the addresses involved in a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionAddrs {
    pub local: String,
    pub peer_ip: String,
    pub peer_name: String,
}

/// Declared body lengths for each direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BodyLengths {
    pub client: Option<u64>,
    pub origin: Option<u64>,
}

/// One accepted client for its whole request/response exchange.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub client: TcpStream,
    /// Opened only on the origin path.
    pub origin: Option<TcpStream>,
    /// Client → origin bytes.
    pub inbound: ByteBuffer,
    /// Origin → client bytes.
    pub outbound: ByteBuffer,
    pub request_line: Option<String>,
    pub content_length: BodyLengths,
    pub protocol: ProtocolVersion,
    pub connect_method: bool,
    pub addrs: ConnectionAddrs,
    _guard: ConnectionGuard,
}

impl Connection {
    /// Set up state for a freshly accepted client.
    ///
    /// Address strings are captured before any request byte is read.
    pub async fn create(
        client: TcpStream,
        peer: SocketAddr,
        tracker: &ConnectionTracker,
        resolver: Option<&PeerResolver>,
    ) -> std::io::Result<Self> {
        let local = io::ip_string(&client.local_addr()?);
        let peer_name = match resolver {
            Some(resolver) => resolver.peer_name(peer.ip()).await,
            None => UNKNOWN_PEER.to_string(),
        };
        let guard = tracker.track();

        Ok(Self {
            id: guard.id(),
            client,
            origin: None,
            inbound: ByteBuffer::new(),
            outbound: ByteBuffer::new(),
            request_line: None,
            content_length: BodyLengths::default(),
            protocol: ProtocolVersion::HTTP_09,
            connect_method: false,
            addrs: ConnectionAddrs {
                local,
                peer_ip: io::ip_string(&peer),
                peer_name,
            },
            _guard: guard,
        })
    }

    /// Flush and shut down both sockets, then release the buffers.
    pub async fn close(mut self) {
        if let Some(mut origin) = self.origin.take() {
            let _ = origin.shutdown().await;
        }
        if let Err(e) = self.client.shutdown().await {
            tracing::trace!(connection_id = %self.id, error = %e, "Client shutdown failed");
        }
        self.inbound.clear();
        self.outbound.clear();
        tracing::debug!(connection_id = %self.id, peer = %self.addrs.peer_ip, "Connection closed");
    }
}
