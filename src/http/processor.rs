//! Per-connection request processing.
//!
//! # Responsibilities
//! - Drive one client connection from request line to closed socket
//! - Rewrite the request and key the cache on the rewritten bytes
//! - Fetch from the origin on a miss and store complete responses
//!
//! # Design Decisions
//! - Any parse or I/O failure aborts the connection; `serve` is the single
//!   place that tears it down
//! - A cache hit never opens an origin connection
//! - Capacity problems degrade to "serve without caching"
//! - A response that outgrows the largest cacheable object is streamed to
//!   the client from then on instead of being buffered

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use crate::cache::{CacheError, CacheUpdate};
use crate::http::headers::{self, HeaderError};
use crate::http::request::{ParseError, ProtocolVersion, Request};
use crate::http::response;
use crate::http::server::ProxyContext;
use crate::net::buffer::{BufferError, ByteBuffer};
use crate::net::connection::Connection;
use crate::net::io::{self, LineError, LineLimits};
use crate::observability::metrics;

/// How a connection ended when nothing went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The client closed without sending a request line.
    Empty,
    /// Served from the cache.
    CacheHit,
    /// Fetched from the origin.
    CacheMiss { stored: bool },
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Empty => "empty",
            Outcome::CacheHit => "hit",
            Outcome::CacheMiss { .. } => "miss",
        }
    }
}

/// Failure classes a connection can end with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unparseable request, response or header.
    Malformed,
    /// Socket failure, unexpected close or allocation failure.
    Io,
    /// A request this proxy refuses to serve (CONNECT).
    Unsupported,
}

impl ErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Malformed => "malformed",
            ErrorKind::Io => "io",
            ErrorKind::Unsupported => "unsupported",
        }
    }
}

/// Errors that abort a connection.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("malformed message: {0}")]
    Parse(#[from] ParseError),
    #[error("header block: {0}")]
    Headers(#[from] HeaderError),
    #[error("reading line: {0}")]
    Line(#[from] LineError),
    #[error("buffer: {0}")]
    Buffer(#[from] BufferError),
    #[error("origin {host}:{port} unreachable: {source}")]
    OriginConnect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{method} is not supported")]
    Unsupported { method: String },
}

impl ProcessError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProcessError::Parse(_)
            | ProcessError::Headers(HeaderError::Malformed(_))
            | ProcessError::Headers(HeaderError::Line(LineError::TooLong { .. }))
            | ProcessError::Line(LineError::TooLong { .. }) => ErrorKind::Malformed,
            ProcessError::Unsupported { .. } => ErrorKind::Unsupported,
            _ => ErrorKind::Io,
        }
    }
}

const NOT_IMPLEMENTED: &str = "HTTP/1.0 501 Not Implemented\r\nConnection: close\r\n\r\n";

/// Serve one accepted client and release everything it used.
pub async fn serve(ctx: Arc<ProxyContext>, stream: TcpStream, peer: SocketAddr) {
    metrics::record_connection();

    let mut conn = match Connection::create(stream, peer, &ctx.tracker, ctx.resolver.as_ref()).await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::warn!(peer = %peer, error = %e, "Failed to set up connection");
            metrics::record_outcome(ErrorKind::Io.label());
            return;
        }
    };

    tracing::debug!(
        connection_id = %conn.id,
        peer = %conn.addrs.peer_ip,
        peer_name = %conn.addrs.peer_name,
        local = %conn.addrs.local,
        "Client connected"
    );

    match handle(&ctx, &mut conn).await {
        Ok(outcome) => {
            tracing::debug!(connection_id = %conn.id, outcome = outcome.label(), "Request finished");
            metrics::record_outcome(outcome.label());
        }
        Err(e) => {
            let kind = e.kind();
            match kind {
                ErrorKind::Unsupported => {
                    tracing::info!(connection_id = %conn.id, error = %e, "Request refused")
                }
                ErrorKind::Malformed | ErrorKind::Io => tracing::warn!(
                    connection_id = %conn.id,
                    request = conn.request_line.as_deref().unwrap_or_default(),
                    error = %e,
                    "Request aborted"
                ),
            }
            metrics::record_outcome(kind.label());
        }
    }

    conn.close().await;
}

/// Run the request/response exchange for `conn`.
pub async fn handle(ctx: &ProxyContext, conn: &mut Connection) -> Result<Outcome, ProcessError> {
    let Some(line) = read_request_line(&mut conn.client, ctx.limits).await? else {
        tracing::debug!(connection_id = %conn.id, "Empty request");
        return Ok(Outcome::Empty);
    };

    let request = Request::parse(&line)?;
    conn.request_line = Some(line);
    conn.protocol = request.version;
    conn.connect_method = request.is_connect();

    if conn.connect_method {
        let refusal = io::write_message(&mut conn.client, format_args!("{NOT_IMPLEMENTED}"));
        refusal.await?;
        return Err(ProcessError::Unsupported {
            method: request.method,
        });
    }

    let client_headers = headers::read_headers(&mut conn.client, ctx.limits).await?;
    conn.content_length.client = client_headers.content_length()?;
    headers::write_forwarded_request(&request, client_headers, &ctx.injected, &mut conn.inbound)?;

    if let Some(length) = conn.content_length.client.filter(|n| *n > 0) {
        relay_client_body(conn, length, ctx.read_chunk_size).await?;
    }

    let key = conn.inbound.to_flat();
    let cached = ctx.cache.as_ref().and_then(|cache| cache.query(&key));

    let (response, outcome) = match cached {
        Some(value) => {
            ctx.stats.cache_hit();
            tracing::debug!(connection_id = %conn.id, host = %request.host, size = value.len(), "Cache hit");
            (value, Outcome::CacheHit)
        }
        None => {
            ctx.stats.cache_miss();
            tracing::debug!(connection_id = %conn.id, host = %request.host, "Cache miss");
            match fetch_from_origin(ctx, conn, &request).await? {
                OriginBody::Buffered { complete } => {
                    let response = conn.outbound.to_flat();
                    conn.outbound.clear();
                    let stored = complete && store(ctx, conn, key, response.clone());
                    (response, Outcome::CacheMiss { stored })
                }
                OriginBody::Streamed { sent } => {
                    ctx.stats.client_bytes(sent);
                    tracing::debug!(
                        connection_id = %conn.id,
                        host = %request.host,
                        port = request.port,
                        bytes = sent,
                        "Response streamed"
                    );
                    return Ok(Outcome::CacheMiss { stored: false });
                }
            }
        }
    };

    conn.outbound
        .load_from_flat(&response::client_view(&response, conn.protocol));
    let sent = conn.outbound.write_all_to(&mut conn.client).await?;
    ctx.stats.client_bytes(sent);

    tracing::debug!(
        connection_id = %conn.id,
        host = %request.host,
        port = request.port,
        bytes = sent,
        "Response relayed"
    );
    Ok(outcome)
}

/// First non-blank line from the client, chomped. `None` if the client
/// closed first.
async fn read_request_line(client: &mut TcpStream, limits: LineLimits) -> Result<Option<String>, LineError> {
    while let Some(mut line) = io::read_line(client, limits).await? {
        io::chomp(&mut line);
        if !line.is_empty() {
            return Ok(Some(line));
        }
    }
    Ok(None)
}

/// Append exactly `length` body bytes from the client to the inbound buffer,
/// then swallow a stray CRLF if one is already waiting.
async fn relay_client_body(conn: &mut Connection, length: u64, chunk: usize) -> Result<(), ProcessError> {
    let mut remaining = length;
    while remaining > 0 {
        let want = remaining.min(chunk as u64) as usize;
        let read = conn.inbound.fill_from(&mut conn.client, want).await?;
        remaining -= read as u64;
    }

    let mut trailer = [0u8; 2];
    if io::peek_pending(&conn.client, &mut trailer).await? == 2 && &trailer == b"\r\n" {
        conn.client.read_exact(&mut trailer).await?;
    }
    Ok(())
}

/// Where the origin body ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OriginBody {
    /// Whole response in the outbound buffer; `complete` is false when the
    /// origin closed before its declared length.
    Buffered { complete: bool },
    /// Too large to cache, already relayed to the client.
    Streamed { sent: usize },
}

/// Forward the inbound buffer to the origin and collect the rewritten
/// response into the outbound buffer, switching to streaming once it can no
/// longer be cached.
async fn fetch_from_origin(ctx: &ProxyContext, conn: &mut Connection, request: &Request) -> Result<OriginBody, ProcessError> {
    let stream = TcpStream::connect((request.host.as_str(), request.port))
        .await
        .map_err(|source| ProcessError::OriginConnect {
            host: request.host.clone(),
            port: request.port,
            source,
        })?;
    ctx.stats.origin_connected();
    tracing::debug!(connection_id = %conn.id, host = %request.host, port = request.port, "Connected to origin");

    let origin = conn.origin.insert(stream);
    let sent = conn.inbound.write_all_to(origin).await?;
    ctx.stats.origin_bytes(sent);

    let head = response::read_response_head(origin, ctx.limits).await?;
    conn.content_length.origin = head.content_length()?;
    head.write_to(&mut conn.outbound)?;

    let mut sink = BodySink {
        buffer: &mut conn.outbound,
        client: &mut conn.client,
        protocol: conn.protocol,
        // Nothing is worth buffering without a cache.
        spill_at: ctx.cache.as_ref().map_or(0, |cache| cache.max_object()),
        streamed: None,
    };
    let complete = read_origin_body(origin, &mut sink, conn.content_length.origin, ctx.read_chunk_size).await?;
    let streamed = sink.streamed;

    if !complete {
        tracing::info!(
            connection_id = %conn.id,
            declared = conn.content_length.origin,
            "Origin body shorter than declared, not caching"
        );
    }
    Ok(match streamed {
        Some(sent) => OriginBody::Streamed { sent },
        None => OriginBody::Buffered { complete },
    })
}

/// Collects the origin body, spilling to the client past `spill_at` bytes.
struct BodySink<'a> {
    buffer: &'a mut ByteBuffer,
    client: &'a mut TcpStream,
    protocol: ProtocolVersion,
    spill_at: usize,
    /// Bytes relayed so far once streaming started.
    streamed: Option<usize>,
}

impl BodySink<'_> {
    /// Account for newly buffered bytes.
    async fn advance(&mut self) -> Result<(), BufferError> {
        match self.streamed.as_mut() {
            Some(total) => *total += self.buffer.write_all_to(&mut *self.client).await?,
            None if self.buffer.size() > self.spill_at => {
                let pending = response::client_view(&self.buffer.to_flat(), self.protocol);
                self.buffer.clear();
                self.buffer.load_from_flat(&pending);
                self.streamed = Some(self.buffer.write_all_to(&mut *self.client).await?);
            }
            None => {}
        }
        Ok(())
    }
}

/// Read the body: `declared` bytes when known, otherwise until the origin
/// closes.
async fn read_origin_body(
    origin: &mut TcpStream,
    sink: &mut BodySink<'_>,
    declared: Option<u64>,
    chunk: usize,
) -> Result<bool, ProcessError> {
    let mut remaining = declared;
    loop {
        let want = match remaining {
            Some(0) => return Ok(true),
            Some(n) => n.min(chunk as u64) as usize,
            None => chunk,
        };
        match sink.buffer.fill_from(origin, want).await {
            Ok(read) => {
                if let Some(left) = remaining.as_mut() {
                    *left -= read as u64;
                }
                sink.advance().await?;
            }
            Err(BufferError::Closed) => return Ok(remaining.is_none()),
            Err(e) => return Err(e.into()),
        }
    }
}

fn store(ctx: &ProxyContext, conn: &Connection, key: Bytes, response: Bytes) -> bool {
    let Some(cache) = ctx.cache.as_ref() else {
        return false;
    };
    let size = response.len();
    match cache.update(key, response) {
        Ok(CacheUpdate::Stored { evicted, freed }) => {
            tracing::debug!(connection_id = %conn.id, size, evicted, freed, "Response cached");
            true
        }
        Ok(CacheUpdate::TooLarge) => {
            tracing::info!(connection_id = %conn.id, size, "Response too large to cache");
            false
        }
        Err(e @ CacheError::NoSpace { .. }) => {
            tracing::info!(connection_id = %conn.id, error = %e, "Response not cached");
            false
        }
    }
}
