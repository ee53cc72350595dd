//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted client socket
//!     → processor.rs (per-connection state machine)
//!     → request.rs (request line → method, host, port, path)
//!     → headers.rs (folded header block, rewrite for the origin)
//!     → cache lookup on the rewritten request bytes
//!         hit:  cached response → client
//!         miss: origin → response.rs (status line, headers, body) → cache → client
//!
//! server.rs owns the accept loop and the shared ProxyContext.
//! ```
//!
//! # Design Decisions
//! - Hand-written HTTP/1.x parsing with a named stage per failure
//! - Origins always see HTTP/1.0 with `Connection: close`
//! - CONNECT is refused with 501

pub mod headers;
pub mod processor;
pub mod request;
pub mod response;
pub mod server;

pub use server::{ProxyContext, ProxyServer};
