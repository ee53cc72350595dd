//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop)
//!     → connection.rs (per-connection state, lifecycle tracking)
//!     → resolve.rs (optional peer name)
//!     → Hand off to HTTP layer
//!
//! Byte movement inside a connection:
//!     io.rs (read_line, write_all, write_message)
//!     buffer.rs (chunk queue with partial drain/fill)
//! ```
//!
//! # Design Decisions
//! - Each connection tracked for graceful shutdown
//! - Partial reads/writes surface as byte counts; transient errors read as 0
//! - No TLS: plain TCP only

pub mod buffer;
pub mod connection;
pub mod io;
pub mod listener;
pub mod resolve;
