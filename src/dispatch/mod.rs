//! Worker dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! accept loop (http/server.rs)
//!     → pool.rs (bounded queue of accepted sockets)
//!     → idle worker takes one socket, runs the processor, goes idle again
//!
//! supervisor (pool.rs, every supervisor_interval_ms)
//!     → scaling.rs (counters + band → Spawn / Retire / Hold)
//! ```
//!
//! # Design Decisions
//! - Queue is bounded: a full queue stalls accepting, not memory
//! - Counters restored by an RAII slot, so a panicking worker still frees its slot
//! - Scaling is a pure rule, decoupled from the worker's own control flow

pub mod pool;
pub mod scaling;

pub use pool::{Handler, JobFuture, PoolSettings, WorkerPool};
pub use scaling::{PoolCounters, ScalingBand, ScalingDecision};
