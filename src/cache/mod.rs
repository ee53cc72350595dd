//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! Rewritten request (flat bytes) = cache key
//!     → store.rs query (read lock, touch recency)
//!         hit  → flat response bytes → client
//!         miss → origin round-trip → flat response bytes
//!               → store.rs update (write lock, evict LRU until it fits)
//! ```
//!
//! # Design Decisions
//! - Purely capacity-bounded: no freshness or expiry headers are honoured
//! - Objects over the per-object maximum are never stored
//! - One reader-writer lock for the whole cache; eviction scans all entries

pub mod store;

pub use store::{CacheError, CacheUpdate, ObjectCache};
