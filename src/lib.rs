//! Forward HTTP caching proxy library.

// Core subsystems
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod http;
pub mod net;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use cache::ObjectCache;
pub use config::schema::ProxyConfig;
pub use http::{ProxyContext, ProxyServer};
pub use lifecycle::Shutdown;
