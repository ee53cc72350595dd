//! Reverse name lookup for client addresses.

use std::net::IpAddr;
use std::time::Duration;

use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::{AsyncResolver, TokioAsyncResolver};

/// Placeholder used when a peer has no resolvable name.
pub const UNKNOWN_PEER: &str = "[unknown]";

/// Resolves peer addresses to host names.
#[derive(Clone)]
pub struct PeerResolver {
    resolver: TokioAsyncResolver,
}

impl PeerResolver {
    /// Build from the system resolver configuration, falling back to the
    /// library defaults when none is available.
    pub fn from_system() -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "System resolver config unavailable, using defaults");
            let mut opts = ResolverOpts::default();
            opts.timeout = Duration::from_secs(2);
            AsyncResolver::tokio(ResolverConfig::default(), opts)
        });
        Self { resolver }
    }

    /// First PTR name for `ip`, without the trailing dot.
    pub async fn peer_name(&self, ip: IpAddr) -> String {
        match self.resolver.reverse_lookup(ip).await {
            Ok(names) => names
                .iter()
                .next()
                .map(|name| trim_root(&name.to_string()).to_string())
                .unwrap_or_else(|| UNKNOWN_PEER.to_string()),
            Err(e) => {
                tracing::debug!(peer_ip = %ip, error = %e, "Reverse lookup failed");
                UNKNOWN_PEER.to_string()
            }
        }
    }
}

impl std::fmt::Debug for PeerResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerResolver").finish_non_exhaustive()
    }
}

fn trim_root(name: &str) -> &str {
    name.strip_suffix('.').unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_root_label() {
        assert_eq!(trim_root("localhost."), "localhost");
        assert_eq!(trim_root("example.com"), "example.com");
    }
}
