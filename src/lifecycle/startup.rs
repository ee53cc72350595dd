//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration, apply command-line overrides
//! - Initialize logging and metrics
//! - Bind the listener and run the server until shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - The listener binds last (traffic only when ready)

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::loader::{self, ConfigError};
use crate::config::validation::{validate_port, ValidationError};
use crate::config::ProxyConfig;
use crate::http::ProxyServer;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals;
use crate::net::listener::{Listener, ListenerError};
use crate::observability::{logging, metrics};

/// Values taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct StartupOptions {
    pub config_path: Option<PathBuf>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid port: {0}")]
    Port(#[from] ValidationError),
    #[error("listener: {0}")]
    Listener(#[from] ListenerError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Load the configuration and apply the command-line overrides.
pub fn prepare_config(options: &StartupOptions) -> Result<ProxyConfig, StartupError> {
    let mut config = loader::load_or_default(options.config_path.as_deref())?;

    if let Some(port) = options.port {
        let port = validate_port(port)?;
        let mut addr: SocketAddr = config.listener.bind_address.parse().map_err(|e| {
            StartupError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;
        addr.set_port(port);
        config.listener.bind_address = addr.to_string();
    }
    if let Some(level) = &options.log_level {
        config.observability.log_level = level.clone();
    }
    Ok(config)
}

/// Run the proxy until a shutdown signal arrives.
pub async fn run(options: StartupOptions) -> Result<(), StartupError> {
    let config = prepare_config(&options)?;

    if let Err(e) = logging::init(&config.observability.log_level) {
        eprintln!("logging already initialized: {e}");
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "forward-cache-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        start_workers = config.workers.start_workers,
        cache_capacity = config.cache.capacity_bytes,
        max_object = config.cache.max_object_bytes,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = Listener::bind(&config.listener).await?;

    let shutdown = Arc::new(Shutdown::new());
    let signals = signals::spawn_signal_listener(Arc::clone(&shutdown));

    let server = ProxyServer::new(config);
    server.run(listener, shutdown.subscribe()).await?;

    signals.abort();
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_overrides_bind_address() {
        let options = StartupOptions {
            port: Some(15214),
            log_level: Some("debug".into()),
            ..Default::default()
        };
        let config = prepare_config(&options).unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:15214");
        assert_eq!(config.observability.log_level, "debug");
    }

    #[test]
    fn out_of_range_port_is_rejected() {
        for port in [80, 1000, 64000, 65000] {
            let options = StartupOptions {
                port: Some(port),
                ..Default::default()
            };
            assert!(matches!(prepare_config(&options), Err(StartupError::Port(_))), "port {port}");
        }
    }
}
