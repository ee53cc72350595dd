//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ports, worker band, cache limits)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;

/// Lowest and highest accepted listening ports (both exclusive).
pub const PORT_RANGE: (u16, u16) = (1000, 64000);

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check a listening port against [`PORT_RANGE`].
pub fn validate_port(port: u16) -> Result<u16, ValidationError> {
    let (low, high) = PORT_RANGE;
    if port > low && port < high {
        Ok(port)
    } else {
        Err(ValidationError::new(
            "listener.port",
            format!("port {port} outside ({low}, {high})"),
        ))
    }
}

/// Validate the whole configuration, collecting every problem.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match config.listener.bind_address.parse::<SocketAddr>() {
        Ok(addr) => {
            if let Err(e) = validate_port(addr.port()) {
                errors.push(e);
            }
        }
        Err(e) => errors.push(ValidationError::new(
            "listener.bind_address",
            format!("{:?} is not a socket address: {e}", config.listener.bind_address),
        )),
    }

    let workers = &config.workers;
    if workers.max_workers == 0 {
        errors.push(ValidationError::new("workers.max_workers", "must be at least 1"));
    }
    if workers.start_workers > workers.max_workers {
        errors.push(ValidationError::new(
            "workers.start_workers",
            format!("{} exceeds max_workers {}", workers.start_workers, workers.max_workers),
        ));
    }
    if workers.min_spare > workers.max_spare {
        errors.push(ValidationError::new(
            "workers.min_spare",
            format!("{} exceeds max_spare {}", workers.min_spare, workers.max_spare),
        ));
    }
    if workers.start_workers == 0 && workers.min_spare == 0 {
        errors.push(ValidationError::new(
            "workers.min_spare",
            "must be positive when start_workers is 0",
        ));
    }
    if workers.max_spare == 0 {
        errors.push(ValidationError::new("workers.max_spare", "must be at least 1"));
    }
    if workers.queue_depth == 0 {
        errors.push(ValidationError::new("workers.queue_depth", "must be at least 1"));
    }
    if workers.supervisor_interval_ms == 0 {
        errors.push(ValidationError::new("workers.supervisor_interval_ms", "must be positive"));
    }

    let cache = &config.cache;
    if cache.max_object_bytes > cache.capacity_bytes {
        errors.push(ValidationError::new(
            "cache.max_object_bytes",
            format!("{} exceeds capacity_bytes {}", cache.max_object_bytes, cache.capacity_bytes),
        ));
    }

    let http = &config.http;
    for (field, value) in [
        ("http.max_line_length", http.max_line_length),
        ("http.segment_length", http.segment_length),
        ("http.read_chunk_size", http.read_chunk_size),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be positive"));
        }
    }
    if http.segment_length > http.max_line_length {
        errors.push(ValidationError::new(
            "http.segment_length",
            format!("{} exceeds max_line_length {}", http.segment_length, http.max_line_length),
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("{:?} is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&ProxyConfig::default()), Ok(()));
    }

    #[test]
    fn port_bounds_are_exclusive() {
        assert!(validate_port(1000).is_err());
        assert!(validate_port(1001).is_ok());
        assert!(validate_port(63999).is_ok());
        assert!(validate_port(64000).is_err());
    }

    #[test]
    fn reports_every_problem() {
        let mut config = ProxyConfig::default();
        config.listener.bind_address = "127.0.0.1:80".into();
        config.workers.min_spare = 10;
        config.workers.max_spare = 2;
        config.cache.max_object_bytes = config.cache.capacity_bytes + 1;
        config.http.segment_length = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "listener.port",
                "workers.min_spare",
                "cache.max_object_bytes",
                "http.segment_length",
            ]
        );
    }
}
