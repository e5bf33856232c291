//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (pool sizes, timeouts > 0, buffer size)
//! - Check listener addresses parse and do not collide
//! - Require certificate material for an enabled HTTPS listener
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ConnectorConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::ConnectorConfig;
use crate::protocol::Protocol;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check `config` for semantic errors.
pub fn validate_config(config: &ConnectorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let enabled = config.enabled_protocols();
    if enabled.is_empty() {
        errors.push(ValidationError::new("listeners", "at least one listener must be enabled"));
    }

    let mut bound = HashSet::new();
    for protocol in enabled {
        let listener = config.listener(protocol);
        let address = listener.socket_address(protocol);
        match address.parse::<SocketAddr>() {
            Ok(addr) if addr.port() != 0 && !bound.insert(addr) => {
                errors.push(ValidationError::new(
                    format!("{}.port", protocol),
                    format!("{} is already used by another listener", addr),
                ));
            }
            Ok(_) => {}
            Err(_) => errors.push(ValidationError::new(
                format!("{}.bind_address", protocol),
                format!("{:?} is not an IP address", listener.bind_address),
            )),
        }
        if protocol == Protocol::Https && listener.tls.is_none() {
            errors.push(ValidationError::new("https.tls", "HTTPS listener requires cert_path and key_path"));
        }
    }

    let pool = &config.pool;
    if pool.max_workers == 0 {
        errors.push(ValidationError::new("pool.max_workers", "must be greater than 0"));
    }
    if pool.startup_workers > pool.max_workers {
        errors.push(ValidationError::new("pool.startup_workers", "must not exceed pool.max_workers"));
    }
    if pool.max_idle_workers > pool.max_workers {
        errors.push(ValidationError::new("pool.max_idle_workers", "must not exceed pool.max_workers"));
    }
    if pool.max_parameters == 0 {
        errors.push(ValidationError::new("pool.max_parameters", "must be greater than 0"));
    }

    if config.timeouts.first_request_ms == 0 {
        errors.push(ValidationError::new("timeouts.first_request_ms", "must be greater than 0"));
    }
    if config.timeouts.keep_alive_ms == 0 {
        errors.push(ValidationError::new("timeouts.keep_alive_ms", "must be greater than 0"));
    }

    if config.response.buffer_size == 0 {
        errors.push(ValidationError::new("response.buffer_size", "must be greater than 0"));
    }

    let obs = &config.observability;
    if !LOG_LEVELS.contains(&obs.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("{:?} is not one of {}", obs.log_level, LOG_LEVELS.join(", ")),
        ));
    }
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("{:?} is not a socket address", obs.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
