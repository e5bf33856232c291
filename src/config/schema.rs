//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the connector.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::connection::ReadTimeouts;
use crate::protocol::Protocol;

/// Root configuration for the connector.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Plain HTTP listener (enabled on 8080 by default).
    pub http: ListenerConfig,

    /// HTTPS listener (disabled unless configured).
    pub https: ListenerConfig,

    /// AJP13 listener (enabled on 8009 by default).
    pub ajp13: ListenerConfig,

    /// Worker and object pool sizing.
    pub pool: PoolConfig,

    /// Read timeouts and shutdown grace period.
    pub timeouts: TimeoutConfig,

    /// Report the front end's remote host name for AJP13 requests instead
    /// of the remote address.
    pub hostname_lookups: bool,

    /// Response pipeline settings.
    pub response: ResponseConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            http: ListenerConfig::default(),
            https: ListenerConfig {
                enabled: false,
                ..ListenerConfig::default()
            },
            ajp13: ListenerConfig::default(),
            pool: PoolConfig::default(),
            timeouts: TimeoutConfig::default(),
            hostname_lookups: false,
            response: ResponseConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl ConnectorConfig {
    /// Listener settings for `protocol`.
    pub fn listener(&self, protocol: Protocol) -> &ListenerConfig {
        match protocol {
            Protocol::Http => &self.http,
            Protocol::Https => &self.https,
            Protocol::Ajp13 => &self.ajp13,
        }
    }

    pub fn listener_mut(&mut self, protocol: Protocol) -> &mut ListenerConfig {
        match protocol {
            Protocol::Http => &mut self.http,
            Protocol::Https => &mut self.https,
            Protocol::Ajp13 => &mut self.ajp13,
        }
    }

    /// Protocols whose listener is enabled, in bind order.
    pub fn enabled_protocols(&self) -> Vec<Protocol> {
        [Protocol::Http, Protocol::Https, Protocol::Ajp13]
            .into_iter()
            .filter(|p| self.listener(*p).enabled)
            .collect()
    }
}

/// One protocol listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub enabled: bool,

    /// Interface to bind (e.g., "0.0.0.0").
    pub bind_address: String,

    /// Listen port; the protocol's default port when unset. `0` picks an
    /// ephemeral port.
    pub port: Option<u16>,

    /// Certificate material (HTTPS only).
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0".to_string(),
            port: None,
            tls: None,
        }
    }
}

impl ListenerConfig {
    /// `address:port` to bind for `protocol`.
    pub fn socket_address(&self, protocol: Protocol) -> String {
        let port = self.port.unwrap_or_else(|| protocol.default_port());
        if self.bind_address.contains(':') {
            format!("[{}]:{}", self.bind_address, port)
        } else {
            format!("{}:{}", self.bind_address, port)
        }
    }
}

/// TLS configuration for the HTTPS listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Dispatch pool sizing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Workers spawned and parked at startup.
    pub startup_workers: usize,

    /// Hard cap on concurrent workers; further connections are rejected.
    pub max_workers: usize,

    /// Parked workers kept for reuse; extra ones exit.
    pub max_idle_workers: usize,

    /// Recycled `Request` objects kept for reuse.
    pub max_idle_requests: usize,

    /// Recycled `Response` objects kept for reuse.
    pub max_idle_responses: usize,

    /// Parameter values accepted per request.
    pub max_parameters: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            startup_workers: 4,
            max_workers: 200,
            max_idle_workers: 20,
            max_idle_requests: 64,
            max_idle_responses: 64,
            max_parameters: 10_000,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Wait for the first request on a new connection, and for the rest of
    /// any request once it started, in milliseconds.
    pub first_request_ms: u64,

    /// Idle wait between requests on a reused connection, in milliseconds.
    pub keep_alive_ms: u64,

    /// How long shutdown waits for live sessions, in milliseconds.
    pub shutdown_grace_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            first_request_ms: 60_000,
            keep_alive_ms: 5_000,
            shutdown_grace_ms: 10_000,
        }
    }
}

impl TimeoutConfig {
    pub fn read_timeouts(&self) -> ReadTimeouts {
        ReadTimeouts {
            first_request: Duration::from_millis(self.first_request_ms),
            keep_alive: Duration::from_millis(self.keep_alive_ms),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Response pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResponseConfig {
    /// Body buffer capacity per response, in bytes.
    pub buffer_size: usize,

    /// Charset used in the default `Content-Type`.
    pub default_encoding: String,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            buffer_size: crate::response::DEFAULT_BUFFER_SIZE,
            default_encoding: "UTF-8".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
