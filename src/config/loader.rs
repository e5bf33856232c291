//! Configuration loading from disk or from a string-keyed property map.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::config::schema::{ConnectorConfig, TlsConfig};
use crate::config::validation::{validate_config, ValidationError};
use crate::protocol::Protocol;

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Property { key: String, value: String },
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Property { key, value } => write!(f, "Invalid value {:?} for property {}", value, key),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ConnectorConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<ConnectorConfig, ConfigError> {
    let config: ConnectorConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Property {
        key: key.to_string(),
        value: value.to_string(),
    })
}

impl ConnectorConfig {
    /// Build a validated configuration from bootstrap properties.
    ///
    /// Keys are dotted paths such as `http.port` or `pool.max_workers`.
    /// A listener port of `-1` disables that listener. Unknown keys are
    /// logged and ignored.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = ConnectorConfig::default();
        let mut keys: Vec<&String> = props.keys().collect();
        keys.sort();

        for key in keys {
            let value = &props[key];
            config.apply_property(key, value)?;
        }

        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }

    fn apply_property(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        if let Some((section, field)) = key.split_once('.') {
            let protocol = match section {
                "http" => Some(Protocol::Http),
                "https" => Some(Protocol::Https),
                "ajp13" => Some(Protocol::Ajp13),
                _ => None,
            };
            if let Some(protocol) = protocol {
                return self.apply_listener_property(protocol, key, field, value);
            }
        }

        match key {
            "hostname_lookups" => self.hostname_lookups = parse(key, value)?,
            "pool.startup_workers" => self.pool.startup_workers = parse(key, value)?,
            "pool.max_workers" => self.pool.max_workers = parse(key, value)?,
            "pool.max_idle_workers" => self.pool.max_idle_workers = parse(key, value)?,
            "pool.max_idle_requests" => self.pool.max_idle_requests = parse(key, value)?,
            "pool.max_idle_responses" => self.pool.max_idle_responses = parse(key, value)?,
            "pool.max_parameters" => self.pool.max_parameters = parse(key, value)?,
            "timeouts.first_request_ms" => self.timeouts.first_request_ms = parse(key, value)?,
            "timeouts.keep_alive_ms" => self.timeouts.keep_alive_ms = parse(key, value)?,
            "timeouts.shutdown_grace_ms" => self.timeouts.shutdown_grace_ms = parse(key, value)?,
            "response.buffer_size" => self.response.buffer_size = parse(key, value)?,
            "response.default_encoding" => self.response.default_encoding = value.trim().to_string(),
            "observability.log_level" => self.observability.log_level = value.trim().to_string(),
            "observability.metrics_enabled" => self.observability.metrics_enabled = parse(key, value)?,
            "observability.metrics_address" => self.observability.metrics_address = value.trim().to_string(),
            _ => tracing::warn!(key = %key, "Ignoring unknown configuration property"),
        }
        Ok(())
    }

    fn apply_listener_property(
        &mut self,
        protocol: Protocol,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let listener = self.listener_mut(protocol);
        match field {
            "port" => {
                let port: i32 = parse(key, value)?;
                if port == -1 {
                    listener.enabled = false;
                } else {
                    listener.port = Some(u16::try_from(port).map_err(|_| ConfigError::Property {
                        key: key.to_string(),
                        value: value.to_string(),
                    })?);
                    listener.enabled = true;
                }
            }
            "enabled" => listener.enabled = parse(key, value)?,
            "bind_address" => listener.bind_address = value.trim().to_string(),
            "cert_path" | "key_path" => {
                let tls = listener.tls.get_or_insert_with(|| TlsConfig {
                    cert_path: String::new(),
                    key_path: String::new(),
                });
                if field == "cert_path" {
                    tls.cert_path = value.trim().to_string();
                } else {
                    tls.key_path = value.trim().to_string();
                }
            }
            _ => tracing::warn!(key = %key, "Ignoring unknown configuration property"),
        }
        Ok(())
    }
}
