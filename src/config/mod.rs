//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)              bootstrap properties (key → value)
//!     → loader.rs (parse)             → loader.rs (overlay onto defaults)
//!                 ↘                  ↙
//!              validation.rs (semantic checks)
//!                 → ConnectorConfig (validated, immutable)
//!                 → shared via Arc with the server and dispatch pool
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::ConnectorConfig;
pub use schema::ListenerConfig;
pub use schema::PoolConfig;
pub use schema::TlsConfig;
