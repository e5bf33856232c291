//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! acceptors, sessions, worker pool:
//!     → logging.rs (structured log events, per-connection spans)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (fmt layer)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Connection id flows through every event of a session via its span
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
