//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, one Acceptor per protocol)
//!     → dispatch pool admits or drops the socket
//!     → tls.rs (TLS handshake, HTTPS only, inside the worker)
//!     → connection.rs (read cursor, phase timeouts, lifecycle tracking)
//!     → Hand off to the connection session
//! ```
//!
//! # Design Decisions
//! - Rejected sockets are dropped at once; nothing is queued
//! - Each connection tracked for graceful shutdown
//! - TLS is handled transparently; sessions are generic over the stream

pub mod connection;
pub mod listener;
pub mod tls;
