//! Per-protocol TCP acceptors.
//!
//! # Responsibilities
//! - Bind to the configured address of one protocol
//! - Accept incoming TCP connections
//! - Carry the TLS acceptor for the HTTPS listener
//!
//! Admission control lives in the dispatch pool, not here: the accept loop
//! never waits for capacity, it hands each socket to the pool or drops it.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use crate::config::ListenerConfig;
use crate::protocol::Protocol;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind to address.
    Bind(std::io::Error),
    /// Failed to accept connection.
    Accept(std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
            ListenerError::Accept(e) => write!(f, "Failed to accept: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {}

/// A bound listener for one protocol.
pub struct Acceptor {
    protocol: Protocol,
    inner: TcpListener,
    local_addr: SocketAddr,
    tls: Option<TlsAcceptor>,
}

impl std::fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acceptor")
            .field("protocol", &self.protocol)
            .field("local_addr", &self.local_addr)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

impl Acceptor {
    /// Bind `protocol`'s listener as configured.
    pub async fn bind(protocol: Protocol, config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config
            .socket_address(protocol)
            .parse()
            .map_err(|e| ListenerError::Bind(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;

        let listener = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            protocol = %protocol,
            address = %local_addr,
            "Listener bound"
        );

        Ok(Self {
            protocol,
            inner: listener,
            local_addr,
            tls: None,
        })
    }

    /// Attach the handshake acceptor used for every accepted socket.
    pub fn with_tls(mut self, tls: TlsAcceptor) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Accept a new connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), ListenerError> {
        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::trace!(peer_addr = %addr, error = %e, "Failed to set TCP_NODELAY");
        }
        tracing::debug!(protocol = %self.protocol, peer_addr = %addr, "Connection accepted");
        Ok((stream, addr))
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn tls(&self) -> Option<&TlsAcceptor> {
        self.tls.as_ref()
    }
}
