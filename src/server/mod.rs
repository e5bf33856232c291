//! Connector assembly: acceptors, dispatch pool and sessions.
//!
//! # Responsibilities
//! - Bind one acceptor per enabled protocol
//! - Hand every accepted socket to the dispatch pool as a connection job
//! - Perform the TLS handshake for HTTPS inside the worker
//! - Stop accepting on shutdown and drain live sessions within the grace period

pub mod router;
pub mod session;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::Instrument;

use crate::config::validation::validate_config;
use crate::config::{ConfigError, ConnectorConfig};
use crate::lifecycle::Shutdown;
use crate::net::connection::{Connection, ConnectionTracker, ReadTimeouts};
use crate::net::listener::{Acceptor, ListenerError};
use crate::net::tls;
use crate::observability::metrics;
use crate::pool::{DispatchPool, Job};
use crate::protocol::Protocol;

pub use router::{EchoRouter, Router, RouterError};
pub use session::{Session, SessionShared, SessionState};

/// Pause after a failed accept, so a persistent error (EMFILE) doesn't spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("listener error: {0}")]
    Listener(#[from] ListenerError),

    #[error("TLS setup failed: {0}")]
    Tls(#[source] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// An unbound connector.
pub struct Server<R> {
    config: ConnectorConfig,
    router: Arc<R>,
}

impl<R: Router> Server<R> {
    pub fn new(config: ConnectorConfig, router: R) -> Self {
        Self {
            config,
            router: Arc::new(router),
        }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Validate the configuration and bind every enabled listener.
    pub async fn bind(self) -> Result<BoundServer<R>, ServerError> {
        validate_config(&self.config).map_err(ConfigError::Validation)?;

        let mut acceptors = Vec::new();
        for protocol in self.config.enabled_protocols() {
            let listener = self.config.listener(protocol);
            let acceptor = Acceptor::bind(protocol, listener).await?;
            let acceptor = match (protocol, &listener.tls) {
                (Protocol::Https, Some(tls_config)) => {
                    acceptor.with_tls(tls::acceptor_for(tls_config).await.map_err(ServerError::Tls)?)
                }
                (Protocol::Https, None) => {
                    return Err(ServerError::Tls(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "https listener has no certificate configured",
                    )));
                }
                _ => acceptor,
            };
            acceptors.push(acceptor);
        }

        let pool = Arc::new(DispatchPool::new(&self.config.pool, &self.config.response));
        let shared = Arc::new(SessionShared::new(pool, self.router, self.config.hostname_lookups));

        Ok(BoundServer {
            acceptors,
            shared,
            tracker: ConnectionTracker::new(),
            timeouts: self.config.timeouts.read_timeouts(),
            grace: self.config.timeouts.shutdown_grace(),
        })
    }
}

/// A connector whose listeners are bound and ready to accept.
pub struct BoundServer<R> {
    acceptors: Vec<Acceptor>,
    shared: Arc<SessionShared<R>>,
    tracker: ConnectionTracker,
    timeouts: ReadTimeouts,
    grace: Duration,
}

impl<R: Router> BoundServer<R> {
    /// Actual address of `protocol`'s listener, if it is enabled.
    pub fn local_addr(&self, protocol: Protocol) -> Option<SocketAddr> {
        self.acceptors
            .iter()
            .find(|a| a.protocol() == protocol)
            .map(Acceptor::local_addr)
    }

    pub fn pool(&self) -> Arc<DispatchPool> {
        Arc::clone(&self.shared.pool)
    }

    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Accept and serve until `shutdown` fires, then drain.
    pub async fn run(self, shutdown: Shutdown) {
        let BoundServer {
            acceptors,
            shared,
            tracker,
            timeouts,
            grace,
        } = self;

        shared.pool.start();
        tracing::info!(listeners = acceptors.len(), "Connector started");

        let mut accept_loops = JoinSet::new();
        for acceptor in acceptors {
            let ctx = AcceptContext {
                shared: Arc::clone(&shared),
                tracker: tracker.clone(),
                timeouts,
            };
            accept_loops.spawn(accept_loop(acceptor, ctx, shutdown.clone()));
        }

        shutdown.wait().await;
        tracing::info!("Shutdown signal received, closing listeners");
        while accept_loops.join_next().await.is_some() {}

        shared.start_draining();
        shared.pool.shutdown();

        let active = tracker.active_count();
        if active > 0 {
            tracing::info!(active, grace_ms = grace.as_millis() as u64, "Waiting for connections to drain");
        }
        if tracker.wait_for_drain(grace).await {
            tracing::info!("All connections drained");
        } else {
            tracing::warn!(
                remaining = tracker.active_count(),
                "Shutdown grace period elapsed with connections still open"
            );
        }
    }
}

struct AcceptContext<R> {
    shared: Arc<SessionShared<R>>,
    tracker: ConnectionTracker,
    timeouts: ReadTimeouts,
}

async fn accept_loop<R: Router>(acceptor: Acceptor, ctx: AcceptContext<R>, shutdown: Shutdown) {
    let protocol = acceptor.protocol();
    loop {
        let accepted = tokio::select! {
            _ = shutdown.wait() => break,
            accepted = acceptor.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!(protocol = %protocol, error = %e, "Accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        metrics::record_connection(protocol);

        let local = stream.local_addr().unwrap_or_else(|_| acceptor.local_addr());
        let job = connection_job(&ctx, protocol, acceptor.tls().cloned(), stream, peer, local);
        if let Err(e) = ctx.shared.pool.submit(job) {
            // The rejected job owns the socket; dropping it closes the connection.
            tracing::warn!(protocol = %protocol, peer_addr = %peer, error = %e, "Connection rejected");
            metrics::record_rejection(protocol);
        }
    }
    tracing::debug!(protocol = %protocol, "Accept loop stopped");
}

fn connection_job<R: Router>(
    ctx: &AcceptContext<R>,
    protocol: Protocol,
    tls: Option<TlsAcceptor>,
    stream: TcpStream,
    peer: SocketAddr,
    local: SocketAddr,
) -> Job {
    let guard = ctx.tracker.track();
    let id = guard.id();
    let shared = Arc::clone(&ctx.shared);
    let timeouts = ctx.timeouts;
    let span = tracing::info_span!("connection", id = %id, protocol = %protocol, peer = %peer);

    Box::pin(
        async move {
            let _guard = guard;
            match tls {
                None => {
                    let conn = Connection::new(id, stream, protocol, peer, local, timeouts);
                    Session::new(conn, shared).run().await;
                }
                Some(tls) => match tokio::time::timeout(timeouts.first_request, tls.accept(stream)).await {
                    Ok(Ok(stream)) => {
                        let conn = Connection::new(id, stream, protocol, peer, local, timeouts);
                        Session::new(conn, shared).run().await;
                    }
                    Ok(Err(e)) => tracing::debug!(error = %e, "TLS handshake failed"),
                    Err(_) => tracing::warn!("TLS handshake timed out"),
                },
            }
        }
        .instrument(span),
    )
}
