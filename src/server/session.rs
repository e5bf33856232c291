//! The per-connection keep-alive loop.
//!
//! # State Machine
//! ```text
//! AwaitingHeaders ──first byte──▶ Allocated ──decoded──▶ Parsed ──▶ Dispatched
//!        ▲                                                              │
//!        └──────────── keep-alive ◀──── Finalized ◀── router returned ──┘
//!                                           │
//!                                           └── close ──▶ Closed
//! ```
//!
//! # Design Decisions
//! - The session owns the connection for its whole life; router body reads
//!   and committed response bytes arrive over channels and are served
//!   between polls of the router future
//! - Request and Response go back to the pool on every path once acquired
//! - An idle timeout on a reused connection is a normal close, not an error

use std::io;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::lifecycle::Shutdown;
use crate::net::connection::Connection;
use crate::observability::metrics;
use crate::pool::DispatchPool;
use crate::protocol::{ajp13, http, Protocol, ProtocolError};
use crate::request::{BodyDemand, Request, MAX_BODY_READ};
use crate::response::{ExchangeContext, Framing, Response, WireChunk};
use crate::server::router::{Router, RouterError};

/// Where a session is in its request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingHeaders,
    Allocated,
    Parsed,
    Dispatched,
    Finalized,
    Closed,
}

/// State shared by every session of one server.
#[derive(Debug)]
pub struct SessionShared<R> {
    pub pool: Arc<DispatchPool>,
    pub router: Arc<R>,
    pub hostname_lookups: bool,
    draining: Shutdown,
}

impl<R> SessionShared<R> {
    pub fn new(pool: Arc<DispatchPool>, router: Arc<R>, hostname_lookups: bool) -> Self {
        Self {
            pool,
            router,
            hostname_lookups,
            draining: Shutdown::new(),
        }
    }

    /// Ask sessions to close once their current request is done.
    pub fn start_draining(&self) {
        self.draining.trigger();
    }

    pub fn is_draining(&self) -> bool {
        self.draining.is_triggered()
    }
}

/// Entity-body cursor for the request in flight.
#[derive(Debug)]
enum BodyReader {
    /// Length-delimited, or EOF-terminated when no length was declared.
    Http { remaining: Option<u64> },
    /// Pulled chunk by chunk; `None` reads until the front end sends an empty chunk.
    Ajp13 { remaining: Option<u64> },
    /// A read failed; the connection can't be reused.
    Failed,
}

impl BodyReader {
    fn for_request(protocol: Protocol, req: &Request) -> Self {
        match protocol {
            Protocol::Ajp13 => BodyReader::Ajp13 {
                remaining: req.content_length(),
            },
            Protocol::Http | Protocol::Https if req.protocol() == http::HTTP_09 => BodyReader::Http {
                remaining: Some(0),
            },
            Protocol::Http | Protocol::Https => BodyReader::Http {
                remaining: req.content_length(),
            },
        }
    }

    async fn read<S>(&mut self, conn: &mut Connection<S>, max: usize) -> Result<Bytes, ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let result = match self {
            BodyReader::Failed => return Err(ProtocolError::Truncated("request body")),
            BodyReader::Http { remaining } => match *remaining {
                Some(0) => return Ok(Bytes::new()),
                Some(n) => {
                    let want = max.min(usize::try_from(n).unwrap_or(usize::MAX));
                    match conn.read_some(want).await {
                        Ok(chunk) if chunk.is_empty() => Err(ProtocolError::Truncated("request body")),
                        Ok(chunk) => {
                            *remaining = Some(n - chunk.len() as u64);
                            Ok(chunk)
                        }
                        Err(e) => Err(e),
                    }
                }
                None => conn.read_some(max).await,
            },
            BodyReader::Ajp13 { remaining } => match *remaining {
                Some(0) => return Ok(Bytes::new()),
                Some(n) => {
                    let want = max.min(usize::try_from(n).unwrap_or(usize::MAX));
                    match ajp13::fetch_body_chunk(conn, want).await {
                        Ok(chunk) if chunk.is_empty() => {
                            *remaining = Some(0);
                            Ok(chunk)
                        }
                        Ok(chunk) => {
                            *remaining = Some(n.saturating_sub(chunk.len() as u64));
                            Ok(chunk)
                        }
                        Err(e) => Err(e),
                    }
                }
                None => match ajp13::fetch_body_chunk(conn, max).await {
                    Ok(chunk) if chunk.is_empty() => {
                        *remaining = Some(0);
                        Ok(chunk)
                    }
                    other => other,
                },
            },
        };
        if result.is_err() {
            *self = BodyReader::Failed;
        }
        result
    }

    /// Consume whatever the router left unread of a length-delimited body.
    async fn drain<S>(&mut self, conn: &mut Connection<S>) -> Result<(), ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let unread = match self {
            BodyReader::Http { remaining: Some(n) } => *n,
            BodyReader::Failed => return Err(ProtocolError::Truncated("request body")),
            _ => 0,
        };
        if unread > 0 {
            tracing::debug!(unread, "Draining unread request body");
            while !self.read(conn, MAX_BODY_READ).await?.is_empty() {}
        }
        Ok(())
    }
}

/// One connection's request loop.
pub struct Session<S, R> {
    conn: Connection<S>,
    shared: Arc<SessionShared<R>>,
    state: SessionState,
}

impl<S, R> Session<S, R>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    R: Router,
{
    pub fn new(conn: Connection<S>, shared: Arc<SessionShared<R>>) -> Self {
        Self {
            conn,
            shared,
            state: SessionState::AwaitingHeaders,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Serve requests until the connection closes.
    pub async fn run(mut self) {
        loop {
            self.state = SessionState::AwaitingHeaders;
            if !self.conn.is_first_request() && self.shared.is_draining() {
                tracing::debug!("Closing idle connection for shutdown");
                break;
            }

            self.conn.enter_idle_phase();
            let ready = if self.conn.is_first_request() {
                self.conn.await_data().await
            } else {
                tokio::select! {
                    ready = self.conn.await_data() => ready,
                    _ = self.shared.draining.wait() => {
                        tracing::debug!("Closing idle connection for shutdown");
                        break;
                    }
                }
            };
            match ready {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(requests = self.conn.requests_served(), "Peer closed connection");
                    break;
                }
                Err(ProtocolError::Timeout) if !self.conn.is_first_request() => {
                    tracing::debug!(requests = self.conn.requests_served(), "Keep-alive timeout");
                    break;
                }
                Err(e) => {
                    self.log_failure(&e);
                    break;
                }
            }

            self.conn.enter_request_phase();
            match self.serve_one().await {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    self.log_failure(&e);
                    break;
                }
            }
        }

        self.state = SessionState::Closed;
        self.conn.shutdown().await;
    }

    fn log_failure(&self, err: &ProtocolError) {
        let requests = self.conn.requests_served();
        match err {
            ProtocolError::Timeout if self.conn.is_first_request() => {
                tracing::error!(error = %err, "Timed out waiting for request");
            }
            e if e.is_malformed() => {
                tracing::warn!(error = %e, requests, "Malformed request; closing connection");
            }
            e => tracing::debug!(error = %e, requests, "Connection aborted"),
        }
    }

    /// Run one request through decode, dispatch and finalize.
    ///
    /// Returns whether the connection stays open.
    async fn serve_one(&mut self) -> Result<bool, ProtocolError> {
        let started = Instant::now();
        let pool = Arc::clone(&self.shared.pool);
        let mut req = pool.acquire_request();
        let mut resp = pool.acquire_response();
        self.state = SessionState::Allocated;

        let result = self.exchange(&mut req, &mut resp).await;
        if self.state == SessionState::Finalized {
            metrics::record_request(self.conn.protocol(), resp.status(), started);
        }

        pool.release_request(req);
        pool.release_response(resp);
        result
    }

    async fn exchange(&mut self, req: &mut Request, resp: &mut Response) -> Result<bool, ProtocolError> {
        let protocol = self.conn.protocol();
        match protocol {
            Protocol::Http | Protocol::Https => http::read_request(&mut self.conn, req).await?,
            Protocol::Ajp13 => ajp13::read_request(&mut self.conn, req, self.shared.hostname_lookups).await?,
        }
        self.state = SessionState::Parsed;
        tracing::debug!(method = %req.method(), uri = %req.uri(), protocol = %req.protocol(), "Request decoded");

        resp.begin(ExchangeContext::from_request(req), Framing::for_request(protocol, req.protocol()));
        let mut body = BodyReader::for_request(protocol, req);

        self.state = SessionState::Dispatched;
        let outcome = self.dispatch(req, resp, &mut body).await?;
        self.state = SessionState::Finalized;

        if let Err(e) = outcome {
            tracing::warn!(error = %e, status = resp.status(), "Router failed");
        }
        body.drain(&mut self.conn).await?;
        self.conn.request_completed();

        let keep_alive = match protocol {
            Protocol::Ajp13 => true,
            Protocol::Http | Protocol::Https => !resp.close_after_request(),
        };
        tracing::debug!(status = resp.status(), keep_alive, "Response sent");
        Ok(keep_alive)
    }

    /// Run the router and finish the response, serving body reads and
    /// response writes on the connection as they are requested.
    ///
    /// The outer error means the response could not be written and the
    /// connection is unusable; the inner one is the router's own result.
    async fn dispatch(
        &mut self,
        req: &mut Request,
        resp: &mut Response,
        body: &mut BodyReader,
    ) -> Result<Result<(), RouterError>, ProtocolError> {
        let (demand_tx, mut demands) = mpsc::channel::<BodyDemand>(1);
        let (wire_tx, mut wire) = mpsc::channel::<WireChunk>(1);
        req.attach_body(demand_tx);
        resp.attach_sink(wire_tx);

        let router = Arc::clone(&self.shared.router);
        let conn = &mut self.conn;
        let mut write_error = None;
        let (outcome, finished) = {
            let execute = async {
                let outcome = router.execute(&mut *req, &mut *resp).await;
                let finished = resp.finish().await;
                (outcome, finished)
            };
            tokio::pin!(execute);
            loop {
                tokio::select! {
                    done = &mut execute => break done,
                    Some(demand) = demands.recv() => {
                        let chunk = body.read(conn, demand.max).await;
                        if let Err(e) = &chunk {
                            tracing::debug!(error = %e, "Request body read failed");
                        }
                        let _ = demand.reply.send(chunk);
                    }
                    Some(chunk) = wire.recv() => {
                        let reply = match conn.write_all(&chunk.bytes).await {
                            Ok(()) => Ok(()),
                            Err(e) => {
                                tracing::debug!(error = %e, "Response write failed");
                                write_error = Some(e);
                                Err(ProtocolError::Io(io::ErrorKind::BrokenPipe.into()))
                            }
                        };
                        let _ = chunk.reply.send(reply);
                    }
                }
            }
        };

        req.detach_body();
        resp.detach_sink();
        if let Some(e) = write_error {
            return Err(e);
        }
        finished?;
        Ok(outcome)
    }
}
