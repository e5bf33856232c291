//! Connection lifecycle tracking and the per-connection read cursor.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Track live sessions so shutdown can wait for them to drain
//! - Own the socket plus the unread bytes carried across keep-alive iterations
//! - Apply the phase-dependent read timeout to every socket read, and bound writes

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;

use crate::protocol::{Protocol, ProtocolError};

/// Global atomic counter for connection IDs.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Longest request line or header line accepted.
pub const MAX_LINE_LENGTH: usize = 16 * 1024;

const READ_CHUNK: usize = 4096;

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Tracks live sessions for graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
    drained: Arc<Notify>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new live session. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            drained: Arc::clone(&self.drained),
            id: ConnectionId::new(),
        }
    }

    /// Current count of live sessions.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until every tracked session has ended, or `deadline` passes.
    ///
    /// Returns `true` if the tracker drained in time.
    pub async fn wait_for_drain(&self, deadline: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.drained.notified();
                if self.active_count() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(deadline, wait).await.is_ok()
    }
}

/// Guard that tracks a session's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    drained: Arc<Notify>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.active_count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

/// Read timeouts for the two phases of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadTimeouts {
    /// Applies while waiting for the first request, while reading any
    /// request once its first byte has arrived, and to every write.
    pub first_request: Duration,
    /// Applies while idling between requests on a reused connection.
    pub keep_alive: Duration,
}

impl Default for ReadTimeouts {
    fn default() -> Self {
        Self {
            first_request: Duration::from_secs(60),
            keep_alive: Duration::from_secs(5),
        }
    }
}

/// An accepted socket plus its decoder cursor.
///
/// Bytes read past the end of one request stay in `buf` and are consumed by
/// the next iteration of the keep-alive loop.
#[derive(Debug)]
pub struct Connection<S> {
    id: ConnectionId,
    stream: S,
    buf: BytesMut,
    protocol: Protocol,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    timeouts: ReadTimeouts,
    read_timeout: Duration,
    requests_served: u64,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an accepted stream.
    pub fn new(
        id: ConnectionId,
        stream: S,
        protocol: Protocol,
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
        timeouts: ReadTimeouts,
    ) -> Self {
        Self {
            id,
            stream,
            buf: BytesMut::with_capacity(READ_CHUNK),
            protocol,
            peer_addr,
            local_addr,
            timeouts,
            read_timeout: timeouts.first_request,
            requests_served: 0,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of requests completed on this connection.
    pub fn requests_served(&self) -> u64 {
        self.requests_served
    }

    /// True while no request has completed yet.
    pub fn is_first_request(&self) -> bool {
        self.requests_served == 0
    }

    pub(crate) fn request_completed(&mut self) {
        self.requests_served += 1;
    }

    /// Arm the timeout for the idle wait before the next request.
    pub(crate) fn enter_idle_phase(&mut self) {
        self.read_timeout = if self.is_first_request() {
            self.timeouts.first_request
        } else {
            self.timeouts.keep_alive
        };
    }

    /// Arm the timeout used while a request is being read.
    pub(crate) fn enter_request_phase(&mut self) {
        self.read_timeout = self.timeouts.first_request;
    }

    /// Read more bytes into the cursor. Returns 0 at EOF.
    async fn fill(&mut self) -> Result<usize, ProtocolError> {
        self.buf.reserve(READ_CHUNK);
        match tokio::time::timeout(self.read_timeout, self.stream.read_buf(&mut self.buf)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ProtocolError::Timeout),
        }
    }

    /// Wait until at least one unread byte is available.
    ///
    /// Returns `false` if the peer closed the connection first.
    pub async fn await_data(&mut self) -> Result<bool, ProtocolError> {
        if !self.buf.is_empty() {
            return Ok(true);
        }
        Ok(self.fill().await? > 0)
    }

    /// Read one CRLF- (or LF-) terminated line, without the terminator.
    ///
    /// Returns `None` if the stream ends before any byte of the line.
    /// Bytes are mapped one-to-one onto chars (ISO-8859-1).
    pub async fn read_line(&mut self) -> Result<Option<String>, ProtocolError> {
        let mut scanned = 0;
        loop {
            if let Some(pos) = self.buf[scanned..].iter().position(|&b| b == b'\n') {
                if scanned + pos > MAX_LINE_LENGTH {
                    return Err(ProtocolError::LineTooLong(MAX_LINE_LENGTH));
                }
                let line = self.buf.split_to(scanned + pos + 1);
                let mut end = line.len() - 1;
                if end > 0 && line[end - 1] == b'\r' {
                    end -= 1;
                }
                return Ok(Some(line[..end].iter().map(|&b| b as char).collect()));
            }
            scanned = self.buf.len();
            if scanned > MAX_LINE_LENGTH {
                return Err(ProtocolError::LineTooLong(MAX_LINE_LENGTH));
            }
            if self.fill().await? == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(ProtocolError::Truncated("line"));
            }
        }
    }

    /// Read exactly `n` bytes.
    pub async fn read_exact(&mut self, n: usize, what: &'static str) -> Result<Bytes, ProtocolError> {
        while self.buf.len() < n {
            if self.fill().await? == 0 {
                return Err(if self.buf.is_empty() {
                    ProtocolError::Closed
                } else {
                    ProtocolError::Truncated(what)
                });
            }
        }
        Ok(self.buf.split_to(n).freeze())
    }

    /// Read between 1 and `max` bytes; an empty result means EOF.
    pub async fn read_some(&mut self, max: usize) -> Result<Bytes, ProtocolError> {
        if max == 0 {
            return Ok(Bytes::new());
        }
        if self.buf.is_empty() && self.fill().await? == 0 {
            return Ok(Bytes::new());
        }
        let n = max.min(self.buf.len());
        Ok(self.buf.split_to(n).freeze())
    }

    /// Write and flush `data`.
    ///
    /// A peer that stops reading fails the write after the first-request
    /// timeout.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        let write = async {
            self.stream.write_all(data).await?;
            self.stream.flush().await
        };
        match tokio::time::timeout(self.timeouts.first_request, write).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ProtocolError::Timeout),
        }
    }

    /// Flush and close the write side.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            tracing::trace!(connection_id = %self.id, error = %e, "Socket shutdown failed");
        }
    }
}
