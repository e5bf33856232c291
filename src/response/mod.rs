//! Response pipeline.
//!
//! # Data Flow
//! ```text
//! router writes body
//!     → capture stack (include scope active?)   → top capture buffer
//!     → Content-Length gate (excess dropped)
//!     → OutputBuffer (fixed capacity)
//!     → commit: head once (status, headers, cookies) + body framing
//!     → wire queue → WireChunk → session writes it to the socket
//! ```
//!
//! # Design Decisions
//! - The head is materialized exactly once, on the first commit
//! - Status, headers and cookies are frozen while a capture is active and
//!   after commit; such mutations are silently ignored
//! - The keep-alive decision is a pure function of the exchange context and
//!   the outgoing headers, and is written into the `Connection` header
//! - While a session is attached, every commit waits until its bytes are on
//!   the socket, so the wire queue never holds more than one commit

pub mod buffer;

use std::collections::HashSet;
use std::io;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::pool::Recycle;
use crate::protocol::cookie::{Cookie, SESSION_COOKIE_NAME};
use crate::protocol::{ajp13, headers, http, Protocol, ProtocolError};
use crate::request::Request;

pub use buffer::{OutputBuffer, DEFAULT_BUFFER_SIZE};

/// How committed bytes are framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// Status line, header block, raw body.
    #[default]
    Http,
    /// Simple-request mode: body only, no head.
    Http09,
    /// AJP13 header, body-chunk and end packets.
    Ajp13,
}

impl Framing {
    /// Pick the framing for a request decoded on `protocol`.
    pub fn for_request(protocol: Protocol, request_protocol: &str) -> Self {
        match protocol {
            Protocol::Ajp13 => Framing::Ajp13,
            Protocol::Http | Protocol::Https if request_protocol.starts_with("HTTP/0") => Framing::Http09,
            Protocol::Http | Protocol::Https => Framing::Http,
        }
    }
}

/// Committed bytes on their way to the socket; `reply` fires once written.
#[derive(Debug)]
pub(crate) struct WireChunk {
    pub bytes: Bytes,
    pub reply: oneshot::Sender<Result<(), ProtocolError>>,
}

fn session_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "connection session ended")
}

/// The parts of the request the pipeline needs at commit time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExchangeContext {
    /// Request protocol version, e.g. `HTTP/1.0`.
    pub protocol: String,
    /// The request's `Connection` header, if any.
    pub incoming_connection: Option<String>,
    pub head_request: bool,
    pub secure: bool,
    pub requested_session_ids: Vec<String>,
}

impl ExchangeContext {
    pub fn from_request(request: &Request) -> Self {
        Self {
            protocol: request.protocol().to_string(),
            incoming_connection: request.header("Connection").map(str::to_string),
            head_request: request.method().eq_ignore_ascii_case("HEAD"),
            secure: request.is_secure(),
            requested_session_ids: request.requested_session_ids().to_vec(),
        }
    }
}

/// A response under construction.
#[derive(Debug)]
pub struct Response {
    status: u16,
    headers: Vec<String>,
    cookies: Vec<Cookie>,
    encoding: Option<String>,
    default_encoding: String,
    output: OutputBuffer,
    buffer_size: usize,
    framing: Framing,
    context: ExchangeContext,
    created_sessions: Vec<String>,
    live_sessions: Option<HashSet<String>>,
    finished: bool,
    sink: Option<mpsc::Sender<WireChunk>>,
    stream_failed: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE, "UTF-8")
    }
}

impl Recycle for Response {
    fn clean(&mut self) {
        self.status = 200;
        self.headers.clear();
        self.cookies.clear();
        self.encoding = None;
        self.output.clean();
        self.output.set_capacity(self.buffer_size);
        self.framing = Framing::Http;
        self.context = ExchangeContext::default();
        self.created_sessions.clear();
        self.live_sessions = None;
        self.finished = false;
        self.sink = None;
        self.stream_failed = false;
    }
}

impl Response {
    /// Create a response with the given buffer capacity and default charset.
    pub fn new(buffer_size: usize, default_encoding: &str) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            cookies: Vec::new(),
            encoding: None,
            default_encoding: default_encoding.to_string(),
            output: OutputBuffer::new(buffer_size),
            buffer_size,
            framing: Framing::Http,
            context: ExchangeContext::default(),
            created_sessions: Vec::new(),
            live_sessions: None,
            finished: false,
            sink: None,
            stream_failed: false,
        }
    }

    /// Bind this response to the exchange it answers.
    pub fn begin(&mut self, context: ExchangeContext, framing: Framing) {
        self.output.set_discard(context.head_request);
        self.context = context;
        self.framing = framing;
    }

    pub(crate) fn attach_sink(&mut self, sink: mpsc::Sender<WireChunk>) {
        self.sink = Some(sink);
    }

    pub(crate) fn detach_sink(&mut self) {
        self.sink = None;
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn context(&self) -> &ExchangeContext {
        &self.context
    }

    pub fn output(&self) -> &OutputBuffer {
        &self.output
    }

    fn metadata_frozen(&self) -> bool {
        if self.output.capture_depth() > 0 || self.output.is_committed() {
            tracing::trace!(
                committed = self.output.is_committed(),
                captures = self.output.capture_depth(),
                "Ignoring response metadata change"
            );
            return true;
        }
        false
    }

    // --- Metadata ---

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, status: u16) {
        if !self.metadata_frozen() {
            self.status = status;
        }
    }

    /// First value of outgoing header `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        headers::find(&self.headers, name)
    }

    pub fn header_lines(&self) -> &[String] {
        &self.headers
    }

    pub fn contains_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// Replace every value of `name` with `value`.
    pub fn set_header(&mut self, name: &str, value: &str) {
        if self.metadata_frozen() {
            return;
        }
        headers::remove(&mut self.headers, name);
        self.headers.push(headers::join_line(name, value));
        self.header_side_effects(name, value);
    }

    /// Append a value for `name`, keeping existing ones.
    pub fn add_header(&mut self, name: &str, value: &str) {
        if self.metadata_frozen() {
            return;
        }
        self.headers.push(headers::join_line(name, value));
        self.header_side_effects(name, value);
    }

    fn header_side_effects(&mut self, name: &str, value: &str) {
        if name.eq_ignore_ascii_case("Content-Length") {
            self.output.set_content_length(value.trim().parse().ok());
        } else if name.eq_ignore_ascii_case("Content-Type") {
            if let Some((_, charset)) = value.split_once("charset=") {
                self.encoding = Some(charset.trim().trim_matches('"').to_string());
            }
        }
    }

    /// Declare the body length; bytes beyond it are dropped.
    pub fn set_content_length(&mut self, length: u64) {
        self.set_header("Content-Length", &length.to_string());
    }

    /// Outgoing Content-Length, if declared.
    pub fn content_length(&self) -> Option<u64> {
        self.header("Content-Length").and_then(|v| v.parse().ok())
    }

    pub fn set_content_type(&mut self, content_type: &str) {
        self.set_header("Content-Type", content_type);
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    pub fn set_character_encoding(&mut self, encoding: &str) {
        if !self.metadata_frozen() {
            self.encoding = Some(encoding.to_string());
        }
    }

    /// Charset used for the default Content-Type.
    pub fn character_encoding(&self) -> &str {
        self.encoding.as_deref().unwrap_or(&self.default_encoding)
    }

    pub fn add_cookie(&mut self, cookie: Cookie) {
        if !self.metadata_frozen() {
            self.cookies.push(cookie);
        }
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    /// Record a session created while handling this request.
    pub fn note_session_created(&mut self, id: impl Into<String>) {
        self.created_sessions.push(id.into());
    }

    /// Provide the ids of sessions that currently exist.
    ///
    /// Requested ids missing from this set are expired at commit. Without a
    /// call to this method no expiry cookies are produced.
    pub fn set_live_sessions<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.live_sessions = Some(ids.into_iter().map(Into::into).collect());
    }

    /// Change buffer capacity; only before any body byte was written.
    pub fn set_buffer_size(&mut self, size: usize) -> bool {
        self.output.set_capacity(size)
    }

    pub fn is_committed(&self) -> bool {
        self.output.is_committed()
    }

    /// Drop buffered body bytes; fails once committed.
    pub fn reset_buffer(&mut self) -> bool {
        self.output.reset_buffer()
    }

    // --- Body ---

    /// Write body bytes through the capture stack and length gate.
    ///
    /// Each time the buffer fills the bytes are committed, and the call
    /// returns only after the session has written them.
    pub async fn write_body(&mut self, data: &[u8]) -> io::Result<()> {
        if self.output.write_capture(data) || self.output.is_discard() {
            return Ok(());
        }

        let allowed = match self.output.remaining_budget() {
            Some(remaining) => data.len().min(usize::try_from(remaining).unwrap_or(usize::MAX)),
            None => data.len(),
        };
        if allowed < data.len() {
            tracing::trace!(dropped = data.len() - allowed, "Dropping bytes beyond Content-Length");
        }

        let mut rest = &data[..allowed];
        while !rest.is_empty() {
            let n = self.output.buffer_some(rest);
            rest = &rest[n..];
            if self.output.is_full() {
                self.commit(false)?;
                self.send_wire().await?;
            }
        }
        if self.output.budget_reached() {
            self.commit(false)?;
            self.send_wire().await?;
        }
        Ok(())
    }

    pub async fn write_str(&mut self, text: &str) -> io::Result<()> {
        self.write_body(text.as_bytes()).await
    }

    /// Commit the head (if needed) and buffered body, and wait until written.
    pub async fn flush(&mut self) -> io::Result<()> {
        self.commit(false)?;
        self.send_wire().await
    }

    /// Redirect subsequent writes into a new capture buffer.
    pub fn push_capture(&mut self) {
        self.output.push_capture();
    }

    /// End the innermost capture, transferring its bytes to the next capture
    /// or to the body. Returns the number of bytes transferred.
    pub async fn pop_capture(&mut self) -> io::Result<Option<usize>> {
        let Some(captured) = self.output.pop_capture() else {
            return Ok(None);
        };
        self.write_body(&captured).await?;
        Ok(Some(captured.len()))
    }

    /// Complete the response: close captures, final commit, end-of-response framing.
    pub async fn finish(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        while self.output.capture_depth() > 0 {
            self.pop_capture().await?;
        }
        self.commit(true)?;
        if self.framing == Framing::Ajp13 {
            ajp13::encode_end_response(true, self.output.wire_mut());
        }
        self.finished = true;
        self.send_wire().await
    }

    /// Take the encoded bytes not yet handed to a session.
    pub fn take_wire(&mut self) -> Bytes {
        self.output.take_wire()
    }

    /// Hand the wire queue to the attached session and wait for the write.
    ///
    /// Without a session the bytes stay queued for `take_wire`.
    async fn send_wire(&mut self) -> io::Result<()> {
        if self.stream_failed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "response stream already failed"));
        }
        let Some(sink) = self.sink.clone() else {
            return Ok(());
        };
        if self.output.pending_wire() == 0 {
            return Ok(());
        }

        let (reply, written) = oneshot::channel();
        let chunk = WireChunk {
            bytes: self.output.take_wire(),
            reply,
        };
        let result = match sink.send(chunk).await {
            Ok(()) => match written.await {
                Ok(result) => result.map_err(io::Error::from),
                Err(_) => Err(session_gone()),
            },
            Err(_) => Err(session_gone()),
        };
        if result.is_err() {
            self.stream_failed = true;
        }
        result
    }

    fn commit(&mut self, finishing: bool) -> Result<(), ProtocolError> {
        if !self.output.is_committed() {
            self.validate_headers(finishing);
            self.write_head()?;
            self.output.mark_committed();
        }
        let body = self.output.take_buffered();
        if body.is_empty() {
            return Ok(());
        }
        match self.framing {
            Framing::Ajp13 => ajp13::encode_body_chunks(&body, self.output.wire_mut()),
            Framing::Http | Framing::Http09 => self.output.wire_mut().extend_from_slice(&body),
        }
        Ok(())
    }

    // --- Commit-time header work ---

    /// Whether the connection must close after this response.
    pub fn close_after_request(&self) -> bool {
        let protocol = self.context.protocol.as_str();
        if protocol.starts_with("HTTP/0") {
            return true;
        }
        let length_unknown = self.content_length().is_none();
        let incoming = self.context.incoming_connection.as_deref();
        let outgoing = self.header("Connection");

        match (outgoing, incoming) {
            (None, None) => protocol == "HTTP/1.0" || length_unknown,
            (Some(value), _) | (None, Some(value)) => headers::has_token(value, "close") || length_unknown,
        }
    }

    fn validate_headers(&mut self, finishing: bool) {
        if finishing
            && self.status >= 300
            && self.content_length().is_none()
            && self.output.bytes_committed() == 0
        {
            let length = self.output.buffered() as u64;
            self.headers.push(headers::join_line("Content-Length", &length.to_string()));
            self.output.set_content_length(Some(length));
        }

        let close = self.close_after_request();
        headers::remove(&mut self.headers, "Connection");
        self.headers.push(headers::join_line(
            "Connection",
            if close { "close" } else { "keep-alive" },
        ));

        if !self.contains_header("Content-Type") {
            let value = format!("text/html;charset={}", self.character_encoding());
            self.headers.push(headers::join_line("Content-Type", &value));
        }
        if !self.contains_header("Date") {
            self.headers.push(headers::join_line("Date", &http::http_date()));
        }

        for id in &self.created_sessions {
            self.cookies.push(self.session_cookie(id, -1));
        }
        if let Some(live) = &self.live_sessions {
            let expired: Vec<Cookie> = self
                .context
                .requested_session_ids
                .iter()
                .filter(|id| !live.contains(*id) && !self.created_sessions.contains(*id))
                .map(|id| self.session_cookie(id, 0))
                .collect();
            self.cookies.extend(expired);
        }
    }

    fn session_cookie(&self, id: &str, max_age: i64) -> Cookie {
        let mut cookie = Cookie::new(SESSION_COOKIE_NAME, id);
        cookie.path = Some("/".to_string());
        cookie.max_age = max_age;
        cookie.secure = self.context.secure;
        cookie
    }

    fn write_head(&mut self) -> Result<(), ProtocolError> {
        match self.framing {
            Framing::Http09 => {}
            Framing::Http => {
                let version = if self.context.protocol == "HTTP/1.0" { "HTTP/1.0" } else { "HTTP/1.1" };
                let mut head = String::with_capacity(256);
                http::write_status_line(&mut head, version, self.status);
                for line in &self.headers {
                    head.push_str(line);
                    head.push_str("\r\n");
                }
                for cookie in &self.cookies {
                    head.push_str("Set-Cookie: ");
                    head.push_str(&cookie.to_set_cookie());
                    head.push_str("\r\n");
                }
                head.push_str("\r\n");
                self.output.wire_mut().extend_from_slice(head.as_bytes());
            }
            Framing::Ajp13 => {
                let rendered: Vec<String> = self.cookies.iter().map(Cookie::to_set_cookie).collect();
                let pairs: Vec<(&str, &str)> = self
                    .headers
                    .iter()
                    .filter_map(|line| headers::split_line(line))
                    .chain(rendered.iter().map(|c| ("Set-Cookie", c.as_str())))
                    .collect();
                let reason = http::reason_phrase(self.status);
                if let Err(e) = ajp13::encode_send_headers(self.status, reason, &pairs, self.output.wire_mut()) {
                    tracing::warn!(error = %e, status = self.status, "Response head does not fit an AJP13 packet");
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_response(protocol: &str, connection: Option<&str>) -> Response {
        let mut resp = Response::default();
        resp.begin(
            ExchangeContext {
                protocol: protocol.to_string(),
                incoming_connection: connection.map(str::to_string),
                ..Default::default()
            },
            Framing::Http,
        );
        resp
    }

    fn wire_text(resp: &mut Response) -> String {
        String::from_utf8(resp.take_wire().to_vec()).unwrap()
    }

    fn body_of(wire: &str) -> &str {
        wire.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("")
    }

    #[test]
    fn keep_alive_matrix() {
        assert!(http_response("HTTP/1.0", None).close_after_request());
        assert!(http_response("HTTP/1.1", None).close_after_request());

        let mut with_length = http_response("HTTP/1.1", None);
        with_length.set_content_length(10);
        assert!(!with_length.close_after_request());

        assert!(http_response("HTTP/0.9", None).close_after_request());

        let mut keep = http_response("HTTP/1.0", Some("keep-alive"));
        keep.set_content_length(1);
        assert!(!keep.close_after_request());

        let mut asked_close = http_response("HTTP/1.1", Some("close"));
        asked_close.set_content_length(1);
        assert!(asked_close.close_after_request());

        let mut outgoing_wins = http_response("HTTP/1.1", Some("close"));
        outgoing_wins.set_content_length(1);
        outgoing_wins.set_header("Connection", "keep-alive");
        assert!(!outgoing_wins.close_after_request());
    }

    #[tokio::test]
    async fn content_length_gates_writes() {
        let mut resp = http_response("HTTP/1.1", None);
        resp.set_content_length(5);
        resp.write_str("hello world").await.unwrap();
        resp.write_str("more").await.unwrap();
        resp.finish().await.unwrap();
        let wire = wire_text(&mut resp);
        assert_eq!(body_of(&wire), "hello");
        assert!(wire.contains("Connection: keep-alive\r\n"));
    }

    #[tokio::test]
    async fn short_body_is_not_padded() {
        let mut resp = http_response("HTTP/1.1", None);
        resp.set_content_length(10);
        resp.write_str("abc").await.unwrap();
        resp.finish().await.unwrap();
        assert_eq!(body_of(&wire_text(&mut resp)), "abc");
    }

    #[tokio::test]
    async fn head_written_exactly_once() {
        let mut resp = Response::new(4, "UTF-8");
        resp.begin(ExchangeContext { protocol: "HTTP/1.1".into(), ..Default::default() }, Framing::Http);
        resp.write_str("abcdefghij").await.unwrap();
        resp.flush().await.unwrap();
        resp.write_str("k").await.unwrap();
        resp.finish().await.unwrap();
        let wire = wire_text(&mut resp);
        assert_eq!(wire.matches("HTTP/1.1 200 OK").count(), 1);
        assert_eq!(body_of(&wire), "abcdefghijk");
        assert!(wire.contains("Connection: close\r\n"));
        assert!(wire.contains("Content-Type: text/html;charset=UTF-8\r\n"));
        assert!(wire.contains("Date: "));
    }

    #[tokio::test]
    async fn full_buffer_commits_implicitly() {
        let mut resp = Response::new(4, "UTF-8");
        resp.begin(ExchangeContext { protocol: "HTTP/1.1".into(), ..Default::default() }, Framing::Http);
        resp.write_str("abcd").await.unwrap();
        assert!(resp.is_committed());
        resp.set_status(500);
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn error_status_gets_synthesized_length() {
        let mut resp = http_response("HTTP/1.1", None);
        resp.set_status(404);
        resp.write_str("not here").await.unwrap();
        resp.finish().await.unwrap();
        let wire = wire_text(&mut resp);
        assert!(wire.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(wire.contains("Content-Length: 8\r\n"));
        assert!(wire.contains("Connection: keep-alive\r\n"));
        assert!(!resp.close_after_request());
    }

    #[tokio::test]
    async fn capture_holds_bytes_until_popped() {
        let mut resp = http_response("HTTP/1.1", None);
        resp.write_str("a").await.unwrap();
        resp.push_capture();
        resp.write_str("included").await.unwrap();
        resp.set_status(500);
        resp.set_header("X-Included", "yes");
        resp.flush().await.unwrap();
        let before = wire_text(&mut resp);
        assert!(!before.contains("included"));

        assert_eq!(resp.pop_capture().await.unwrap(), Some(8));
        assert_eq!(resp.pop_capture().await.unwrap(), None);
        resp.write_str("z").await.unwrap();
        resp.finish().await.unwrap();
        let after = wire_text(&mut resp);
        assert_eq!(after.matches("included").count(), 1);
        assert_eq!(resp.status(), 200);
        assert!(!before.contains("X-Included"));
    }

    #[tokio::test]
    async fn nested_capture_transfers_to_outer() {
        let mut resp = http_response("HTTP/1.1", None);
        resp.push_capture();
        resp.write_str("outer-").await.unwrap();
        resp.push_capture();
        resp.write_str("inner").await.unwrap();
        resp.pop_capture().await.unwrap();
        assert_eq!(resp.output().capture_depth(), 1);
        assert_eq!(resp.output().buffered(), 0);
        resp.pop_capture().await.unwrap();
        resp.finish().await.unwrap();
        assert_eq!(body_of(&wire_text(&mut resp)), "outer-inner");
    }

    #[tokio::test]
    async fn session_cookie_reconciliation() {
        let mut resp = Response::default();
        resp.begin(
            ExchangeContext {
                protocol: "HTTP/1.1".into(),
                requested_session_ids: vec!["old".into(), "kept".into()],
                ..Default::default()
            },
            Framing::Http,
        );
        resp.note_session_created("new");
        resp.set_live_sessions(["kept", "new"]);
        resp.finish().await.unwrap();
        let wire = wire_text(&mut resp);
        assert!(wire.contains("Set-Cookie: JSESSIONID=new; Path=/\r\n"));
        assert!(wire.contains("Set-Cookie: JSESSIONID=old; Max-Age=0"));
        assert!(!wire.contains("JSESSIONID=kept"));
    }

    #[tokio::test]
    async fn simple_request_has_no_head() {
        let mut resp = Response::default();
        resp.begin(ExchangeContext { protocol: "HTTP/0.9".into(), ..Default::default() }, Framing::Http09);
        resp.write_str("<html/>").await.unwrap();
        resp.finish().await.unwrap();
        assert_eq!(wire_text(&mut resp), "<html/>");
        assert!(resp.close_after_request());
    }

    #[tokio::test]
    async fn head_requests_discard_body() {
        let mut resp = Response::default();
        resp.begin(
            ExchangeContext { protocol: "HTTP/1.1".into(), head_request: true, ..Default::default() },
            Framing::Http,
        );
        resp.set_content_length(4);
        resp.write_str("body").await.unwrap();
        resp.finish().await.unwrap();
        let wire = wire_text(&mut resp);
        assert!(wire.contains("Content-Length: 4\r\n"));
        assert_eq!(body_of(&wire), "");
    }

    #[tokio::test]
    async fn clean_restores_defaults() {
        let mut resp = http_response("HTTP/1.1", None);
        resp.set_status(302);
        resp.add_header("Location", "/x");
        resp.write_str("x").await.unwrap();
        resp.finish().await.unwrap();
        resp.clean();
        assert_eq!(resp.status(), 200);
        assert!(resp.header_lines().is_empty());
        assert!(!resp.is_committed());
        assert_eq!(resp.output().pending_wire(), 0);
    }

    /// Acknowledge every chunk, counting the bytes; fail from the `fail_at`-th chunk on.
    fn spawn_writer(fail_at: Option<usize>) -> (mpsc::Sender<WireChunk>, tokio::task::JoinHandle<Vec<Bytes>>) {
        let (tx, mut rx) = mpsc::channel::<WireChunk>(1);
        let writer = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(chunk) = rx.recv().await {
                let reply = match fail_at {
                    Some(n) if seen.len() >= n => Err(ProtocolError::Io(io::ErrorKind::BrokenPipe.into())),
                    _ => Ok(()),
                };
                seen.push(chunk.bytes);
                let _ = chunk.reply.send(reply);
            }
            seen
        });
        (tx, writer)
    }

    #[tokio::test]
    async fn attached_sink_keeps_wire_queue_bounded() {
        let mut resp = http_response("HTTP/1.1", None);
        let (tx, writer) = spawn_writer(None);
        resp.attach_sink(tx);

        let block = vec![b'x'; DEFAULT_BUFFER_SIZE];
        for _ in 0..128 {
            resp.write_body(&block).await.unwrap();
            assert_eq!(resp.output().pending_wire(), 0);
            assert_eq!(resp.output().capacity(), DEFAULT_BUFFER_SIZE);
        }
        resp.finish().await.unwrap();
        resp.detach_sink();

        let chunks = writer.await.unwrap();
        assert!(chunks.len() >= 128);
        assert!(chunks.iter().all(|c| c.len() <= DEFAULT_BUFFER_SIZE + 512));
        let body: usize = chunks.iter().map(Bytes::len).sum::<usize>() - body_offset(&chunks[0]);
        assert_eq!(body, 128 * DEFAULT_BUFFER_SIZE);
    }

    fn body_offset(first: &Bytes) -> usize {
        first.windows(4).position(|w| w == b"\r\n\r\n").map_or(0, |p| p + 4)
    }

    #[tokio::test]
    async fn failed_write_poisons_the_response() {
        let mut resp = Response::new(4, "UTF-8");
        resp.begin(ExchangeContext { protocol: "HTTP/1.1".into(), ..Default::default() }, Framing::Http);
        let (tx, writer) = spawn_writer(Some(1));
        resp.attach_sink(tx);

        resp.write_str("abcd").await.unwrap();
        assert!(resp.write_str("efgh").await.is_err());
        assert!(resp.write_str("ijkl").await.is_err());
        assert!(resp.finish().await.is_err());
        resp.detach_sink();
        assert_eq!(writer.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn oversized_ajp_head_is_rejected() {
        let mut resp = Response::default();
        resp.begin(ExchangeContext { protocol: "HTTP/1.1".into(), ..Default::default() }, Framing::Ajp13);
        resp.set_header("X-Large", &"v".repeat(70_000));
        let err = resp.finish().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(resp.output().pending_wire(), 0);
    }
}
