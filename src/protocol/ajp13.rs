//! AJP13 binary framing.
//!
//! # Wire Layout
//! ```text
//! front end → container:  0x12 0x34 | u16 length | payload
//! container → front end:  'A'  'B'  | u16 length | payload
//!
//! string  := u16 length | bytes | 0x00     (length 0xFFFF = absent, no bytes)
//! ```
//!
//! # Responsibilities
//! - Decode forward-request frames into a `Request`
//! - Pull request bodies one chunk at a time (`GET_BODY_CHUNK`)
//! - Encode response header, body and end packets
//! - Client-side encoders and a container-packet reader for diagnostics and tests
//!
//! # Design Decisions
//! - Every read from a payload is bounds-checked first; short payloads
//!   surface as `ProtocolError::Truncated`, never a panic
//! - Body transfer is strictly receiver-driven: no body byte is on the wire
//!   unless the container asked for it, so nothing needs draining

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::net::connection::Connection;
use crate::protocol::ProtocolError;
use crate::request::Request;

/// Magic prefix of packets sent by the front end.
pub const SERVER_MAGIC: u16 = 0x1234;
/// Magic prefix of packets sent by the container.
pub const CONTAINER_MAGIC: [u8; 2] = *b"AB";
/// Largest packet on the wire, four-byte header included.
pub const MAX_PACKET_SIZE: usize = 8192;
/// Largest payload after the magic and length.
pub const MAX_PACKET_PAYLOAD: usize = MAX_PACKET_SIZE - 4;
/// Largest body payload in one packet.
pub const MAX_BODY_CHUNK: usize = MAX_PACKET_PAYLOAD - 4;

/// Front end → container packet types.
pub mod packet {
    pub const FORWARD_REQUEST: u8 = 0x02;
    pub const SHUTDOWN: u8 = 0x07;
    pub const CPING: u8 = 0x0A;

    /// Container → front end packet types.
    pub const SEND_BODY_CHUNK: u8 = 0x03;
    pub const SEND_HEADERS: u8 = 0x04;
    pub const END_RESPONSE: u8 = 0x05;
    pub const GET_BODY_CHUNK: u8 = 0x06;
    pub const CPONG: u8 = 0x09;
}

const ATTRIBUTE_TERMINATOR: u8 = 0xFF;
const ATTR_REQ_ATTRIBUTE: u8 = 0x0A;
const ATTR_SSL_KEY_SIZE: u8 = 0x0B;

const METHODS: [&str; 27] = [
    "OPTIONS",
    "GET",
    "HEAD",
    "POST",
    "PUT",
    "DELETE",
    "TRACE",
    "PROPFIND",
    "PROPPATCH",
    "MKCOL",
    "COPY",
    "MOVE",
    "LOCK",
    "UNLOCK",
    "ACL",
    "REPORT",
    "VERSION-CONTROL",
    "CHECKIN",
    "CHECKOUT",
    "UNCHECKOUT",
    "SEARCH",
    "MKWORKSPACE",
    "UPDATE",
    "LABEL",
    "MERGE",
    "BASELINE-CONTROL",
    "MKACTIVITY",
];

const REQUEST_HEADERS: [&str; 14] = [
    "Accept",
    "Accept-Charset",
    "Accept-Encoding",
    "Accept-Language",
    "Authorization",
    "Connection",
    "Content-Type",
    "Content-Length",
    "Cookie",
    "Cookie2",
    "Host",
    "Pragma",
    "Referer",
    "User-Agent",
];

const RESPONSE_HEADERS: [&str; 11] = [
    "Content-Type",
    "Content-Language",
    "Content-Length",
    "Date",
    "Last-Modified",
    "Location",
    "Set-Cookie",
    "Set-Cookie2",
    "Servlet-Engine",
    "Status",
    "WWW-Authenticate",
];

const ATTRIBUTES: [&str; 10] = [
    "context",
    "servlet_path",
    "remote_user",
    "auth_type",
    "query_string",
    "jvm_route",
    "ssl_cert",
    "ssl_cipher",
    "ssl_session",
    "req_attribute",
];

/// Verb for a forward-request method code.
pub fn method_name(code: u8) -> &'static str {
    match code {
        1..=27 => METHODS[usize::from(code - 1)],
        _ => "UNKNOWN",
    }
}

/// Method code for a verb, if it has one.
pub fn method_code(name: &str) -> Option<u8> {
    METHODS
        .iter()
        .position(|m| m.eq_ignore_ascii_case(name))
        .map(|i| i as u8 + 1)
}

fn table_code(table: &[&str], name: &str) -> Option<u16> {
    table
        .iter()
        .position(|h| h.eq_ignore_ascii_case(name))
        .map(|i| 0xA001 + i as u16)
}

fn table_name(table: &'static [&'static str], code: u16) -> Option<&'static str> {
    let index = code.checked_sub(0xA001)?;
    table.get(usize::from(index)).copied()
}

// --- Payload cursor ---

/// Bounds-checked reader over one packet payload.
struct PacketReader {
    buf: Bytes,
}

impl PacketReader {
    fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize, what: &'static str) -> Result<(), ProtocolError> {
        if self.buf.remaining() < n {
            return Err(ProtocolError::Truncated(what));
        }
        Ok(())
    }

    fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn peek_u8(&self) -> Option<u8> {
        self.buf.first().copied()
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, ProtocolError> {
        self.need(1, what)?;
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self, what: &'static str) -> Result<u16, ProtocolError> {
        self.need(2, what)?;
        Ok(self.buf.get_u16())
    }

    fn bytes(&mut self, n: usize, what: &'static str) -> Result<Bytes, ProtocolError> {
        self.need(n, what)?;
        Ok(self.buf.split_to(n))
    }

    fn string(&mut self, what: &'static str) -> Result<Option<String>, ProtocolError> {
        let len = self.u16(what)?;
        if len == 0xFFFF {
            return Ok(None);
        }
        let raw = self.bytes(usize::from(len), what)?;
        self.u8(what)?;
        Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
    }
}

fn put_string(out: &mut BytesMut, value: Option<&str>) -> Result<(), ProtocolError> {
    match value {
        Some(s) => {
            // 0xFFFF is reserved for the absent marker.
            let len = u16::try_from(s.len())
                .ok()
                .filter(|&len| len != 0xFFFF)
                .ok_or(ProtocolError::PacketTooLarge(s.len()))?;
            out.put_u16(len);
            out.put_slice(s.as_bytes());
            out.put_u8(0);
        }
        None => out.put_u16(0xFFFF),
    }
    Ok(())
}

fn put_count(out: &mut BytesMut, count: usize) -> Result<(), ProtocolError> {
    let count = u16::try_from(count).map_err(|_| ProtocolError::PacketTooLarge(count))?;
    out.put_u16(count);
    Ok(())
}

fn checked_payload_len(payload: &[u8]) -> Result<u16, ProtocolError> {
    if payload.len() > MAX_PACKET_PAYLOAD {
        return Err(ProtocolError::PacketTooLarge(payload.len()));
    }
    Ok(payload.len() as u16)
}

/// Frame a payload already known to fit one packet.
fn put_container_packet(out: &mut BytesMut, payload: &[u8]) {
    debug_assert!(payload.len() <= MAX_PACKET_PAYLOAD);
    out.put_slice(&CONTAINER_MAGIC);
    out.put_u16(payload.len() as u16);
    out.put_slice(payload);
}

// --- Server side ---

/// Read one front-end frame and return its payload.
pub async fn read_frame<S>(conn: &mut Connection<S>) -> Result<Bytes, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut head = conn.read_exact(4, "frame header").await?;
    let magic = head.get_u16();
    if magic != SERVER_MAGIC {
        return Err(ProtocolError::BadMagic(magic));
    }
    let len = usize::from(head.get_u16());
    conn.read_exact(len, "frame payload").await
}

/// Decode the next forward request from `conn` into `req`.
///
/// CPing probes arriving before the request are answered inline.
pub async fn read_request<S>(
    conn: &mut Connection<S>,
    req: &mut Request,
    hostname_lookups: bool,
) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let payload = read_frame(conn).await?;
        match payload.first().copied() {
            Some(packet::FORWARD_REQUEST) => return decode_forward_request(payload, req, hostname_lookups),
            Some(packet::CPING) => {
                tracing::trace!(connection_id = %conn.id(), "Answering AJP13 CPing");
                let mut out = BytesMut::with_capacity(5);
                put_container_packet(&mut out, &[packet::CPONG]);
                conn.write_all(&out).await?;
            }
            Some(other) => return Err(ProtocolError::UnexpectedPacket(other)),
            None => return Err(ProtocolError::Truncated("packet type")),
        }
    }
}

/// Populate `req` from a forward-request payload (type byte included).
pub fn decode_forward_request(payload: Bytes, req: &mut Request, hostname_lookups: bool) -> Result<(), ProtocolError> {
    if payload.last() != Some(&ATTRIBUTE_TERMINATOR) {
        return Err(ProtocolError::MissingTerminator);
    }
    let mut r = PacketReader::new(payload);
    let kind = r.u8("packet type")?;
    if kind != packet::FORWARD_REQUEST {
        return Err(ProtocolError::UnexpectedPacket(kind));
    }

    req.set_method(method_name(r.u8("method")?));
    req.set_protocol(&r.string("protocol")?.unwrap_or_default());
    req.set_uri(&r.string("uri")?.unwrap_or_default());
    let remote_addr = r.string("remote address")?.unwrap_or_default();
    let remote_host = r.string("remote host")?;
    let server_name = r.string("server name")?.unwrap_or_default();
    let server_port = r.u16("server port")?;
    let is_ssl = r.u8("ssl flag")? != 0;

    req.set_secure(is_ssl);
    req.set_server(&server_name, server_port);
    let host = match remote_host {
        Some(host) if hostname_lookups && !host.is_empty() => host,
        _ => remote_addr.clone(),
    };
    let addr = remote_addr
        .parse::<std::net::IpAddr>()
        .ok()
        .map(|ip| std::net::SocketAddr::new(ip, 0));
    req.set_remote(addr, &remote_addr, &host);

    let header_count = r.u16("header count")?;
    for _ in 0..header_count {
        let name = match r.peek_u8() {
            Some(0xA0) => {
                let code = r.u16("header code")?;
                table_name(&REQUEST_HEADERS, code)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("X-Ajp-Unknown-{:04x}", code))
            }
            _ => r.string("header name")?.unwrap_or_default(),
        };
        let value = r.string("header value")?.unwrap_or_default();
        req.push_header(&name, &value);
    }

    let mut query = None;
    loop {
        let code = r.u8("attribute code")?;
        match code {
            ATTRIBUTE_TERMINATOR => break,
            ATTR_REQ_ATTRIBUTE => {
                let name = r.string("attribute name")?.unwrap_or_default();
                let value = r.string("attribute value")?.unwrap_or_default();
                req.set_attribute(name, value);
            }
            ATTR_SSL_KEY_SIZE => {
                let size = r.u16("ssl key size")?;
                req.set_attribute("ssl_key_size", size.to_string());
            }
            1..=9 => {
                let value = r.string("attribute value")?.unwrap_or_default();
                match ATTRIBUTES[usize::from(code - 1)] {
                    "remote_user" => req.set_remote_user(Some(value)),
                    "auth_type" => req.set_auth_type(Some(value)),
                    "query_string" => query = Some(value),
                    name => req.set_attribute(name, value),
                }
            }
            other => return Err(ProtocolError::UnknownAttribute(other)),
        }
    }
    if r.remaining() > 0 {
        tracing::debug!(trailing = r.remaining(), "Ignoring bytes after AJP13 attribute terminator");
    }

    req.apply_headers(false)?;
    if let Some(query) = query {
        req.set_query_string(&query)?;
    }
    Ok(())
}

/// Ask the front end for up to `max` body bytes and read its reply.
///
/// An empty result means the front end has no more body to send.
pub async fn fetch_body_chunk<S>(conn: &mut Connection<S>, max: usize) -> Result<Bytes, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut out = BytesMut::with_capacity(7);
    encode_get_body_chunk(max.min(MAX_BODY_CHUNK) as u16, &mut out);
    conn.write_all(&out).await?;

    let payload = read_frame(conn).await?;
    if payload.len() < 2 {
        return Ok(Bytes::new());
    }
    let mut r = PacketReader::new(payload);
    let len = usize::from(r.u16("body chunk length")?);
    r.bytes(len, "body chunk")
}

/// `GET_BODY_CHUNK` request for `len` bytes.
pub fn encode_get_body_chunk(len: u16, out: &mut BytesMut) {
    let mut payload = [0u8; 3];
    payload[0] = packet::GET_BODY_CHUNK;
    payload[1..].copy_from_slice(&len.to_be_bytes());
    put_container_packet(out, &payload);
}

/// `SEND_HEADERS` packet. Known names are sent as table codes.
///
/// Fails with `PacketTooLarge` when the head does not fit one packet;
/// nothing is appended to `out` in that case.
pub fn encode_send_headers(
    status: u16,
    reason: &str,
    headers: &[(&str, &str)],
    out: &mut BytesMut,
) -> Result<(), ProtocolError> {
    let mut payload = BytesMut::with_capacity(64 + headers.len() * 32);
    payload.put_u8(packet::SEND_HEADERS);
    payload.put_u16(status);
    put_string(&mut payload, Some(reason))?;
    put_count(&mut payload, headers.len())?;
    for (name, value) in headers {
        match table_code(&RESPONSE_HEADERS, name) {
            Some(code) => payload.put_u16(code),
            None => put_string(&mut payload, Some(name))?,
        }
        put_string(&mut payload, Some(value))?;
    }
    checked_payload_len(&payload)?;
    put_container_packet(out, &payload);
    Ok(())
}

/// `SEND_BODY_CHUNK` packets, at most `MAX_BODY_CHUNK` bytes each.
pub fn encode_body_chunks(data: &[u8], out: &mut BytesMut) {
    for chunk in data.chunks(MAX_BODY_CHUNK) {
        out.put_slice(&CONTAINER_MAGIC);
        out.put_u16((chunk.len() + 4) as u16);
        out.put_u8(packet::SEND_BODY_CHUNK);
        out.put_u16(chunk.len() as u16);
        out.put_slice(chunk);
        out.put_u8(0);
    }
}

/// `END_RESPONSE` packet.
pub fn encode_end_response(reuse: bool, out: &mut BytesMut) {
    put_container_packet(out, &[packet::END_RESPONSE, u8::from(reuse)]);
}

// --- Client side ---

/// A forward request as a front end would send it.
#[derive(Debug, Clone, Default)]
pub struct ForwardRequest {
    pub method: String,
    pub protocol: String,
    pub uri: String,
    pub remote_addr: String,
    pub remote_host: Option<String>,
    pub server_name: String,
    pub server_port: u16,
    pub is_ssl: bool,
    pub headers: Vec<(String, String)>,
    pub query_string: Option<String>,
    pub remote_user: Option<String>,
    pub auth_type: Option<String>,
    pub jvm_route: Option<String>,
    pub attributes: Vec<(String, String)>,
}

impl ForwardRequest {
    /// A `GET` for `uri` with front-end defaults filled in.
    pub fn get(uri: &str) -> Self {
        Self {
            method: "GET".to_string(),
            protocol: "HTTP/1.1".to_string(),
            uri: uri.to_string(),
            remote_addr: "127.0.0.1".to_string(),
            server_name: "localhost".to_string(),
            server_port: 80,
            ..Default::default()
        }
    }

    /// Encode as a complete front-end frame.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut payload = BytesMut::with_capacity(256);
        payload.put_u8(packet::FORWARD_REQUEST);
        payload.put_u8(method_code(&self.method).unwrap_or(0));
        put_string(&mut payload, Some(&self.protocol))?;
        put_string(&mut payload, Some(&self.uri))?;
        put_string(&mut payload, Some(&self.remote_addr))?;
        put_string(&mut payload, self.remote_host.as_deref())?;
        put_string(&mut payload, Some(&self.server_name))?;
        payload.put_u16(self.server_port);
        payload.put_u8(u8::from(self.is_ssl));
        put_count(&mut payload, self.headers.len())?;
        for (name, value) in &self.headers {
            match table_code(&REQUEST_HEADERS, name) {
                Some(code) => payload.put_u16(code),
                None => put_string(&mut payload, Some(name))?,
            }
            put_string(&mut payload, Some(value))?;
        }
        let simple = [
            (3u8, &self.remote_user),
            (4, &self.auth_type),
            (5, &self.query_string),
            (6, &self.jvm_route),
        ];
        for (code, value) in simple {
            if let Some(value) = value {
                payload.put_u8(code);
                put_string(&mut payload, Some(value))?;
            }
        }
        for (name, value) in &self.attributes {
            payload.put_u8(ATTR_REQ_ATTRIBUTE);
            put_string(&mut payload, Some(name))?;
            put_string(&mut payload, Some(value))?;
        }
        payload.put_u8(ATTRIBUTE_TERMINATOR);
        server_frame(&payload)
    }
}

fn server_frame(payload: &[u8]) -> Result<Bytes, ProtocolError> {
    let len = checked_payload_len(payload)?;
    let mut out = BytesMut::with_capacity(4 + payload.len());
    out.put_u16(SERVER_MAGIC);
    out.put_u16(len);
    out.put_slice(payload);
    Ok(out.freeze())
}

/// Front-end body frame answering a `GET_BODY_CHUNK`. Empty `data` signals end of body.
pub fn encode_body_frame(data: &[u8]) -> Result<Bytes, ProtocolError> {
    if data.is_empty() {
        return server_frame(&[]);
    }
    if data.len() > MAX_BODY_CHUNK {
        return Err(ProtocolError::PacketTooLarge(data.len()));
    }
    let mut payload = BytesMut::with_capacity(2 + data.len());
    payload.put_u16(data.len() as u16);
    payload.put_slice(data);
    server_frame(&payload)
}

/// Front-end CPing probe.
pub fn encode_cping() -> Bytes {
    let mut out = BytesMut::with_capacity(5);
    out.put_u16(SERVER_MAGIC);
    out.put_u16(1);
    out.put_u8(packet::CPING);
    out.freeze()
}

/// A packet sent by the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerPacket {
    SendHeaders {
        status: u16,
        reason: String,
        headers: Vec<(String, String)>,
    },
    BodyChunk(Bytes),
    EndResponse { reuse: bool },
    GetBodyChunk(u16),
    CPong,
}

impl ContainerPacket {
    /// Decode a container packet payload (magic and length already stripped).
    pub fn decode(payload: Bytes) -> Result<Self, ProtocolError> {
        let mut r = PacketReader::new(payload);
        match r.u8("packet type")? {
            packet::SEND_HEADERS => {
                let status = r.u16("status")?;
                let reason = r.string("reason")?.unwrap_or_default();
                let count = r.u16("header count")?;
                let mut headers = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    let name = match r.peek_u8() {
                        Some(0xA0) => {
                            let code = r.u16("header code")?;
                            table_name(&RESPONSE_HEADERS, code)
                                .ok_or(ProtocolError::Truncated("response header code"))?
                                .to_string()
                        }
                        _ => r.string("header name")?.unwrap_or_default(),
                    };
                    let value = r.string("header value")?.unwrap_or_default();
                    headers.push((name, value));
                }
                Ok(ContainerPacket::SendHeaders { status, reason, headers })
            }
            packet::SEND_BODY_CHUNK => {
                let len = usize::from(r.u16("body chunk length")?);
                Ok(ContainerPacket::BodyChunk(r.bytes(len, "body chunk")?))
            }
            packet::END_RESPONSE => Ok(ContainerPacket::EndResponse {
                reuse: r.u8("reuse flag")? != 0,
            }),
            packet::GET_BODY_CHUNK => Ok(ContainerPacket::GetBodyChunk(r.u16("requested length")?)),
            packet::CPONG => Ok(ContainerPacket::CPong),
            other => Err(ProtocolError::UnexpectedPacket(other)),
        }
    }
}

/// Read one container packet from `reader`.
pub async fn read_container_packet<R>(reader: &mut R) -> Result<ContainerPacket, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; 4];
    reader.read_exact(&mut head).await?;
    if head[..2] != CONTAINER_MAGIC {
        return Err(ProtocolError::BadMagic(u16::from_be_bytes([head[0], head[1]])));
    }
    let len = usize::from(u16::from_be_bytes([head[2], head[3]]));
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    ContainerPacket::decode(Bytes::from(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::test_support::pipe;
    use crate::protocol::Protocol;
    use crate::response::{ExchangeContext, Framing, Response};
    use tokio::io::AsyncWriteExt;

    fn sample_request() -> ForwardRequest {
        let mut fwd = ForwardRequest::get("/shop/cart");
        fwd.method = "POST".to_string();
        fwd.remote_addr = "10.0.0.7".to_string();
        fwd.remote_host = Some("client.example".to_string());
        fwd.server_name = "www.example.com".to_string();
        fwd.server_port = 443;
        fwd.is_ssl = true;
        fwd.headers = vec![
            ("Content-Type".into(), "application/x-www-form-urlencoded".into()),
            ("Content-Length".into(), "3".into()),
            ("Cookie".into(), "JSESSIONID=abc".into()),
            ("X-Custom".into(), "yes".into()),
        ];
        fwd.query_string = Some("item=7&qty=2".to_string());
        fwd.remote_user = Some("alice".to_string());
        fwd.jvm_route = Some("node1".to_string());
        fwd.attributes = vec![("trace".into(), "on".into())];
        fwd
    }

    fn payload_of(frame: Bytes) -> Bytes {
        frame.slice(4..)
    }

    #[test]
    fn method_table() {
        assert_eq!(method_name(2), "GET");
        assert_eq!(method_name(27), "MKACTIVITY");
        assert_eq!(method_name(0), "UNKNOWN");
        assert_eq!(method_name(200), "UNKNOWN");
        assert_eq!(method_code("propfind"), Some(8));
    }

    #[test]
    fn forward_request_decodes() {
        let mut req = Request::default();
        decode_forward_request(payload_of(sample_request().encode().unwrap()), &mut req, false).unwrap();

        assert_eq!(req.method(), "POST");
        assert_eq!(req.uri(), "/shop/cart");
        assert_eq!(req.protocol(), "HTTP/1.1");
        assert_eq!(req.server_name(), "www.example.com");
        assert_eq!(req.server_port(), 443);
        assert!(req.is_secure());
        assert_eq!(req.remote_ip(), "10.0.0.7");
        assert_eq!(req.remote_host(), "10.0.0.7");
        assert_eq!(req.header("x-custom"), Some("yes"));
        assert_eq!(req.content_length(), Some(3));
        assert_eq!(req.requested_session_ids(), &["abc".to_string()]);
        assert_eq!(req.parameter("qty"), Some("2"));
        assert_eq!(req.remote_user(), Some("alice"));
        assert_eq!(req.attribute("jvm_route"), Some("node1"));
        assert_eq!(req.attribute("trace"), Some("on"));
    }

    #[test]
    fn hostname_lookups_use_front_end_host() {
        let mut req = Request::default();
        decode_forward_request(payload_of(sample_request().encode().unwrap()), &mut req, true).unwrap();
        assert_eq!(req.remote_host(), "client.example");
    }

    #[test]
    fn ssl_key_size_attribute() {
        let frame = ForwardRequest::get("/").encode().unwrap();
        let mut payload = BytesMut::from(&payload_of(frame)[..]);
        payload.truncate(payload.len() - 1);
        payload.put_u8(ATTR_SSL_KEY_SIZE);
        payload.put_u16(256);
        payload.put_u8(ATTRIBUTE_TERMINATOR);

        let mut req = Request::default();
        decode_forward_request(payload.freeze(), &mut req, false).unwrap();
        assert_eq!(req.attribute("ssl_key_size"), Some("256"));
    }

    #[test]
    fn malformed_payloads() {
        let good = payload_of(ForwardRequest::get("/").encode().unwrap());

        let unterminated = good.slice(..good.len() - 1);
        assert!(matches!(
            decode_forward_request(unterminated, &mut Request::default(), false),
            Err(ProtocolError::MissingTerminator)
        ));

        let mut wrong_type = BytesMut::from(&good[..]);
        wrong_type[0] = packet::SHUTDOWN;
        assert!(matches!(
            decode_forward_request(wrong_type.freeze(), &mut Request::default(), false),
            Err(ProtocolError::UnexpectedPacket(packet::SHUTDOWN))
        ));

        let truncated = Bytes::from_static(&[packet::FORWARD_REQUEST, 2, 0x00, 0x10, b'H', 0xFF]);
        assert!(matches!(
            decode_forward_request(truncated, &mut Request::default(), false),
            Err(ProtocolError::Truncated(_))
        ));

        let mut bad_attr = BytesMut::from(&good[..good.len() - 1]);
        bad_attr.put_u8(0x42);
        bad_attr.put_u8(ATTRIBUTE_TERMINATOR);
        assert!(matches!(
            decode_forward_request(bad_attr.freeze(), &mut Request::default(), false),
            Err(ProtocolError::UnknownAttribute(0x42))
        ));
    }

    #[tokio::test]
    async fn bad_magic_is_rejected() {
        let (mut conn, mut client) = pipe(Protocol::Ajp13);
        client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        let err = read_request(&mut conn, &mut Request::default(), false).await.unwrap_err();
        assert!(matches!(err, ProtocolError::BadMagic(0x4745)));
    }

    #[tokio::test]
    async fn cping_is_answered_before_request() {
        let (mut conn, mut client) = pipe(Protocol::Ajp13);
        client.write_all(&encode_cping()).await.unwrap();
        client.write_all(&ForwardRequest::get("/ping").encode().unwrap()).await.unwrap();

        let mut req = Request::default();
        read_request(&mut conn, &mut req, false).await.unwrap();
        assert_eq!(req.uri(), "/ping");
        assert_eq!(read_container_packet(&mut client).await.unwrap(), ContainerPacket::CPong);
    }

    #[tokio::test]
    async fn body_is_pulled_by_the_container() {
        let (mut conn, mut client) = pipe(Protocol::Ajp13);
        let front_end = tokio::spawn(async move {
            let asked = read_container_packet(&mut client).await.unwrap();
            client.write_all(&encode_body_frame(b"abc").unwrap()).await.unwrap();
            let asked_again = read_container_packet(&mut client).await.unwrap();
            client.write_all(&encode_body_frame(b"").unwrap()).await.unwrap();
            (asked, asked_again)
        });

        assert_eq!(&fetch_body_chunk(&mut conn, 100_000).await.unwrap()[..], b"abc");
        assert!(fetch_body_chunk(&mut conn, 10).await.unwrap().is_empty());
        let (asked, asked_again) = front_end.await.unwrap();
        assert_eq!(asked, ContainerPacket::GetBodyChunk(MAX_BODY_CHUNK as u16));
        assert_eq!(asked_again, ContainerPacket::GetBodyChunk(10));
    }

    #[tokio::test]
    async fn response_packet_order() {
        let mut resp = Response::default();
        resp.begin(ExchangeContext { protocol: "HTTP/1.1".into(), ..Default::default() }, Framing::Ajp13);
        resp.set_content_type("text/html");
        resp.write_str("hi").await.unwrap();
        resp.finish().await.unwrap();
        let wire = resp.take_wire();

        let mut reader = &wire[..];
        match read_container_packet(&mut reader).await.unwrap() {
            ContainerPacket::SendHeaders { status, reason, headers } => {
                assert_eq!(status, 200);
                assert_eq!(reason, "OK");
                assert!(headers.contains(&("Content-Type".to_string(), "text/html".to_string())));
            }
            other => panic!("expected headers, got {:?}", other),
        }
        assert_eq!(
            read_container_packet(&mut reader).await.unwrap(),
            ContainerPacket::BodyChunk(Bytes::from_static(b"hi"))
        );
        assert_eq!(
            read_container_packet(&mut reader).await.unwrap(),
            ContainerPacket::EndResponse { reuse: true }
        );
        assert!(reader.is_empty());
    }

    #[test]
    fn large_bodies_split_into_chunks() {
        let mut out = BytesMut::new();
        encode_body_chunks(&vec![7u8; MAX_BODY_CHUNK + 10], &mut out);
        assert_eq!(out.len(), (MAX_BODY_CHUNK + 8) + (10 + 8));
        assert_eq!(u16::from_be_bytes([out[2], out[3]]) as usize, MAX_BODY_CHUNK + 4);
    }

    #[test]
    fn end_response_bytes() {
        let mut out = BytesMut::new();
        encode_end_response(true, &mut out);
        assert_eq!(&out[..], &[b'A', b'B', 0x00, 0x02, 0x05, 0x01]);
    }

    #[test]
    fn oversized_fields_are_rejected_not_truncated() {
        let mut out = BytesMut::new();
        let huge = "v".repeat(70_000);
        assert!(matches!(
            encode_send_headers(200, "OK", &[("X-Big", &huge)], &mut out),
            Err(ProtocolError::PacketTooLarge(70_000))
        ));

        // Fits a u16 but not one packet.
        let wide = "v".repeat(MAX_PACKET_PAYLOAD);
        assert!(matches!(
            encode_send_headers(200, "OK", &[("X-Wide", &wide)], &mut out),
            Err(ProtocolError::PacketTooLarge(_))
        ));
        assert!(out.is_empty());

        let mut fwd = ForwardRequest::get("/");
        fwd.uri = "/".repeat(70_000);
        assert!(matches!(fwd.encode(), Err(ProtocolError::PacketTooLarge(_))));
        assert!(encode_body_frame(&vec![0u8; MAX_BODY_CHUNK + 1]).is_err());
    }

    #[test]
    fn send_headers_length_matches_payload() {
        let mut out = BytesMut::new();
        let value = "v".repeat(4000);
        encode_send_headers(200, "OK", &[("X-Fit", &value), ("Content-Type", "text/plain")], &mut out).unwrap();
        let declared = usize::from(u16::from_be_bytes([out[2], out[3]]));
        assert_eq!(declared, out.len() - 4);
        assert!(out.len() <= MAX_PACKET_SIZE);
    }
}
