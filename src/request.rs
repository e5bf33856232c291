//! Pooled request object.
//!
//! # Responsibilities
//! - Hold everything a decoder extracts from the wire
//! - Apply the side effects of well-known headers (length, type, host,
//!   cookies, locales, authorization)
//! - Give the router access to the entity body without owning the socket
//!
//! # Design Decisions
//! - Headers are raw `Name: value` lines; first occurrence wins on lookup
//! - Body reads are forwarded to the owning session as demands, so the
//!   session keeps exclusive ownership of the connection
//! - `clean()` resets every field; the pool calls it before reuse

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot};

use crate::pool::Recycle;
use crate::protocol::cookie::{self, Cookie, SESSION_COOKIE_NAME};
use crate::protocol::{headers, locale, percent, ProtocolError};

/// Upper bound on a single body read.
pub const MAX_BODY_READ: usize = 64 * 1024;

/// A request from the router for up to `max` body bytes.
#[derive(Debug)]
pub(crate) struct BodyDemand {
    pub max: usize,
    pub reply: oneshot::Sender<Result<Bytes, ProtocolError>>,
}

/// A decoded request.
#[derive(Debug)]
pub struct Request {
    method: String,
    uri: String,
    query_string: Option<String>,
    protocol: String,
    scheme: String,
    secure: bool,
    headers: Vec<String>,
    cookies: Vec<Cookie>,
    content_length: Option<u64>,
    content_type: Option<String>,
    character_encoding: Option<String>,
    attributes: HashMap<String, String>,
    parameters: HashMap<String, Vec<String>>,
    locales: Vec<String>,
    server_name: String,
    server_port: u16,
    remote_addr: Option<SocketAddr>,
    remote_ip: String,
    remote_host: String,
    remote_user: Option<String>,
    auth_type: Option<String>,
    authorization: Option<String>,
    requested_session_ids: Vec<String>,
    max_parameters: usize,
    body: Option<mpsc::Sender<BodyDemand>>,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            method: String::new(),
            uri: String::new(),
            query_string: None,
            protocol: String::new(),
            scheme: "http".to_string(),
            secure: false,
            headers: Vec::new(),
            cookies: Vec::new(),
            content_length: None,
            content_type: None,
            character_encoding: None,
            attributes: HashMap::new(),
            parameters: HashMap::new(),
            locales: Vec::new(),
            server_name: String::new(),
            server_port: 0,
            remote_addr: None,
            remote_ip: String::new(),
            remote_host: String::new(),
            remote_user: None,
            auth_type: None,
            authorization: None,
            requested_session_ids: Vec::new(),
            max_parameters: 10_000,
            body: None,
        }
    }
}

impl Recycle for Request {
    fn clean(&mut self) {
        self.method.clear();
        self.uri.clear();
        self.query_string = None;
        self.protocol.clear();
        self.scheme.clear();
        self.scheme.push_str("http");
        self.secure = false;
        self.headers.clear();
        self.cookies.clear();
        self.content_length = None;
        self.content_type = None;
        self.character_encoding = None;
        self.attributes.clear();
        self.parameters.clear();
        self.locales.clear();
        self.server_name.clear();
        self.server_port = 0;
        self.remote_addr = None;
        self.remote_ip.clear();
        self.remote_host.clear();
        self.remote_user = None;
        self.auth_type = None;
        self.authorization = None;
        self.requested_session_ids.clear();
        self.body = None;
    }
}

impl Request {
    // --- Accessors ---

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request target path, still percent-encoded, without query string.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Percent-decoded request path.
    pub fn decoded_uri(&self) -> String {
        percent::decode_path(&self.uri)
    }

    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    /// Protocol version, e.g. `HTTP/1.1`.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Raw header lines in arrival order.
    pub fn header_lines(&self) -> &[String] {
        &self.headers
    }

    /// First value of header `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        headers::find(&self.headers, name)
    }

    /// Every value of header `name`, in arrival order.
    pub fn headers<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        headers::find_all(&self.headers, name)
    }

    /// Distinct header names in arrival order.
    pub fn header_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for (name, _) in self.headers.iter().filter_map(|l| headers::split_line(l)) {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                names.push(name);
            }
        }
        names
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn character_encoding(&self) -> Option<&str> {
        self.character_encoding.as_deref()
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<String> {
        self.attributes.remove(name)
    }

    /// First value of parameter `name`.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn parameter_values(&self, name: &str) -> Option<&[String]> {
        self.parameters.get(name).map(Vec::as_slice)
    }

    pub fn parameters(&self) -> &HashMap<String, Vec<String>> {
        &self.parameters
    }

    /// Preferred locales, best first.
    pub fn locales(&self) -> &[String] {
        &self.locales
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Client IP as reported by the transport or the AJP front end.
    pub fn remote_ip(&self) -> &str {
        &self.remote_ip
    }

    pub fn remote_host(&self) -> &str {
        &self.remote_host
    }

    pub fn remote_user(&self) -> Option<&str> {
        self.remote_user.as_deref()
    }

    pub fn auth_type(&self) -> Option<&str> {
        self.auth_type.as_deref()
    }

    pub fn authorization(&self) -> Option<&str> {
        self.authorization.as_deref()
    }

    /// Session ids the client presented via `JSESSIONID` cookies.
    pub fn requested_session_ids(&self) -> &[String] {
        &self.requested_session_ids
    }

    pub fn max_parameters(&self) -> usize {
        self.max_parameters
    }

    // --- Population (decoders) ---

    pub(crate) fn set_method(&mut self, method: &str) {
        self.method.clear();
        self.method.push_str(method);
    }

    pub(crate) fn set_uri(&mut self, uri: &str) {
        self.uri.clear();
        self.uri.push_str(uri);
    }

    pub(crate) fn set_protocol(&mut self, protocol: &str) {
        self.protocol.clear();
        self.protocol.push_str(protocol);
    }

    pub(crate) fn set_secure(&mut self, secure: bool) {
        self.secure = secure;
        self.scheme.clear();
        self.scheme.push_str(if secure { "https" } else { "http" });
    }

    pub(crate) fn set_server(&mut self, name: &str, port: u16) {
        self.server_name.clear();
        self.server_name.push_str(name);
        self.server_port = port;
    }

    pub(crate) fn set_remote(&mut self, addr: Option<SocketAddr>, ip: &str, host: &str) {
        self.remote_addr = addr;
        self.remote_ip.clear();
        self.remote_ip.push_str(ip);
        self.remote_host.clear();
        self.remote_host.push_str(host);
    }

    pub(crate) fn set_remote_user(&mut self, user: Option<String>) {
        self.remote_user = user;
    }

    pub(crate) fn set_auth_type(&mut self, auth_type: Option<String>) {
        self.auth_type = auth_type;
    }

    pub(crate) fn set_max_parameters(&mut self, max: usize) {
        self.max_parameters = max;
    }

    /// Append a raw header line; lines without a colon are dropped.
    pub(crate) fn push_header_line(&mut self, line: &str) {
        match headers::split_line(line) {
            Some((name, value)) if !name.is_empty() => {
                self.headers.push(headers::join_line(name, value));
            }
            _ => tracing::debug!(line = %line, "Dropping header line without a name"),
        }
    }

    pub(crate) fn push_header(&mut self, name: &str, value: &str) {
        self.headers.push(headers::join_line(name, value));
    }

    /// Record the query string and parse it into parameters.
    pub(crate) fn set_query_string(&mut self, query: &str) -> Result<(), ProtocolError> {
        self.query_string = Some(query.to_string());
        percent::parse_query(query, &mut self.parameters, self.max_parameters)
    }

    /// Apply the side effects of the recognized headers.
    ///
    /// When `use_host_header` is set, `Host` determines server name and port;
    /// AJP13 supplies those in the frame instead.
    pub(crate) fn apply_headers(&mut self, use_host_header: bool) -> Result<(), ProtocolError> {
        let lines = std::mem::take(&mut self.headers);
        let result = self.apply_header_lines(&lines, use_host_header);
        self.headers = lines;
        result
    }

    fn apply_header_lines(&mut self, lines: &[String], use_host_header: bool) -> Result<(), ProtocolError> {
        let mut seen_length = false;
        let mut seen_type = false;
        let mut seen_host = false;
        let mut seen_language = false;

        for (name, value) in lines.iter().filter_map(|l| headers::split_line(l)) {
            if name.eq_ignore_ascii_case("Content-Length") {
                if !seen_length {
                    seen_length = true;
                    let length = value
                        .parse::<u64>()
                        .map_err(|_| ProtocolError::BadContentLength(value.to_string()))?;
                    self.content_length = Some(length);
                }
            } else if name.eq_ignore_ascii_case("Content-Type") {
                if !seen_type {
                    seen_type = true;
                    self.content_type = Some(value.to_string());
                    self.character_encoding = charset_of(value);
                }
            } else if name.eq_ignore_ascii_case("Host") {
                if use_host_header && !seen_host {
                    seen_host = true;
                    let default_port = if self.secure { 443 } else { 80 };
                    let (host, port) = split_host(value, default_port);
                    self.set_server(host, port);
                }
            } else if name.eq_ignore_ascii_case("Cookie") {
                let first = self.cookies.len();
                cookie::parse_header(value, &mut self.cookies);
                for c in &self.cookies[first..] {
                    if c.name == SESSION_COOKIE_NAME {
                        self.requested_session_ids.push(c.value.clone());
                    }
                }
            } else if name.eq_ignore_ascii_case("Accept-Language") {
                if !seen_language {
                    seen_language = true;
                    self.locales = locale::parse_accept_language(value);
                }
            } else if name.eq_ignore_ascii_case("Authorization") && self.authorization.is_none() {
                self.authorization = Some(value.to_string());
            }
        }
        Ok(())
    }

    // --- Body access ---

    pub(crate) fn attach_body(&mut self, demands: mpsc::Sender<BodyDemand>) {
        self.body = Some(demands);
    }

    pub(crate) fn detach_body(&mut self) {
        self.body = None;
    }

    /// Read up to `max` bytes of the entity body. An empty result means the
    /// body is exhausted.
    pub async fn read_body(&mut self, max: usize) -> io::Result<Bytes> {
        let Some(demands) = &self.body else {
            return Ok(Bytes::new());
        };
        let (reply, response) = oneshot::channel();
        let demand = BodyDemand {
            max: max.clamp(1, MAX_BODY_READ),
            reply,
        };
        if demands.send(demand).await.is_err() {
            return Ok(Bytes::new());
        }
        match response.await {
            Ok(result) => result.map_err(io::Error::from),
            Err(_) => Err(io::Error::new(io::ErrorKind::BrokenPipe, "connection session ended")),
        }
    }

    /// Read the remaining body, up to `limit` bytes.
    pub async fn read_body_to_end(&mut self, limit: usize) -> io::Result<Bytes> {
        let mut body = BytesMut::new();
        while body.len() < limit {
            let chunk = self.read_body(limit - body.len()).await?;
            if chunk.is_empty() {
                break;
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }

    /// Merge an `application/x-www-form-urlencoded` body into the parameters.
    ///
    /// Does nothing for other content types or when no length is declared.
    pub async fn read_form_parameters(&mut self) -> io::Result<()> {
        let is_form = self
            .content_type
            .as_deref()
            .map(|ct| {
                ct.split(';')
                    .next()
                    .unwrap_or("")
                    .trim()
                    .eq_ignore_ascii_case("application/x-www-form-urlencoded")
            })
            .unwrap_or(false);
        let Some(length) = self.content_length.filter(|_| is_form) else {
            return Ok(());
        };
        let limit = usize::try_from(length).unwrap_or(usize::MAX);
        let body = self.read_body_to_end(limit).await?;
        let text = String::from_utf8_lossy(&body);
        percent::parse_query(&text, &mut self.parameters, self.max_parameters).map_err(io::Error::from)
    }
}

fn charset_of(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_string())
    })
}

/// Split a `Host` value into name and port, handling `[v6]:port`.
pub(crate) fn split_host(value: &str, default_port: u16) -> (&str, u16) {
    let value = value.trim();
    if value.starts_with('[') {
        if let Some(end) = value.find(']') {
            let host = &value[..=end];
            let port = value[end + 1..]
                .strip_prefix(':')
                .and_then(|p| p.parse().ok())
                .unwrap_or(default_port);
            return (host, port);
        }
        return (value, default_port);
    }
    // A bare IPv6 literal has several colons and no port.
    match value.split_once(':') {
        Some((host, port)) if !port.contains(':') => (host, port.parse().unwrap_or(default_port)),
        _ => (value, default_port),
    }
}
