//! HTTP/0.9 - HTTP/1.1 request decoding and status-line encoding.
//!
//! # Request Grammar
//! ```text
//! [CRLF ...] METHOD SP target [SP version] CRLF
//! (Name: value CRLF)*
//! CRLF
//! ```
//! A request line without a version is an HTTP/0.9 simple request: no
//! headers follow and the response carries no head.

use std::fmt::Write as _;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::net::connection::Connection;
use crate::protocol::ProtocolError;
use crate::request::Request;

/// Protocol string recorded for simple requests.
pub const HTTP_09: &str = "HTTP/0.9";

/// Most header lines accepted in one request.
pub const MAX_HEADERS: usize = 100;

/// Decode one request from `conn` into `req`.
///
/// Server name and port default to the local socket and are replaced by the
/// `Host` header when present. The body is left unread on the connection.
pub async fn read_request<S>(conn: &mut Connection<S>, req: &mut Request) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let line = loop {
        match conn.read_line().await? {
            None => return Err(ProtocolError::Closed),
            Some(line) if line.trim().is_empty() => continue,
            Some(line) => break line,
        }
    };

    let mut tokens = line.split_whitespace();
    let (method, target) = match (tokens.next(), tokens.next()) {
        (Some(method), Some(target)) => (method, target),
        _ => return Err(ProtocolError::BadRequestLine(line)),
    };
    let version = tokens.next();
    if tokens.next().is_some() {
        return Err(ProtocolError::BadRequestLine(line));
    }

    let secure = conn.protocol().is_secure();
    req.set_secure(secure);
    req.set_method(method);
    req.set_protocol(version.unwrap_or(HTTP_09));
    let peer = conn.peer_addr();
    let ip = peer.ip().to_string();
    req.set_remote(Some(peer), &ip, &ip);
    let local = conn.local_addr();
    req.set_server(&local.ip().to_string(), local.port());

    let target = origin_form(target);
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    };
    req.set_uri(path);

    if version.is_some() {
        let mut count = 0;
        loop {
            match conn.read_line().await? {
                None => return Err(ProtocolError::Truncated("header block")),
                Some(line) if line.is_empty() => break,
                Some(_) if count == MAX_HEADERS => return Err(ProtocolError::TooManyHeaders(MAX_HEADERS)),
                Some(line) => {
                    count += 1;
                    req.push_header_line(&line);
                }
            }
        }
        req.apply_headers(true)?;
    }

    if let Some(query) = query {
        req.set_query_string(query)?;
    }
    Ok(())
}

/// Strip `scheme://authority` from an absolute-form target.
fn origin_form(target: &str) -> &str {
    let Some(idx) = target.find("://") else {
        return target;
    };
    if target[..idx].contains('/') {
        return target;
    }
    let rest = &target[idx + 3..];
    match rest.find('/') {
        Some(slash) => &rest[slash..],
        None => "/",
    }
}

/// Standard reason phrase for `status`.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Moved Temporarily",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        307 => "Temporary Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Request Entity Too Large",
        414 => "Request-URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Requested Range Not Satisfiable",
        417 => "Expectation Failed",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => "Unknown",
    }
}

/// Append `VERSION SP status SP reason CRLF` to `out`.
pub fn write_status_line(out: &mut String, version: &str, status: u16) {
    let _ = write!(out, "{} {} {}\r\n", version, status, reason_phrase(status));
}

/// Current time in RFC 1123 form, for the `Date` header.
pub fn http_date() -> String {
    chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::test_support::pipe;
    use crate::protocol::Protocol;
    use tokio::io::AsyncWriteExt;

    async fn decode(raw: &[u8]) -> Result<Request, ProtocolError> {
        let (mut conn, mut client) = pipe(Protocol::Http);
        client.write_all(raw).await.unwrap();
        drop(client);
        let mut req = Request::default();
        read_request(&mut conn, &mut req).await.map(|_| req)
    }

    #[tokio::test]
    async fn full_request() {
        let req = decode(b"\r\nGET /a%20b/c?x=1&y=two+words HTTP/1.1\r\nHost: example.com\r\nX-Multi: 1\r\nX-Multi: 2\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(req.method(), "GET");
        assert_eq!(req.uri(), "/a%20b/c");
        assert_eq!(req.decoded_uri(), "/a b/c");
        assert_eq!(req.query_string(), Some("x=1&y=two+words"));
        assert_eq!(req.parameter("y"), Some("two words"));
        assert_eq!(req.protocol(), "HTTP/1.1");
        assert_eq!(req.server_name(), "example.com");
        assert_eq!(req.server_port(), 80);
        assert_eq!(req.headers("x-multi").collect::<Vec<_>>(), vec!["1", "2"]);
        assert_eq!(req.remote_ip(), "127.0.0.1");
    }

    #[tokio::test]
    async fn simple_request_has_no_headers() {
        let req = decode(b"GET /index.html\r\nHost: ignored\r\n\r\n").await.unwrap();
        assert_eq!(req.protocol(), HTTP_09);
        assert!(req.header_lines().is_empty());
        assert_eq!(req.server_port(), 8080);
    }

    #[tokio::test]
    async fn absolute_form_is_reduced() {
        let req = decode(b"GET http://proxy.example:81/p?q HTTP/1.0\r\n\r\n").await.unwrap();
        assert_eq!(req.uri(), "/p");
        assert_eq!(req.query_string(), Some("q"));
        assert_eq!(origin_form("http://host"), "/");
    }

    #[tokio::test]
    async fn malformed_inputs() {
        assert!(matches!(decode(b"GARBAGE\r\n\r\n").await, Err(ProtocolError::BadRequestLine(_))));
        assert!(matches!(decode(b"GET / HTTP/1.1 extra\r\n\r\n").await, Err(ProtocolError::BadRequestLine(_))));
        assert!(matches!(
            decode(b"GET / HTTP/1.1\r\nHost: x\r\n").await,
            Err(ProtocolError::Truncated(_))
        ));
        assert!(matches!(
            decode(b"POST / HTTP/1.1\r\nContent-Length: -1\r\n\r\n").await,
            Err(ProtocolError::BadContentLength(_))
        ));
        assert!(matches!(decode(b"").await, Err(ProtocolError::Closed)));
    }

    #[tokio::test]
    async fn header_count_is_limited() {
        let block = |count: usize| {
            let mut raw = b"GET / HTTP/1.1\r\n".to_vec();
            for i in 0..count {
                raw.extend_from_slice(format!("X-H{}: v\r\n", i).as_bytes());
            }
            raw.extend_from_slice(b"\r\n");
            raw
        };
        let req = decode(&block(MAX_HEADERS)).await.unwrap();
        assert_eq!(req.header_lines().len(), MAX_HEADERS);
        assert!(matches!(
            decode(&block(MAX_HEADERS + 1)).await,
            Err(ProtocolError::TooManyHeaders(MAX_HEADERS))
        ));
    }

    #[tokio::test]
    async fn oversized_line_rejected() {
        let mut raw = b"GET /".to_vec();
        raw.extend(std::iter::repeat(b'a').take(crate::net::connection::MAX_LINE_LENGTH + 10));
        raw.extend_from_slice(b" HTTP/1.1\r\n\r\n");
        assert!(matches!(decode(&raw).await, Err(ProtocolError::LineTooLong(_))));
    }

    #[test]
    fn status_lines() {
        let mut out = String::new();
        write_status_line(&mut out, "HTTP/1.1", 404);
        assert_eq!(out, "HTTP/1.1 404 Not Found\r\n");
        assert_eq!(reason_phrase(799), "Unknown");
        assert!(http_date().ends_with(" GMT"));
    }
}
