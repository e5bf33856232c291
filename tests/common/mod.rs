//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use servlet_connector::net::connection::ConnectionTracker;
use servlet_connector::pool::DispatchPool;
use servlet_connector::{ConnectorConfig, Protocol, Router, Server, Shutdown};

/// A connector running on ephemeral loopback ports.
pub struct TestConnector {
    pub http: SocketAddr,
    pub ajp13: SocketAddr,
    pub pool: Arc<DispatchPool>,
    pub tracker: ConnectionTracker,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<()>,
}

impl TestConnector {
    /// Trigger shutdown and wait for the server task to finish.
    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(15), self.handle)
            .await
            .expect("connector did not stop")
            .expect("connector task panicked");
    }
}

/// Defaults with HTTP and AJP13 on `127.0.0.1:0` and HTTPS off.
pub fn test_config() -> ConnectorConfig {
    let mut config = ConnectorConfig::default();
    for protocol in [Protocol::Http, Protocol::Ajp13] {
        let listener = config.listener_mut(protocol);
        listener.bind_address = "127.0.0.1".to_string();
        listener.port = Some(0);
    }
    config.pool.startup_workers = 1;
    config.timeouts.shutdown_grace_ms = 2_000;
    config
}

pub async fn start_connector<R: Router>(config: ConnectorConfig, router: R) -> TestConnector {
    let server = Server::new(config, router).bind().await.expect("bind failed");
    let http = server.local_addr(Protocol::Http).expect("http listener");
    let ajp13 = server.local_addr(Protocol::Ajp13).expect("ajp13 listener");
    let pool = server.pool();
    let tracker = server.tracker();

    let shutdown = Shutdown::new();
    let handle = tokio::spawn(server.run(shutdown.clone()));

    TestConnector {
        http,
        ajp13,
        pool,
        tracker,
        shutdown,
        handle,
    }
}

/// A parsed HTTP/1.x response read off a raw socket.
#[derive(Debug)]
pub struct RawResponse {
    pub status_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn status(&self) -> u16 {
        self.status_line
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Read one response. The body is length-delimited when `Content-Length` is
/// present, otherwise it runs to EOF. `head_only` skips the body.
pub async fn read_response(stream: &mut TcpStream, head_only: bool) -> RawResponse {
    let mut raw = Vec::new();
    let head_end = loop {
        if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await.expect("read failed");
        assert!(n > 0, "connection closed before response head");
        raw.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&raw[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
        .collect();

    let mut body = raw[head_end + 4..].to_vec();
    let length = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("Content-Length"))
        .and_then(|(_, v)| v.parse::<usize>().ok());

    if !head_only {
        match length {
            Some(length) => {
                while body.len() < length {
                    let mut chunk = [0u8; 1024];
                    let n = stream.read(&mut chunk).await.expect("read failed");
                    assert!(n > 0, "connection closed inside body");
                    body.extend_from_slice(&chunk[..n]);
                }
            }
            None => {
                stream.read_to_end(&mut body).await.expect("read failed");
            }
        }
    }

    RawResponse {
        status_line,
        headers,
        body,
    }
}

/// Write `request` and read one response.
pub async fn round_trip(stream: &mut TcpStream, request: &str) -> RawResponse {
    stream.write_all(request.as_bytes()).await.expect("write failed");
    read_response(stream, request.starts_with("HEAD ")).await
}

/// Whether the server closes `stream` within `within`.
pub async fn closed_by_server(stream: &mut TcpStream, within: Duration) -> bool {
    let mut buf = [0u8; 64];
    match tokio::time::timeout(within, stream.read(&mut buf)).await {
        Ok(Ok(0)) | Ok(Err(_)) => true,
        Ok(Ok(_)) | Err(_) => false,
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
