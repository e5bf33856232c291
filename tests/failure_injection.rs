//! Failure injection tests for the connector.

use std::time::Duration;

use servlet_connector::{EchoRouter, Request, Response, Router, RouterError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

mod common;

use common::{closed_by_server, eventually, round_trip, start_connector, test_config};

/// Fails after writing part of an error page.
struct FailingRouter;

impl Router for FailingRouter {
    async fn execute<'a>(&'a self, _req: &'a mut Request, resp: &'a mut Response) -> Result<(), RouterError> {
        resp.set_status(503);
        resp.write_str("try later").await?;
        Err("backend unavailable".into())
    }
}

#[tokio::test]
async fn malformed_request_line_closes_connection() {
    let connector = start_connector(test_config(), EchoRouter).await;
    let mut stream = TcpStream::connect(connector.http).await.unwrap();

    stream.write_all(b"GARBAGE\r\n\r\n").await.unwrap();
    let mut rest = Vec::new();
    let result = stream.read_to_end(&mut rest).await;
    assert!(result.is_err() || rest.is_empty());

    // A fresh connection is unaffected.
    let mut stream = TcpStream::connect(connector.http).await.unwrap();
    let res = round_trip(&mut stream, "GET / HTTP/1.1\r\n\r\n").await;
    assert_eq!(res.status(), 200);

    drop(stream);
    connector.stop().await;
}

#[tokio::test]
async fn bad_content_length_closes_connection() {
    let connector = start_connector(test_config(), EchoRouter).await;
    let mut stream = TcpStream::connect(connector.http).await.unwrap();

    stream
        .write_all(b"POST / HTTP/1.1\r\nContent-Length: lots\r\n\r\n")
        .await
        .unwrap();
    assert!(closed_by_server(&mut stream, Duration::from_secs(2)).await);

    connector.stop().await;
}

#[tokio::test]
async fn router_error_still_sends_response() {
    let connector = start_connector(test_config(), FailingRouter).await;
    let mut stream = TcpStream::connect(connector.http).await.unwrap();

    let res = round_trip(&mut stream, "GET /broken HTTP/1.1\r\n\r\n").await;
    assert_eq!(res.status(), 503);
    assert_eq!(res.header("Content-Length"), Some("9"));
    assert_eq!(res.body_text(), "try later");

    // Synthesized length keeps the connection usable.
    let res = round_trip(&mut stream, "GET /broken HTTP/1.1\r\n\r\n").await;
    assert_eq!(res.status(), 503);

    drop(stream);
    connector.stop().await;
}

#[tokio::test]
async fn pool_exhaustion_drops_extra_connection() {
    let mut config = test_config();
    config.pool.max_workers = 1;
    config.pool.startup_workers = 1;
    config.pool.max_idle_workers = 1;
    let connector = start_connector(config, EchoRouter).await;

    // Occupies the only worker while it waits for its first request.
    let mut first = TcpStream::connect(connector.http).await.unwrap();
    let pool = connector.pool.clone();
    assert!(eventually(|| pool.busy_workers() == 1).await);

    let mut second = TcpStream::connect(connector.http).await.unwrap();
    assert!(closed_by_server(&mut second, Duration::from_secs(2)).await);
    assert_eq!(connector.pool.total_workers(), 1);

    // The admitted connection is still served.
    let res = round_trip(&mut first, "GET / HTTP/1.1\r\n\r\n").await;
    assert_eq!(res.status(), 200);

    drop(first);
    assert!(eventually(|| pool.busy_workers() == 0).await);
    let mut third = TcpStream::connect(connector.http).await.unwrap();
    let res = round_trip(&mut third, "GET / HTTP/1.1\r\n\r\n").await;
    assert_eq!(res.status(), 200);

    drop(third);
    connector.stop().await;
}

#[tokio::test]
async fn keep_alive_timeout_closes_idle_connection() {
    let mut config = test_config();
    config.timeouts.keep_alive_ms = 100;
    let connector = start_connector(config, EchoRouter).await;
    let mut stream = TcpStream::connect(connector.http).await.unwrap();

    let res = round_trip(&mut stream, "GET / HTTP/1.1\r\n\r\n").await;
    assert_eq!(res.header("Connection"), Some("keep-alive"));
    assert!(closed_by_server(&mut stream, Duration::from_secs(2)).await);

    let tracker = connector.tracker.clone();
    assert!(eventually(|| tracker.active_count() == 0).await);
    connector.stop().await;
}

#[tokio::test]
async fn first_request_timeout_closes_silent_connection() {
    let mut config = test_config();
    config.timeouts.first_request_ms = 100;
    let connector = start_connector(config, EchoRouter).await;

    let mut stream = TcpStream::connect(connector.http).await.unwrap();
    assert!(closed_by_server(&mut stream, Duration::from_secs(2)).await);

    connector.stop().await;
}

#[tokio::test]
async fn truncated_body_closes_connection() {
    let connector = start_connector(test_config(), EchoRouter).await;
    let mut stream = TcpStream::connect(connector.http).await.unwrap();

    stream
        .write_all(b"POST / HTTP/1.1\r\nContent-Length: 100\r\n\r\nshort")
        .await
        .unwrap();
    stream.shutdown().await.unwrap();

    // Whatever was written, the connection does not survive.
    let mut rest = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut rest))
        .await
        .expect("connection left open");

    let tracker = connector.tracker.clone();
    assert!(eventually(|| tracker.active_count() == 0).await);
    connector.stop().await;
}

#[tokio::test]
async fn graceful_shutdown_closes_idle_keep_alive_connections() {
    let connector = start_connector(test_config(), EchoRouter).await;
    let mut stream = TcpStream::connect(connector.http).await.unwrap();
    let res = round_trip(&mut stream, "GET / HTTP/1.1\r\n\r\n").await;
    assert_eq!(res.status(), 200);

    let tracker = connector.tracker.clone();
    let http = connector.http;
    connector.stop().await;

    assert_eq!(tracker.active_count(), 0);
    assert!(closed_by_server(&mut stream, Duration::from_secs(1)).await);
    let refused = TcpStream::connect(http).await;
    assert!(refused.is_err());
}
