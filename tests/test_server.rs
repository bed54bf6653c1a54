//! End-to-end tests through the listening server

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use common::{SWITCHING_PROTOCOLS, UPGRADE_REQUEST, with_timeout};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use wsgate::config::Config;
use wsgate::server::Server;

struct Running {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<anyhow::Result<()>>,
}

async fn start(cfg: Config) -> Running {
    let server = Server::bind(&cfg).await.unwrap();
    let addr = server.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.run(async {
        let _ = stopped.await;
    }));
    Running { addr, stop, handle }
}

/// Send one request with `Connection: close` and return (head, body).
async fn request(addr: SocketAddr, method: &str, path: &str) -> (String, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let raw = format!("{method} {path} HTTP/1.1\r\nHost: proxy.local\r\nConnection: close\r\n\r\n");
    stream.write_all(raw.as_bytes()).await.unwrap();

    let mut received = Vec::new();
    with_timeout(stream.read_to_end(&mut received)).await.unwrap();
    let text = String::from_utf8(received).unwrap();
    let (head, body) = text.split_once("\r\n\r\n").unwrap();
    (head.to_string(), body.to_string())
}

/// Read one Content-Length framed response from a kept-alive connection.
async fn read_response(stream: &mut TcpStream) -> (String, String) {
    let (head, mut body) = with_timeout(common::read_head(stream)).await.unwrap();
    let length: usize = head
        .lines()
        .find_map(|line| line.strip_prefix("Content-Length: "))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    while body.len() < length {
        let mut chunk = [0u8; 1024];
        let n = with_timeout(stream.read(&mut chunk)).await.unwrap();
        assert!(n > 0, "connection closed mid-body");
        body.extend_from_slice(&chunk[..n]);
    }
    (head, String::from_utf8(body).unwrap())
}

#[tokio::test]
async fn test_health_ok_while_backend_down() {
    let backend = common::dead_backend().await;
    let server = start(common::proxy_config(backend)).await;

    let (head, body) = request(server.addr, "GET", "/").await;
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert!(head.contains("Content-Type: application/json"));
    assert!(head.contains("Access-Control-Allow-Origin: *"));
    assert!(head.contains("Access-Control-Allow-Credentials: true"));

    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["message"], "WebSocket proxy server is running");
    assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test]
async fn test_accept_loop_survives_aborted_connections() {
    let backend = common::dead_backend().await;
    let server = start(common::proxy_config(backend)).await;

    for _ in 0..32 {
        let stream = TcpStream::connect(server.addr).await.unwrap();
        stream.set_linger(Some(Duration::ZERO)).unwrap();
        drop(stream);
    }

    let (head, _) = request(server.addr, "GET", "/").await;
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert!(!server.handle.is_finished());
}

#[tokio::test]
async fn test_stats_uptime_is_monotonic() {
    let backend = common::dead_backend().await;
    let server = start(common::proxy_config(backend)).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    let raw = b"GET /stats HTTP/1.1\r\nHost: proxy.local\r\n\r\n";

    stream.write_all(raw).await.unwrap();
    let (head, first) = read_response(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert!(head.contains("Connection: keep-alive"));

    tokio::time::sleep(Duration::from_millis(20)).await;

    stream.write_all(raw).await.unwrap();
    let (_, second) = read_response(&mut stream).await;

    let first: serde_json::Value = serde_json::from_str(&first).unwrap();
    let second: serde_json::Value = serde_json::from_str(&second).unwrap();
    let before = first["uptime"].as_f64().unwrap();
    let after = second["uptime"].as_f64().unwrap();
    assert!(after > before, "uptime went from {before} to {after}");

    assert!(second["memory"].get("rss").is_some());
    assert!(second["memory"].get("virtual").is_some());
    assert!(second["timestamp"].is_string());
}

#[tokio::test]
async fn test_head_health_has_no_body() {
    let backend = common::dead_backend().await;
    let server = start(common::proxy_config(backend)).await;

    let (head, body) = request(server.addr, "HEAD", "/").await;
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert!(head.contains("Content-Length: "));
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let backend = common::dead_backend().await;
    let server = start(common::proxy_config(backend)).await;

    let (head, body) = request(server.addr, "GET", "/nope").await;
    assert!(head.starts_with("HTTP/1.1 404 Not Found"));
    assert!(head.contains("Access-Control-Allow-Origin: *"));
    assert_eq!(body, "404 Not Found");
}

#[tokio::test]
async fn test_preflight_is_answered_locally() {
    let backend = common::dead_backend().await;
    let server = start(common::proxy_config(backend)).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(
            b"OPTIONS /ws HTTP/1.1\r\n\
              Host: proxy.local\r\n\
              Origin: http://app.local\r\n\
              Access-Control-Request-Method: POST\r\n\
              Connection: close\r\n\r\n",
        )
        .await
        .unwrap();

    let mut received = Vec::new();
    with_timeout(stream.read_to_end(&mut received)).await.unwrap();
    let text = String::from_utf8(received).unwrap();
    assert!(text.starts_with("HTTP/1.1 204 No Content"));
    assert!(text.contains("Access-Control-Allow-Methods: GET,POST"));
}

#[tokio::test]
async fn test_malformed_request_gets_400() {
    let backend = common::dead_backend().await;
    let server = start(common::proxy_config(backend)).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(b"NONSENSE\r\n\r\n").await.unwrap();

    let mut received = Vec::new();
    with_timeout(stream.read_to_end(&mut received)).await.unwrap();
    assert!(String::from_utf8_lossy(&received).starts_with("HTTP/1.1 400 Bad Request"));
}

#[tokio::test]
async fn test_http_request_is_forwarded() {
    let (backend, _events) =
        common::fixed_backend("HTTP/1.1 200 OK\r\nContent-Length: 7\r\n\r\nbackend").await;
    let server = start(common::proxy_config(backend)).await;

    let (head, body) = request(server.addr, "GET", "/ws/info").await;
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert!(head.contains("Connection: close"));
    assert_eq!(body, "backend");
}

#[tokio::test]
async fn test_websocket_echo_through_server() {
    let (backend, _events) = common::echo_backend().await;
    let server = start(common::proxy_config(backend)).await;

    let mut client = TcpStream::connect(server.addr).await.unwrap();
    client.write_all(UPGRADE_REQUEST.as_bytes()).await.unwrap();

    let (head, rest) = with_timeout(common::read_head(&mut client)).await.unwrap();
    assert_eq!(head, SWITCHING_PROTOCOLS);
    assert!(rest.is_empty());

    client.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    with_timeout(client.read_exact(&mut buf)).await.unwrap();
    assert_eq!(&buf, b"ping");
}

#[tokio::test]
async fn test_pipelined_bytes_follow_the_upgrade() {
    let (backend, _events) = common::echo_backend().await;
    let server = start(common::proxy_config(backend)).await;

    let mut client = TcpStream::connect(server.addr).await.unwrap();
    let mut raw = UPGRADE_REQUEST.as_bytes().to_vec();
    raw.extend_from_slice(b"early");
    client.write_all(&raw).await.unwrap();

    let (head, mut echoed) = with_timeout(common::read_head(&mut client)).await.unwrap();
    assert_eq!(head, SWITCHING_PROTOCOLS);

    while echoed.len() < 5 {
        let mut chunk = [0u8; 16];
        let n = with_timeout(client.read(&mut chunk)).await.unwrap();
        assert!(n > 0);
        echoed.extend_from_slice(&chunk[..n]);
    }
    assert_eq!(echoed, b"early");
}

#[tokio::test]
async fn test_upgrade_with_backend_down_is_closed() {
    let backend = common::dead_backend().await;
    let server = start(common::proxy_config(backend)).await;

    let mut client = TcpStream::connect(server.addr).await.unwrap();
    client.write_all(UPGRADE_REQUEST.as_bytes()).await.unwrap();

    let mut received = Vec::new();
    with_timeout(client.read_to_end(&mut received)).await.unwrap();
    let text = String::from_utf8_lossy(&received);
    assert!(text.starts_with("HTTP/1.1 500 Internal Server Error"));
    assert!(text.contains("\"error\":\"Proxy error\""));
}

#[tokio::test]
async fn test_graceful_shutdown_closes_idle_connections() {
    let backend = common::dead_backend().await;
    let server = start(common::proxy_config(backend)).await;

    let mut idle = TcpStream::connect(server.addr).await.unwrap();
    idle.write_all(b"GET / HTTP/1.1\r\nHost: proxy.local\r\n\r\n")
        .await
        .unwrap();
    read_response(&mut idle).await;

    server.stop.send(()).unwrap();
    with_timeout(server.handle).await.unwrap().unwrap();

    let mut buf = [0u8; 16];
    let n = with_timeout(idle.read(&mut buf)).await.unwrap_or(0);
    assert_eq!(n, 0);

    assert!(TcpStream::connect(server.addr).await.is_err());
}

#[tokio::test]
async fn test_shutdown_aborts_open_tunnels_after_grace() {
    let (backend, mut events) = common::echo_backend().await;
    let server = start(common::proxy_config(backend)).await;

    let mut client = TcpStream::connect(server.addr).await.unwrap();
    client.write_all(UPGRADE_REQUEST.as_bytes()).await.unwrap();
    with_timeout(common::read_head(&mut client)).await.unwrap();

    server.stop.send(()).unwrap();
    with_timeout(server.handle).await.unwrap().unwrap();

    let mut buf = [0u8; 16];
    let n = with_timeout(client.read(&mut buf)).await.unwrap_or(0);
    assert_eq!(n, 0);

    // Request, then the backend side closing
    let _ = with_timeout(events.recv()).await;
    assert!(matches!(
        with_timeout(events.recv()).await,
        Some(common::BackendEvent::Closed)
    ));
}
